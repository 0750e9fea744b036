pub mod completions;
pub mod down;
pub mod init;
pub mod is_up;
pub mod logs;
pub mod man_pages;
pub mod status;
pub mod up;
pub mod validate;

use indicatif::{ProgressBar, ProgressStyle};
use kubetester_config::{load_config_file, EnvironmentConfig};
use kubetester_core::{Orchestrator, StateLock, StopSignal};
use kubetester_provider::{check_command_prereqs, format_missing, select_provider};
use kubetester_store::{FileStateStore, StateLayout};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_STATE_ERROR: u8 = 3;
pub const EXIT_INTERRUPTED: u8 = 4;

/// Options shared by every command that touches an environment.
pub struct Context {
    pub config_path: PathBuf,
    pub state_dir: Option<PathBuf>,
    pub provider: Option<String>,
    pub json: bool,
    pub stop: StopSignal,
}

/// An orchestrator together with the lock guarding its state file.
///
/// Read-only sessions hold no lock.
pub struct Session {
    pub orchestrator: Orchestrator,
    pub state_path: PathBuf,
    _lock: Option<StateLock>,
}

impl Context {
    pub fn load_config(&self) -> Result<EnvironmentConfig, String> {
        load_config_file(&self.config_path).map_err(|e| format!("config error: {e}"))
    }

    pub fn layout(&self) -> StateLayout {
        match &self.state_dir {
            Some(dir) => StateLayout::new(dir),
            None => StateLayout::beside_config(&self.config_path),
        }
    }

    pub fn provider_kind(&self, config: &EnvironmentConfig) -> String {
        self.provider
            .clone()
            .unwrap_or_else(|| config.provider.kind.clone())
    }

    /// Load the config, lock its state file and build an orchestrator.
    pub fn open(&self) -> Result<Session, String> {
        self.session(true)
    }

    /// Build an orchestrator that only reads the state file.
    ///
    /// Takes no lock, so queries work while `up` or `down` is running.
    pub fn open_read_only(&self) -> Result<Session, String> {
        self.session(false)
    }

    fn session(&self, writable: bool) -> Result<Session, String> {
        let config = self.load_config()?;
        let kind = self.provider_kind(&config);

        if kind == "command" && std::env::var("KUBETESTER_SKIP_PREREQS").as_deref() != Ok("1") {
            let missing = check_command_prereqs(&config.provider.required_tools);
            if !missing.is_empty() {
                return Err(format_missing(&missing));
            }
        }
        let provider = select_provider(&kind, &config).map_err(|e| e.to_string())?;

        let layout = self.layout();
        let lock = if writable {
            layout
                .initialize(&config.name)
                .map_err(|e| format!("state store error: {e}"))?;
            let lock = StateLock::try_acquire(&layout.lock_file(&config.name))
                .map_err(|e| format!("state lock: {e}"))?;
            Some(lock)
        } else {
            None
        };

        let store = Arc::new(FileStateStore::new(layout, &config.name));
        let state_path = store.path();
        let stop = self.stop.clone();
        let orchestrator = if writable {
            Orchestrator::new(config, provider, store, stop)
        } else {
            Orchestrator::open_read_only(config, provider, store, stop)
        }
        .map_err(|e| e.to_string())?;
        Ok(Session {
            orchestrator,
            state_path,
            _lock: lock,
        })
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

fn plain_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    pb.set_style(style);
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_state(state: &str) -> String {
    use console::Style;
    match state {
        "up" | "created" => Style::new().green().apply_to(state).to_string(),
        "pending" => Style::new().yellow().apply_to(state).to_string(),
        "down" | "absent" => Style::new().dim().apply_to(state).to_string(),
        "failed" => Style::new().red().bold().apply_to(state).to_string(),
        other => other.to_owned(),
    }
}

/// Exit code for an error message produced by a command.
pub fn exit_code_for(msg: &str) -> u8 {
    if msg.starts_with("config error:") {
        EXIT_CONFIG_ERROR
    } else if msg.starts_with("state store error:") || msg.starts_with("state lock:") {
        EXIT_STATE_ERROR
    } else if msg.starts_with("interrupted") {
        EXIT_INTERRUPTED
    } else {
        EXIT_FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_pretty_serializes_object() {
        let val = serde_json::json!({"name": "demo"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"name\""));
        assert!(result.contains("\"demo\""));
    }

    #[test]
    fn colorize_known_states_keep_text() {
        for state in ["up", "down", "created", "absent", "pending", "failed"] {
            assert!(colorize_state(state).contains(state));
        }
    }

    #[test]
    fn colorize_state_unknown() {
        assert_eq!(colorize_state("unknown"), "unknown");
    }

    #[test]
    fn error_prefixes_map_to_exit_codes() {
        assert_eq!(exit_code_for("config error: bad name"), EXIT_CONFIG_ERROR);
        assert_eq!(exit_code_for("state store error: corrupt"), EXIT_STATE_ERROR);
        assert_eq!(exit_code_for("state lock: held"), EXIT_STATE_ERROR);
        assert_eq!(
            exit_code_for("interrupted by termination signal during 'create cluster'"),
            EXIT_INTERRUPTED
        );
        assert_eq!(exit_code_for("create cluster failed: boom"), EXIT_FAILURE);
    }

    #[test]
    fn state_dir_overrides_config_location() {
        let ctx = Context {
            config_path: PathBuf::from("envs/demo/kubetester.toml"),
            state_dir: Some(PathBuf::from("/var/lib/kt")),
            provider: None,
            json: false,
            stop: StopSignal::new(),
        };
        assert_eq!(ctx.layout().root(), std::path::Path::new("/var/lib/kt"));

        let beside = Context {
            state_dir: None,
            ..ctx
        };
        assert_eq!(
            beside.layout().root(),
            std::path::Path::new("envs/demo/.kubetester")
        );
    }

    #[test]
    fn spinner_finishes_both_ways() {
        let pb = spinner("working...");
        spin_ok(&pb, "done");
        let pb = spinner("working...");
        spin_fail(&pb, "failed");
    }
}
