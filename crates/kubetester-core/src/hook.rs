use crate::CoreError;
use kubetester_config::{EnvironmentConfig, HooksSection};
use kubetester_provider::{CommandOutput, ProviderError};
use kubetester_store::StateDocument;
use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Points in the Up saga where an operator command may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPoint {
    AfterCreateCluster,
    AfterCreateAddOns,
}

impl HookPoint {
    pub fn as_str(self) -> &'static str {
        match self {
            HookPoint::AfterCreateCluster => "after_create_cluster",
            HookPoint::AfterCreateAddOns => "after_create_add_ons",
        }
    }

    pub fn command(self, hooks: &HooksSection) -> Option<&str> {
        match self {
            HookPoint::AfterCreateCluster => hooks.after_create_cluster.as_deref(),
            HookPoint::AfterCreateAddOns => hooks.after_create_add_ons.as_deref(),
        }
    }

    pub fn output(self, hooks: &HooksSection) -> Option<&Path> {
        match self {
            HookPoint::AfterCreateCluster => hooks.after_create_cluster_output.as_deref(),
            HookPoint::AfterCreateAddOns => hooks.after_create_add_ons_output.as_deref(),
        }
    }
}

/// `{{key}}` values available to hook commands.
pub fn refs(config: &EnvironmentConfig, state: &StateDocument) -> Vec<(String, String)> {
    let mut refs = vec![
        ("name".to_owned(), config.name.clone()),
        ("region".to_owned(), config.region.clone()),
    ];
    if let Some(ref kubeconfig) = config.kubeconfig {
        refs.push(("kubeconfig".to_owned(), kubeconfig.display().to_string()));
    }
    if let Some(ref arn) = state.cluster.arn {
        refs.push(("cluster_arn".to_owned(), arn.clone()));
    }
    if let Some(ref endpoint) = state.cluster.endpoint {
        refs.push(("cluster_endpoint".to_owned(), endpoint.clone()));
    }
    refs
}

/// Render the result file: the command, a blank line, `# output` and the
/// combined output, then `# error` with the failure if there was one.
pub fn render(command: &str, result: &Result<CommandOutput, ProviderError>) -> String {
    let mut body = format!("{command}\n\n# output\n");
    match result {
        Ok(out) => {
            body.push_str(&out.stdout);
            body.push_str(&out.stderr);
            if !out.success {
                let _ = write!(body, "\n\n# error\n{}\n", out.status);
            }
        }
        Err(e) => {
            let _ = write!(body, "\n\n# error\n{e}\n");
        }
    }
    body
}

/// Write the result file readable by the owner only.
pub fn write_result(path: &Path, body: &str) -> Result<(), CoreError> {
    let wrap = |source| CoreError::HookOutput {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(wrap)?;
    }
    let mut options = OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path).map_err(wrap)?;
    file.write_all(body.as_bytes()).map_err(wrap)?;
    file.sync_all().map_err(wrap)
}
