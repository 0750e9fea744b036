use std::fmt;
use std::process::Command;

/// A tool the command provider needs but cannot find on `PATH`.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: String,
    pub purpose: String,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  - {}: {}", self.name, self.purpose)
    }
}

fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check that `sh` and every configured tool are installed.
/// Returns a list of missing items. Empty list means all prerequisites are met.
pub fn check_command_prereqs(required_tools: &[String]) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();

    if !command_exists("sh") {
        missing.push(MissingPrereq {
            name: "sh".to_owned(),
            purpose: "running provisioning commands and hooks".to_owned(),
        });
    }

    for tool in required_tools {
        if !command_exists(tool) {
            missing.push(MissingPrereq {
                name: tool.clone(),
                purpose: "listed in provider.required_tools".to_owned(),
            });
        }
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\ninstall them or run with --provider mock for a dry run.");
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_unknown_tools() {
        let missing = check_command_prereqs(&["kubetester-no-such-tool-xyz".to_owned()]);
        assert!(missing
            .iter()
            .any(|m| m.name == "kubetester-no-such-tool-xyz"));
    }

    #[test]
    fn format_missing_lists_every_tool() {
        let items = vec![
            MissingPrereq {
                name: "aws".to_owned(),
                purpose: "cloud api".to_owned(),
            },
            MissingPrereq {
                name: "kubectl".to_owned(),
                purpose: "cluster api".to_owned(),
            },
        ];
        let output = format_missing(&items);
        assert!(output.starts_with("missing prerequisites:"));
        assert!(output.contains("  - aws: cloud api"));
        assert!(output.contains("kubectl"));
    }
}
