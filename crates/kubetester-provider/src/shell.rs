use crate::capability::{CommandOutput, CommandRunner};
use crate::ProviderError;
use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Replace `{{key}}` references in a command template.
pub fn expand_refs(template: &str, refs: &[(String, String)]) -> String {
    let mut out = template.to_owned();
    for (key, value) in refs {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}

/// Runs commands through `sh -c`, killing them once the timeout elapses.
///
/// The timeout also bounds reading the output: a background process that
/// keeps the pipes open past the deadline turns the run into a timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

fn drain(mut pipe: impl Read + Send + 'static) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
    });
    rx
}

/// `None` when the deadline is unbounded.
fn remaining(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|d| d.saturating_duration_since(Instant::now()))
}

/// Output of one pipe, or `None` if it is still held open at the deadline.
fn collect(pipe: Option<Receiver<String>>, deadline: Option<Instant>) -> Option<String> {
    let Some(rx) = pipe else {
        return Some(String::new());
    };
    let received = match remaining(deadline) {
        None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        Some(left) => rx.recv_timeout(left),
    };
    match received {
        Ok(text) => Some(text),
        Err(RecvTimeoutError::Disconnected) => Some(String::new()),
        Err(RecvTimeoutError::Timeout) => None,
    }
}

impl ShellRunner {
    fn timed_out(command: &str, timeout: Duration) -> ProviderError {
        ProviderError::Timeout {
            command: command.to_owned(),
            secs: timeout.as_secs(),
        }
    }
}

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput, ProviderError> {
        debug!("running `{command}` (timeout {}s)", timeout.as_secs());
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let deadline = Instant::now().checked_add(timeout);
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                warn!("`{command}` exceeded {}s, killing it", timeout.as_secs());
                let _ = child.kill();
                let _ = child.wait();
                return Err(Self::timed_out(command, timeout));
            }
            thread::sleep(POLL_INTERVAL);
        };

        let (Some(stdout), Some(stderr)) = (collect(stdout, deadline), collect(stderr, deadline))
        else {
            warn!(
                "`{command}` exited but a background process still holds its output after {}s",
                timeout.as_secs()
            );
            return Err(Self::timed_out(command, timeout));
        };

        Ok(CommandOutput {
            success: status.success(),
            status: status.to_string(),
            stdout,
            stderr,
        })
    }
}
