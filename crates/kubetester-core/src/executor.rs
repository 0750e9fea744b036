use crate::stop::{StopOrigin, StopSignal, Wake};
use std::sync::mpsc::{self, Sender};
use std::thread;

/// What the caller observes after running one step.
#[derive(Debug, PartialEq, Eq)]
pub enum StepOutcome<T> {
    Finished(T),
    /// The stop signal fired before the step finished. The step still ran to
    /// completion and its output is carried along.
    Interrupted { origin: StopOrigin, output: T },
}

impl<T> StepOutcome<T> {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, StepOutcome::Interrupted { .. })
    }

    pub fn into_output(self) -> T {
        match self {
            StepOutcome::Finished(output) | StepOutcome::Interrupted { output, .. } => output,
        }
    }
}

/// Sends `Wake::Done` when dropped, so a panicking step still wakes the waiter.
struct DoneGuard(Sender<Wake>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        let _ = self.0.send(Wake::Done);
    }
}

/// Run `work` on a scoped thread, racing it against `stop`.
///
/// The work is never aborted: if the signal wins, this still waits for the
/// work to return and reports [`StepOutcome::Interrupted`] with its output.
/// A panic inside `work` is resumed on the calling thread.
pub fn run_interruptible<T, F>(stop: &StopSignal, work: F) -> StepOutcome<T>
where
    T: Send,
    F: FnOnce() -> T + Send,
{
    let (tx, rx) = mpsc::channel();
    // Subscribe before spawning so a stop fired from inside the work is
    // always ordered ahead of its completion.
    let _subscription = stop.subscribe(tx.clone());

    thread::scope(|scope| {
        let handle = scope.spawn(move || {
            let _done = DoneGuard(tx);
            work()
        });

        let first = rx.recv();
        let output = match handle.join() {
            Ok(output) => output,
            Err(panic) => std::panic::resume_unwind(panic),
        };
        match first {
            Ok(Wake::Stop(origin)) => StepOutcome::Interrupted { origin, output },
            Ok(Wake::Done) | Err(_) => StepOutcome::Finished(output),
        }
    })
}
