use serde::Serialize;
use std::fmt;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Which producer fired the stop signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOrigin {
    /// An explicit in-process stop request.
    Requested,
    /// SIGINT or SIGTERM.
    Signal,
}

impl fmt::Display for StopOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopOrigin::Requested => f.write_str("stop request"),
            StopOrigin::Signal => f.write_str("termination signal"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Elapsed,
    Stopped(StopOrigin),
}

#[derive(Debug)]
pub(crate) enum Wake {
    Done,
    Stop(StopOrigin),
}

#[derive(Default)]
struct StopState {
    origin: Option<StopOrigin>,
    subscribers: Vec<(u64, Sender<Wake>)>,
    next_id: u64,
}

#[derive(Default)]
struct Inner {
    state: Mutex<StopState>,
    fired: Condvar,
}

/// Single-fire cancellation source shared by the whole process.
///
/// Once fired it stays fired and remembers the first origin. Firing again is
/// a no-op. Clones observe the same signal.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<Inner>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StopState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Fire the signal. Returns `true` only for the call that actually fired it.
    pub fn fire(&self, origin: StopOrigin) -> bool {
        let mut state = self.lock();
        if state.origin.is_some() {
            debug!("stop signal already fired, ignoring {origin}");
            return false;
        }
        state.origin = Some(origin);
        for (_, tx) in state.subscribers.drain(..) {
            let _ = tx.send(Wake::Stop(origin));
        }
        drop(state);
        self.inner.fired.notify_all();
        true
    }

    pub fn request_stop(&self) -> bool {
        self.fire(StopOrigin::Requested)
    }

    pub fn origin(&self) -> Option<StopOrigin> {
        self.lock().origin
    }

    pub fn is_fired(&self) -> bool {
        self.origin().is_some()
    }

    /// Sleep for `duration`, returning early if the signal fires.
    pub fn wait(&self, duration: Duration) -> WaitOutcome {
        let state = self.lock();
        let (state, _) = self
            .inner
            .fired
            .wait_timeout_while(state, duration, |s| s.origin.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        match state.origin {
            Some(origin) => WaitOutcome::Stopped(origin),
            None => WaitOutcome::Elapsed,
        }
    }

    /// Deliver `Wake::Stop` to `tx` when the signal fires, or immediately if it
    /// already has. Dropping the subscription unregisters it.
    pub(crate) fn subscribe(&self, tx: Sender<Wake>) -> Subscription<'_> {
        let mut state = self.lock();
        if let Some(origin) = state.origin {
            let _ = tx.send(Wake::Stop(origin));
            return Subscription {
                signal: self,
                id: None,
            };
        }
        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.push((id, tx));
        Subscription {
            signal: self,
            id: Some(id),
        }
    }
}

pub(crate) struct Subscription<'a> {
    signal: &'a StopSignal,
    id: Option<u64>,
}

impl Drop for Subscription<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            self.signal.lock().subscribers.retain(|(sid, _)| *sid != id);
        }
    }
}

/// Route SIGINT/SIGTERM into `stop`.
///
/// Repeated signals are logged and otherwise ignored: the current step always
/// runs to completion so its side effects are recorded.
pub fn install_signal_handler(stop: &StopSignal) {
    let stop = stop.clone();
    let _ = ctrlc::set_handler(move || {
        if stop.fire(StopOrigin::Signal) {
            eprintln!("\ninterrupt received, finishing current step...");
        } else {
            warn!("interrupt received again; still waiting for the current step to finish");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn fires_exactly_once() {
        let stop = StopSignal::new();
        assert!(!stop.is_fired());
        assert!(stop.fire(StopOrigin::Signal));
        assert!(!stop.fire(StopOrigin::Requested));
        assert!(!stop.request_stop());
        assert_eq!(stop.origin(), Some(StopOrigin::Signal));
    }

    #[test]
    fn clones_share_state() {
        let stop = StopSignal::new();
        let other = stop.clone();
        other.request_stop();
        assert_eq!(stop.origin(), Some(StopOrigin::Requested));
    }

    #[test]
    fn wait_elapses_when_not_fired() {
        let stop = StopSignal::new();
        assert_eq!(stop.wait(Duration::from_millis(20)), WaitOutcome::Elapsed);
    }

    #[test]
    fn wait_returns_early_when_fired() {
        let stop = StopSignal::new();
        let remote = stop.clone();
        let started = Instant::now();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            remote.fire(StopOrigin::Signal);
        });
        let outcome = stop.wait(Duration::from_secs(30));
        handle.join().unwrap();
        assert_eq!(outcome, WaitOutcome::Stopped(StopOrigin::Signal));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn wait_after_fire_is_immediate() {
        let stop = StopSignal::new();
        stop.request_stop();
        assert_eq!(
            stop.wait(Duration::from_secs(30)),
            WaitOutcome::Stopped(StopOrigin::Requested)
        );
    }

    #[test]
    fn subscribers_are_woken_once() {
        let stop = StopSignal::new();
        let (tx, rx) = mpsc::channel();
        let _sub = stop.subscribe(tx);
        stop.fire(StopOrigin::Signal);
        stop.fire(StopOrigin::Signal);
        assert!(matches!(rx.try_recv(), Ok(Wake::Stop(StopOrigin::Signal))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn late_subscriber_is_woken_immediately() {
        let stop = StopSignal::new();
        stop.request_stop();
        let (tx, rx) = mpsc::channel();
        let _sub = stop.subscribe(tx);
        assert!(matches!(rx.try_recv(), Ok(Wake::Stop(StopOrigin::Requested))));
    }

    #[test]
    fn dropped_subscription_unregisters() {
        let stop = StopSignal::new();
        let (tx, _rx) = mpsc::channel();
        drop(stop.subscribe(tx));
        assert!(stop.lock().subscribers.is_empty());
    }
}
