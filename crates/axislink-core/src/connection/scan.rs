//! Device-bus scan sub-state.
//!
//! Two single-slot gates serialize scan requests: `start` wakes the scan loop
//! when it is idle, `end` stops a running scan. A signal sent to a gate that
//! already holds one is dropped, so repeated toggles and a concurrent
//! "scanning finished" notification can never stack up releases.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::error::Result;

/// How often a blocked gate wait re-checks the cancellation token.
pub const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(50);

struct Gate {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Gate {
    fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self { tx, rx }
    }

    /// Returns false if the slot was already taken.
    fn signal(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) | Err(TrySendError::Disconnected(())) => false,
        }
    }

    fn drain(&self) {
        while self.rx.try_recv().is_ok() {}
    }

    /// Block until signalled; false on cancellation.
    fn wait(&self, cancel: &CancelToken) -> bool {
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            match self.rx.recv_timeout(SCAN_POLL_INTERVAL) {
                Ok(()) => return true,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        }
    }
}

struct Inner {
    start: Gate,
    end: Gate,
    scanning: AtomicBool,
}

#[derive(Clone)]
pub struct ScanGates {
    inner: Arc<Inner>,
}

impl ScanGates {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                start: Gate::new(),
                end: Gate::new(),
                scanning: AtomicBool::new(false),
            }),
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.inner.scanning.load(Ordering::SeqCst)
    }

    /// Stop a running scan, or request a new one.
    pub fn toggle(&self) {
        let released = if self.is_scanning() {
            self.inner.end.signal()
        } else {
            self.inner.start.signal()
        };
        if !released {
            debug!("Scan toggle ignored, gate already signalled");
        }
    }

    /// The server reported the end of discovery.
    pub fn finished(&self) {
        if self.is_scanning() {
            self.inner.end.signal();
        }
    }

    /// Prepare for a new session: no pending signals, first scan pre-armed.
    pub fn arm(&self) {
        self.clear();
        self.inner.start.signal();
    }

    /// Drop pending signals and leave the scanning state.
    pub fn clear(&self) {
        self.inner.start.drain();
        self.inner.end.drain();
        self.inner.scanning.store(false, Ordering::SeqCst);
    }

    /// Run scan cycles until `cancel` fires or a request fails.
    ///
    /// `start_scan` and `stop_scan` issue the discovery requests. A scan that
    /// is interrupted by cancellation is not stopped explicitly; the session
    /// closes the connection instead.
    pub fn run<F, G>(&self, cancel: &CancelToken, mut start_scan: F, mut stop_scan: G) -> Result<()>
    where
        F: FnMut() -> Result<()>,
        G: FnMut() -> Result<()>,
    {
        while self.inner.start.wait(cancel) {
            // An end signal from a previous cycle must not cut this one short.
            self.inner.end.drain();
            // Scanning from the moment the request goes out, so toggles and
            // "finished" while it is in flight land on the end gate.
            self.inner.scanning.store(true, Ordering::SeqCst);
            if let Err(e) = start_scan() {
                self.inner.scanning.store(false, Ordering::SeqCst);
                return Err(e);
            }
            info!("Device scan started");

            let ended = self.inner.end.wait(cancel);
            self.inner.scanning.store(false, Ordering::SeqCst);
            if !ended {
                break;
            }

            stop_scan()?;
            info!("Device scan stopped");
        }

        self.inner.scanning.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl Default for ScanGates {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScanGates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanGates")
            .field("scanning", &self.is_scanning())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Instant;

    fn wait_for(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn spawn_loop(
        gates: &ScanGates,
        cancel: &CancelToken,
        log: &Arc<Mutex<Vec<&'static str>>>,
    ) -> thread::JoinHandle<Result<()>> {
        let gates = gates.clone();
        let cancel = cancel.clone();
        let start_log = Arc::clone(log);
        let stop_log = Arc::clone(log);
        thread::spawn(move || {
            gates.run(
                &cancel,
                move || {
                    start_log.lock().unwrap().push("start");
                    Ok(())
                },
                move || {
                    stop_log.lock().unwrap().push("stop");
                    Ok(())
                },
            )
        })
    }

    #[test]
    fn test_armed_gates_start_first_scan() {
        let gates = ScanGates::new();
        gates.arm();
        let cancel = CancelToken::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handle = spawn_loop(&gates, &cancel, &log);

        wait_for(|| gates.is_scanning());
        gates.toggle();
        wait_for(|| log.lock().unwrap().len() == 2);
        assert!(!gates.is_scanning());

        cancel.cancel();
        handle.join().unwrap().unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["start", "stop"]);
    }

    #[test]
    fn test_scan_finished_ends_scan() {
        let gates = ScanGates::new();
        gates.arm();
        let cancel = CancelToken::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handle = spawn_loop(&gates, &cancel, &log);

        wait_for(|| gates.is_scanning());
        gates.finished();
        wait_for(|| log.lock().unwrap().len() == 2);

        cancel.cancel();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_toggle_while_start_in_flight_stops_scan() {
        let gates = ScanGates::new();
        gates.arm();
        let cancel = CancelToken::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (entered_tx, entered_rx) = bounded(4);
        let (release_tx, release_rx) = bounded::<()>(1);

        let handle = {
            let gates = gates.clone();
            let cancel = cancel.clone();
            let start_log = Arc::clone(&log);
            let stop_log = Arc::clone(&log);
            thread::spawn(move || {
                gates.run(
                    &cancel,
                    move || {
                        let _ = entered_tx.send(());
                        let _ = release_rx.recv_timeout(Duration::from_secs(2));
                        start_log.lock().unwrap().push("start");
                        Ok(())
                    },
                    move || {
                        stop_log.lock().unwrap().push("stop");
                        Ok(())
                    },
                )
            })
        };

        entered_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(gates.is_scanning());
        gates.toggle();
        release_tx.send(()).unwrap();

        wait_for(|| log.lock().unwrap().len() == 2);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(*log.lock().unwrap(), vec!["start", "stop"]);
        assert!(gates.inner.start.rx.is_empty());
        assert!(!gates.is_scanning());

        cancel.cancel();
        handle.join().unwrap().unwrap();
    }

    #[test]
    fn test_failed_start_leaves_scanning_state() {
        let gates = ScanGates::new();
        gates.arm();
        let result = gates.run(
            &CancelToken::new(),
            || Err(crate::error::Error::Transport("closed".into())),
            || Ok(()),
        );
        assert!(result.is_err());
        assert!(!gates.is_scanning());
    }

    #[test]
    fn test_finished_while_idle_is_ignored() {
        let gates = ScanGates::new();
        gates.finished();
        assert!(gates.inner.end.rx.is_empty());
    }

    #[test]
    fn test_double_toggle_and_finished_never_double_release() {
        let gates = ScanGates::new();
        gates.inner.scanning.store(true, Ordering::SeqCst);

        gates.toggle();
        gates.toggle();
        gates.finished();
        assert_eq!(gates.inner.end.rx.len(), 1);
        assert!(gates.inner.start.rx.is_empty());

        gates.inner.scanning.store(false, Ordering::SeqCst);
        gates.toggle();
        gates.toggle();
        assert_eq!(gates.inner.start.rx.len(), 1);
    }

    #[test]
    fn test_rapid_toggles_race_with_finished_without_deadlock() {
        let gates = ScanGates::new();
        gates.arm();
        let cancel = CancelToken::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handle = spawn_loop(&gates, &cancel, &log);

        let togglers: Vec<_> = (0..4)
            .map(|i| {
                let gates = gates.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        if i % 2 == 0 {
                            gates.toggle();
                        } else {
                            gates.finished();
                        }
                        thread::sleep(Duration::from_millis(1));
                    }
                })
            })
            .collect();
        for toggler in togglers {
            toggler.join().unwrap();
        }

        cancel.cancel();
        handle.join().unwrap().unwrap();
        assert!(gates.inner.start.rx.len() <= 1);
        assert!(gates.inner.end.rx.len() <= 1);
        assert!(!gates.is_scanning());
    }

    #[test]
    fn test_cancel_while_waiting_for_start() {
        let gates = ScanGates::new();
        let cancel = CancelToken::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handle = spawn_loop(&gates, &cancel, &log);

        thread::sleep(Duration::from_millis(20));
        cancel.cancel();
        handle.join().unwrap().unwrap();
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_clear_resets_state() {
        let gates = ScanGates::new();
        gates.arm();
        gates.inner.scanning.store(true, Ordering::SeqCst);
        gates.inner.end.signal();
        gates.clear();
        assert!(!gates.is_scanning());
        assert!(gates.inner.start.rx.is_empty());
        assert!(gates.inner.end.rx.is_empty());
    }
}
