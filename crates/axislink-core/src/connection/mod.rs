//! Connection lifecycle of one output target.
//!
//! Status moves `Disconnected -> Connecting -> Connected -> Disconnecting ->
//! Disconnected`. A failed or cancelled connect goes straight from
//! `Connecting` back to `Disconnected` after the backend has released what it
//! opened. Every transition is published through a [`StatusCell`] that any
//! thread can read, and as a [`TargetEvent`] when a sender is attached.

mod scan;

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crossbeam_channel::Sender;
use strum::{Display, FromRepr, IntoStaticStr};
use tracing::{error, info};

pub use scan::{SCAN_POLL_INTERVAL, ScanGates};

use crate::backend::OutputBackend;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, IntoStaticStr, FromRepr)]
#[repr(u8)]
pub enum ConnectionStatus {
    #[default]
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Disconnecting = 3,
}

impl ConnectionStatus {
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }

    /// Whether a connect or disconnect request may be issued in this state.
    pub fn can_toggle_connect(self) -> bool {
        !self.is_transient()
    }
}

/// Shared, lock-free view of a target's [`ConnectionStatus`].
#[derive(Debug, Clone, Default)]
pub struct StatusCell(Arc<AtomicU8>);

impl StatusCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> ConnectionStatus {
        ConnectionStatus::from_repr(self.0.load(Ordering::Acquire)).unwrap_or_default()
    }

    pub(crate) fn set(&self, status: ConnectionStatus) {
        self.0.store(status as u8, Ordering::Release);
    }

    pub fn can_toggle_connect(&self) -> bool {
        self.get().can_toggle_connect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TargetEventKind {
    StatusChanged(ConnectionStatus),
    /// Connect or runtime failure, reported once per session
    Failed { message: String },
    /// Number of devices currently known to a device-bus session
    DevicesChanged(usize),
    ScanningChanged(bool),
}

/// Notification from a target thread to whoever drives the targets.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetEvent {
    pub target: String,
    pub kind: TargetEventKind,
}

/// Named sender half for [`TargetEvent`]s; a missing receiver is not an error.
#[derive(Debug, Clone)]
pub struct EventSink {
    target: String,
    sender: Option<Sender<TargetEvent>>,
}

impl EventSink {
    pub fn new(target: impl Into<String>, sender: Option<Sender<TargetEvent>>) -> Self {
        Self {
            target: target.into(),
            sender,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn emit(&self, kind: TargetEventKind) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(TargetEvent {
                target: self.target.clone(),
                kind,
            });
        }
    }
}

/// Drives a backend through the status state machine.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    status: StatusCell,
    events: EventSink,
}

impl ConnectionManager {
    pub fn new(status: StatusCell, events: EventSink) -> Self {
        Self { status, events }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    /// Open the backend; on failure or cancellation its partial state is released.
    pub fn connect<B: OutputBackend>(&self, backend: &mut B, cancel: &CancelToken) -> Result<()> {
        self.transition(ConnectionStatus::Connecting);

        let result = if cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            backend.connect(cancel)
        };

        match result {
            Ok(()) => {
                self.transition(ConnectionStatus::Connected);
                Ok(())
            }
            Err(e) => {
                backend.disconnect();
                self.transition(ConnectionStatus::Disconnected);
                Err(e)
            }
        }
    }

    /// Release the backend.
    pub fn teardown<B: OutputBackend>(&self, backend: &mut B) {
        self.transition(ConnectionStatus::Disconnecting);
        backend.disconnect();
        self.transition(ConnectionStatus::Disconnected);
    }

    /// Surface a failure to the event stream; cancellation is not a failure.
    pub fn report_failure(&self, error: &Error) {
        if error.is_cancelled() {
            return;
        }
        error!("{}: {}", self.events.target(), error);
        self.events.emit(TargetEventKind::Failed {
            message: error.to_string(),
        });
    }

    fn transition(&self, status: ConnectionStatus) {
        self.status.set(status);
        info!("{}: {}", self.events.target(), status);
        self.events.emit(TargetEventKind::StatusChanged(status));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{MockBackend, MockState};

    fn manager() -> (ConnectionManager, crossbeam_channel::Receiver<TargetEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (
            ConnectionManager::new(StatusCell::new(), EventSink::new("mock", Some(tx))),
            rx,
        )
    }

    fn statuses(rx: &crossbeam_channel::Receiver<TargetEvent>) -> Vec<ConnectionStatus> {
        rx.try_iter()
            .filter_map(|e| match e.kind {
                TargetEventKind::StatusChanged(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_can_toggle_connect() {
        assert!(ConnectionStatus::Disconnected.can_toggle_connect());
        assert!(ConnectionStatus::Connected.can_toggle_connect());
        assert!(!ConnectionStatus::Connecting.can_toggle_connect());
        assert!(!ConnectionStatus::Disconnecting.can_toggle_connect());
    }

    #[test]
    fn test_connect_then_teardown_visits_every_state() {
        let (manager, rx) = manager();
        let state = MockState::default();
        let mut backend = MockBackend::new(state.clone());

        manager.connect(&mut backend, &CancelToken::new()).unwrap();
        assert_eq!(manager.status(), ConnectionStatus::Connected);
        manager.teardown(&mut backend);

        assert_eq!(
            statuses(&rx),
            vec![
                ConnectionStatus::Connecting,
                ConnectionStatus::Connected,
                ConnectionStatus::Disconnecting,
                ConnectionStatus::Disconnected,
            ]
        );
        assert_eq!(state.disconnects(), 1);
    }

    #[test]
    fn test_failed_connect_releases_and_returns_to_disconnected() {
        let (manager, rx) = manager();
        let state = MockState::default();
        state.fail_connect("refused");
        let mut backend = MockBackend::new(state.clone());

        let err = manager.connect(&mut backend, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, Error::ConnectFailed { .. }));
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(state.disconnects(), 1);
        assert_eq!(
            statuses(&rx),
            vec![ConnectionStatus::Connecting, ConnectionStatus::Disconnected]
        );
    }

    #[test]
    fn test_cancelled_connect_never_reaches_backend() {
        let (manager, rx) = manager();
        let state = MockState::default();
        let mut backend = MockBackend::new(state.clone());
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = manager.connect(&mut backend, &cancel).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(state.connects(), 0);
        assert_eq!(
            statuses(&rx),
            vec![ConnectionStatus::Connecting, ConnectionStatus::Disconnected]
        );
    }

    #[test]
    fn test_report_failure_skips_cancellation() {
        let (manager, rx) = manager();
        manager.report_failure(&Error::Cancelled);
        manager.report_failure(&Error::Transport("reset".into()));
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].kind,
            TargetEventKind::Failed {
                message: "Transport failure: reset".into()
            }
        );
    }

    #[test]
    fn test_status_cell_is_shared() {
        let cell = StatusCell::new();
        let view = cell.clone();
        cell.set(ConnectionStatus::Connecting);
        assert_eq!(view.get(), ConnectionStatus::Connecting);
        assert!(!view.can_toggle_connect());
    }
}
