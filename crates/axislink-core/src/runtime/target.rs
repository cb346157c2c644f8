use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use tracing::{debug, warn};

use super::{OutputTargetRuntime, RuntimeSettings, ValueSources};
use crate::backend::OutputBackend;
use crate::backend::device_bus::DeviceBusBackend;
use crate::backend::tcp::TcpBackend;
use crate::cancel::CancelToken;
use crate::config::{BackendConfig, TargetConfig};
use crate::connection::{
    ConnectionManager, ConnectionStatus, EventSink, ScanGates, StatusCell, TargetEvent,
};
use crate::error::{Error, Result};
use crate::schedule::{UpdateMode, UpdateRate};

struct SessionHandle {
    cancel: CancelToken,
    thread: JoinHandle<()>,
}

/// Controller handle for one configured output target.
///
/// Each connect starts a fresh session on its own named thread; the backend
/// is built on that thread, so it never has to be `Send`.
pub struct OutputTarget {
    config: TargetConfig,
    sources: ValueSources,
    status: StatusCell,
    update_rate: UpdateRate,
    scan: ScanGates,
    events: Option<Sender<TargetEvent>>,
    session: Option<SessionHandle>,
}

impl OutputTarget {
    pub fn new(config: TargetConfig, sources: ValueSources) -> Self {
        let update_rate = UpdateRate::new(config.backend.update_rate());
        Self {
            config,
            sources,
            status: StatusCell::new(),
            update_rate,
            scan: ScanGates::new(),
            events: None,
            session: None,
        }
    }

    pub fn with_events(mut self, sender: Sender<TargetEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &TargetConfig {
        &self.config
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    /// Readable from any thread.
    pub fn status_cell(&self) -> StatusCell {
        self.status.clone()
    }

    /// Live update rate; changes apply from the next tick.
    pub fn update_rate(&self) -> &UpdateRate {
        &self.update_rate
    }

    /// Whether a session thread is still alive.
    pub fn is_running(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| !session.thread.is_finished())
    }

    /// Start a new session, first tearing down any session in flight.
    ///
    /// Configuration errors are returned here and never reach the session
    /// thread; connect failures are reported through the event channel.
    pub fn connect(&mut self, cancel: &CancelToken) -> Result<()> {
        self.config.backend.validate()?;
        if self.config.backend.update_mode() == UpdateMode::Polled
            && self.sources.keyframes.is_none()
        {
            return Err(Error::InvalidConfig(format!(
                "target \"{}\" uses polled updates but no keyframe source is available",
                self.config.name
            )));
        }

        self.disconnect();

        let session_cancel = cancel.child();
        let thread = self.spawn_session(session_cancel.clone())?;
        self.session = Some(SessionHandle {
            cancel: session_cancel,
            thread,
        });
        Ok(())
    }

    /// Cancel the running session and wait for its teardown.
    pub fn disconnect(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        session.cancel.cancel();
        if session.thread.join().is_err() {
            warn!("{}: session thread panicked", self.config.name);
            self.status.set(ConnectionStatus::Disconnected);
        }
    }

    /// Connect when disconnected, disconnect when connected; ignored while
    /// a transition is in progress.
    pub fn toggle_connect(&mut self, cancel: &CancelToken) -> Result<()> {
        match self.status.get() {
            ConnectionStatus::Disconnected => self.connect(cancel),
            ConnectionStatus::Connected => {
                self.disconnect();
                Ok(())
            }
            status => {
                debug!("{}: toggle ignored while {}", self.config.name, status);
                Ok(())
            }
        }
    }

    /// Toggle device discovery; false when this target cannot scan right now.
    pub fn toggle_scan(&self) -> bool {
        if !matches!(self.config.backend, BackendConfig::DeviceBus(_))
            || self.status.get() != ConnectionStatus::Connected
        {
            return false;
        }
        self.scan.toggle();
        true
    }

    pub fn is_scanning(&self) -> bool {
        self.scan.is_scanning()
    }

    fn spawn_session(&self, cancel: CancelToken) -> Result<JoinHandle<()>> {
        let name = self.config.name.clone();
        let backend_config = self.config.backend.clone();
        let settings = RuntimeSettings {
            update_rate: self.update_rate.clone(),
            axes: backend_config.axes().clone(),
        };
        let sources = self.sources.clone();
        let events = EventSink::new(name.clone(), self.events.clone());
        let manager = ConnectionManager::new(self.status.clone(), events.clone());
        let scan = self.scan.clone();

        let thread = thread::Builder::new()
            .name(format!("target-{}", name))
            .spawn(move || match backend_config {
                BackendConfig::Tcp(config) => {
                    run_session(TcpBackend::new(config), settings, sources, manager, &cancel)
                }
                BackendConfig::DeviceBus(config) => run_session(
                    DeviceBusBackend::new(config, scan, events),
                    settings,
                    sources,
                    manager,
                    &cancel,
                ),
                #[cfg(feature = "audio")]
                BackendConfig::Audio(config) => run_session(
                    crate::backend::audio::AudioBackend::new(config),
                    settings,
                    sources,
                    manager,
                    &cancel,
                ),
                #[cfg(not(feature = "audio"))]
                BackendConfig::Audio(_) => manager.report_failure(&Error::InvalidConfig(
                    "audio output is not available in this build".into(),
                )),
            })?;
        Ok(thread)
    }
}

fn run_session<B: OutputBackend>(
    backend: B,
    settings: RuntimeSettings,
    sources: ValueSources,
    manager: ConnectionManager,
    cancel: &CancelToken,
) {
    let mut runtime = OutputTargetRuntime::new(backend, settings, sources, manager);
    // Failures were already reported by the runtime.
    let _ = runtime.run(cancel);
}

impl Drop for OutputTarget {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for OutputTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputTarget")
            .field("name", &self.config.name)
            .field("kind", &self.config.backend.kind())
            .field("status", &self.status.get())
            .finish()
    }
}
