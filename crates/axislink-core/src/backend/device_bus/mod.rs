//! Device-bus backend.
//!
//! Commands for one tick are fanned out to every addressed device and awaited
//! together with a deadline of one tick interval. A device that fails or
//! answers late is logged and skipped; it never holds up the others.

mod client;
pub mod protocol;

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

pub use client::{DeviceBusClient, REQUEST_TIMEOUT, Ticket};

use self::protocol::ClientMessage::{StartScanning, StopScanning};
use super::OutputBackend;
use crate::axis::Axis;
use crate::cancel::CancelToken;
use crate::config::DeviceBusConfig;
use crate::connection::{EventSink, ScanGates, TargetEventKind};
use crate::devices::{DeviceEvent, DeviceRegistry};
use crate::dirty::DIRTY_EPSILON;
use crate::encode::{DeviceBusEncoder, DeviceCommand, Frame, ProtocolEncoder};
use crate::error::{Error, Result};

/// Transport for individual device commands.
pub trait CommandSink {
    type Ticket;

    /// Start delivery without waiting for the outcome.
    fn submit(&self, command: &DeviceCommand) -> Result<Self::Ticket>;

    /// Wait for the outcome of a submitted command until `deadline`.
    fn settle(&self, ticket: Self::Ticket, deadline: Instant) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct FanOutReport {
    pub delivered: usize,
    pub failures: Vec<Error>,
}

/// Submit every command, then wait for all of them until `deadline`.
///
/// Failures are collected per device and logged, never propagated.
pub fn fan_out<S>(sink: &S, commands: &[DeviceCommand], deadline: Instant) -> FanOutReport
where
    S: CommandSink + ?Sized,
{
    let submitted: Vec<_> = commands
        .iter()
        .map(|command| (command, sink.submit(command)))
        .collect();

    let mut report = FanOutReport::default();
    for (command, ticket) in submitted {
        match ticket.and_then(|ticket| sink.settle(ticket, deadline)) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                debug!(
                    "{} command to \"{}\" ({}) failed: {}",
                    command.payload.command_type(),
                    command.device_name,
                    command.device_index,
                    e
                );
                report.failures.push(Error::Device {
                    device: command.device_name.clone(),
                    message: e.to_string(),
                });
            }
        }
    }
    report
}

/// Commands of one tick plus the time they may take.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceBatch {
    pub commands: Vec<DeviceCommand>,
    pub timeout: Duration,
}

struct Session {
    client: Arc<DeviceBusClient>,
    cancel: CancelToken,
    scan_thread: Option<JoinHandle<()>>,
}

pub struct DeviceBusBackend {
    config: DeviceBusConfig,
    encoder: DeviceBusEncoder,
    registry: DeviceRegistry,
    scan: ScanGates,
    events: EventSink,
    label: String,
    reported_scanning: bool,
    session: Option<Session>,
}

impl DeviceBusBackend {
    pub fn new(config: DeviceBusConfig, scan: ScanGates, events: EventSink) -> Self {
        let encoder = DeviceBusEncoder::new(config.bindings.clone());
        let label = format!("device bus {}", config.endpoint);
        Self {
            config,
            encoder,
            registry: DeviceRegistry::new(),
            scan,
            events,
            label,
            reported_scanning: false,
            session: None,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    fn apply(&mut self, event: &DeviceEvent) {
        match event {
            DeviceEvent::Added(device) => {
                info!("Device added: \"{}\" ({})", device.name, device.index);
            }
            DeviceEvent::Removed(index) => {
                let name = self.registry.get(*index).map(|d| d.name.as_str());
                info!("Device removed: \"{}\" ({})", name.unwrap_or("?"), index);
            }
            DeviceEvent::ScanningFinished => {
                debug!("Server finished scanning");
                self.scan.finished();
            }
        }

        if self.registry.apply(event) {
            self.events
                .emit(TargetEventKind::DevicesChanged(self.registry.len()));
        }
    }

    fn report_scanning(&mut self) {
        let scanning = self.scan.is_scanning();
        if scanning != self.reported_scanning {
            self.reported_scanning = scanning;
            self.events.emit(TargetEventKind::ScanningChanged(scanning));
        }
    }

    fn spawn_scan_loop(
        &self,
        client: Arc<DeviceBusClient>,
        cancel: CancelToken,
    ) -> Result<JoinHandle<()>> {
        let gates = self.scan.clone();
        let thread = thread::Builder::new()
            .name("device-bus-scan".into())
            .spawn(move || {
                let start = || client.request(|id| StartScanning { id }, REQUEST_TIMEOUT, &cancel);
                let stop = || client.request(|id| StopScanning { id }, REQUEST_TIMEOUT, &cancel);
                let result = gates.run(&cancel, start, stop);
                match result {
                    Ok(()) => {}
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => warn!("Device scan stopped: {}", e),
                }
            })?;
        Ok(thread)
    }
}

impl OutputBackend for DeviceBusBackend {
    type Payload = DeviceBatch;

    fn name(&self) -> &str {
        &self.label
    }

    fn connect(&mut self, cancel: &CancelToken) -> Result<()> {
        info!("Connecting to device bus at {}", self.config.endpoint);
        let session_cancel = cancel.child();
        let client = Arc::new(DeviceBusClient::connect(
            &self.config.endpoint,
            &self.config.client_name,
            &session_cancel,
        )?);

        self.registry.clear();
        self.scan.arm();
        let scan_thread = self.spawn_scan_loop(Arc::clone(&client), session_cancel.clone())?;

        self.session = Some(Session {
            client,
            cancel: session_cancel,
            scan_thread: Some(scan_thread),
        });
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.cancel.cancel();
            if let Some(thread) = session.scan_thread.take()
                && thread.join().is_err()
            {
                warn!("Device scan thread panicked");
            }
            session.client.close();
        }

        if !self.registry.is_empty() {
            self.registry.clear();
            self.events.emit(TargetEventKind::DevicesChanged(0));
        }
        self.scan.clear();
        self.report_scanning();
    }

    fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.client.is_alive())
    }

    /// Apply discovery events received since the last tick.
    fn poll(&mut self) -> Result<()> {
        let Some(session) = &self.session else {
            return Err(Error::Transport("not connected".into()));
        };
        if !session.client.is_alive() {
            return Err(session.client.failure());
        }

        let events: Vec<DeviceEvent> = session.client.events().try_iter().collect();
        for event in &events {
            self.apply(event);
        }
        self.report_scanning();
        Ok(())
    }

    fn candidate_axes(&self, enabled: &[Axis]) -> Vec<Axis> {
        self.encoder
            .bound_axes()
            .into_iter()
            .filter(|axis| enabled.contains(axis))
            .collect()
    }

    /// Values too small to feel are sent as a clean stop.
    fn coerce(&self, _axis: Axis, value: f64) -> f64 {
        if value < DIRTY_EPSILON { 0.0 } else { value }
    }

    fn encode(&self, frame: &Frame<'_>) -> Option<DeviceBatch> {
        let commands = self.encoder.encode(frame, &self.registry);
        (!commands.is_empty()).then(|| DeviceBatch {
            commands,
            timeout: frame.interval,
        })
    }

    fn send(&mut self, batch: DeviceBatch, _cancel: &CancelToken) -> Result<()> {
        let Some(session) = &self.session else {
            return Err(Error::Transport("not connected".into()));
        };

        let report = fan_out(
            session.client.as_ref(),
            &batch.commands,
            Instant::now() + batch.timeout,
        );
        if !report.failures.is_empty() {
            debug!(
                "Delivered {}/{} device commands",
                report.delivered,
                batch.commands.len()
            );
        }

        if !session.client.is_alive() {
            return Err(session.client.failure());
        }
        Ok(())
    }
}
