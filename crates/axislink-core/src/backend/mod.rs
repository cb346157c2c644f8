//! Output backends.
//!
//! A backend owns one transport and knows how to encode a [`Frame`] for it.
//! Scheduling, range mapping and dirty tracking live in the runtime, which
//! drives any backend through the [`OutputBackend`] trait.

#[cfg(feature = "audio")]
pub mod audio;
pub mod device_bus;
mod probe;
pub mod tcp;

use std::time::Duration;

pub use probe::probe;

use crate::axis::Axis;
use crate::cancel::CancelToken;
use crate::encode::Frame;
use crate::error::Result;
use crate::schedule::UpdateMode;

pub trait OutputBackend {
    /// Encoded unit handed from `encode` to `send`
    type Payload;

    /// Short label for log lines
    fn name(&self) -> &str;

    /// Open the transport. Must return promptly once `cancel` fires.
    fn connect(&mut self, cancel: &CancelToken) -> Result<()>;

    /// Release the transport and any per-session state. Safe to call twice.
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Service the transport between ticks (incoming data, device events).
    fn poll(&mut self) -> Result<()> {
        Ok(())
    }

    fn update_mode(&self) -> UpdateMode {
        UpdateMode::Fixed
    }

    /// Axes worth sampling, given the enabled ones.
    fn candidate_axes(&self, enabled: &[Axis]) -> Vec<Axis> {
        enabled.to_vec()
    }

    /// Backend-specific value adjustment applied before dirty tracking.
    fn coerce(&self, _axis: Axis, value: f64) -> f64 {
        value
    }

    /// When false, every candidate axis is encoded on every tick.
    fn send_dirty_only(&self) -> bool {
        true
    }

    fn encode(&self, frame: &Frame<'_>) -> Option<Self::Payload>;

    /// Encode one keyframe move for polled mode.
    fn encode_keyframe(
        &self,
        _axis: Axis,
        _value: f64,
        _duration: Duration,
    ) -> Option<Self::Payload> {
        None
    }

    fn send(&mut self, payload: Self::Payload, cancel: &CancelToken) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::error::Error;

    #[derive(Debug, Default)]
    struct Shared {
        connects: usize,
        disconnects: usize,
        connect_error: Option<String>,
        send_error_after: Option<usize>,
        sent: Vec<Vec<(Axis, f64)>>,
    }

    /// Observable state of a [`MockBackend`], shared with the test body.
    #[derive(Debug, Clone, Default)]
    pub struct MockState(Arc<Mutex<Shared>>);

    impl MockState {
        pub fn fail_connect(&self, message: &str) {
            self.0.lock().unwrap().connect_error = Some(message.to_string());
        }

        /// Fail the send after `count` successful ones.
        pub fn fail_send_after(&self, count: usize) {
            self.0.lock().unwrap().send_error_after = Some(count);
        }

        pub fn connects(&self) -> usize {
            self.0.lock().unwrap().connects
        }

        pub fn disconnects(&self) -> usize {
            self.0.lock().unwrap().disconnects
        }

        pub fn sent(&self) -> Vec<Vec<(Axis, f64)>> {
            self.0.lock().unwrap().sent.clone()
        }
    }

    /// Records encoded samples instead of transmitting them.
    pub struct MockBackend {
        state: MockState,
        connected: bool,
        mode: UpdateMode,
    }

    impl MockBackend {
        pub fn new(state: MockState) -> Self {
            Self {
                state,
                connected: false,
                mode: UpdateMode::Fixed,
            }
        }

        pub fn polled(state: MockState) -> Self {
            Self {
                mode: UpdateMode::Polled,
                ..Self::new(state)
            }
        }
    }

    impl OutputBackend for MockBackend {
        type Payload = Vec<(Axis, f64)>;

        fn name(&self) -> &str {
            "mock"
        }

        fn connect(&mut self, _cancel: &CancelToken) -> Result<()> {
            let mut shared = self.state.0.lock().unwrap();
            shared.connects += 1;
            if let Some(message) = &shared.connect_error {
                return Err(Error::ConnectFailed {
                    endpoint: "mock".into(),
                    message: message.clone(),
                });
            }
            self.connected = true;
            Ok(())
        }

        fn disconnect(&mut self) {
            self.state.0.lock().unwrap().disconnects += 1;
            self.connected = false;
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn update_mode(&self) -> UpdateMode {
            self.mode
        }

        fn encode(&self, frame: &Frame<'_>) -> Option<Self::Payload> {
            let samples: Vec<_> = frame.samples().collect();
            (!samples.is_empty()).then_some(samples)
        }

        fn encode_keyframe(&self, axis: Axis, value: f64, _duration: Duration) -> Option<Self::Payload> {
            Some(vec![(axis, value)])
        }

        fn send(&mut self, payload: Self::Payload, _cancel: &CancelToken) -> Result<()> {
            let mut shared = self.state.0.lock().unwrap();
            if let Some(limit) = shared.send_error_after
                && shared.sent.len() >= limit
            {
                return Err(Error::Transport("connection reset".into()));
            }
            shared.sent.push(payload);
            Ok(())
        }
    }
}
