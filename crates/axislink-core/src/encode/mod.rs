//! Wire encoders, one per backend kind.
//!
//! Encoders are pure: they read a [`Frame`] plus backend context and return a
//! payload. They never touch a transport, so one encoder can serve any number
//! of devices in a tick.

mod device_bus;
mod signal;
mod tcode;

use std::time::Duration;

pub use device_bus::{CommandPayload, DeviceBinding, DeviceBusEncoder, DeviceCommand, rotation};
pub use signal::{SignalEncoder, SignalParameters, Waveform};
pub use tcode::{DEFAULT_PRECISION, TCodeEncoder};

use crate::axis::{Axis, AxisValues};

/// Values selected for transmission in one tick.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    /// Tick-local values, already range-mapped
    pub values: &'a AxisValues,
    /// Axes to transmit (enabled, and dirty when the backend filters)
    pub axes: &'a [Axis],
    /// Time since the previous tick
    pub elapsed: Duration,
    /// Current scheduling interval
    pub interval: Duration,
}

impl<'a> Frame<'a> {
    /// `(axis, value)` pairs with finite values, in axis order.
    pub fn samples(&self) -> impl Iterator<Item = (Axis, f64)> + '_ {
        self.axes
            .iter()
            .map(|axis| (*axis, self.values[*axis]))
            .filter(|(_, value)| value.is_finite())
    }
}

/// Shared contract of the backend encoders.
pub trait ProtocolEncoder {
    /// Backend state the encoding depends on (device registry, previous parameters)
    type Context: ?Sized;
    type Output;

    fn encode(&self, frame: &Frame<'_>, context: &Self::Context) -> Self::Output;
}
