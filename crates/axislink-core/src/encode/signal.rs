use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use super::{Frame, ProtocolEncoder};
use crate::mapping::DeviceAxisMappedValue;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    EnumIter,
    EnumString,
    Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Waveform {
    #[default]
    Sine,
    Square,
    Triangle,
    Sawtooth,
}

/// State read by the audio callback; replaced wholesale every tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalParameters {
    pub waveform: Waveform,
    pub frequency: f64,
    pub amplitude: f64,
    /// -1 (left) .. 1 (right)
    pub balance: f64,
}

impl Default for SignalParameters {
    fn default() -> Self {
        Self {
            waveform: Waveform::Sine,
            frequency: 200.0,
            amplitude: 1.0,
            balance: 0.0,
        }
    }
}

/// Maps axis values onto continuous waveform parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalEncoder {
    pub waveform: Waveform,
    pub frequency: DeviceAxisMappedValue,
    pub amplitude: DeviceAxisMappedValue,
    pub balance: DeviceAxisMappedValue,
}

impl Default for SignalEncoder {
    fn default() -> Self {
        Self {
            waveform: Waveform::Sine,
            frequency: DeviceAxisMappedValue::new(100.0, 440.0, 200.0),
            amplitude: DeviceAxisMappedValue::new(0.0, 1.0, 1.0),
            balance: DeviceAxisMappedValue::new(-1.0, 1.0, 0.0),
        }
    }
}

impl SignalEncoder {
    /// Parameters before any axis value is known
    pub fn initial(&self) -> SignalParameters {
        SignalParameters {
            waveform: self.waveform,
            frequency: self.frequency.value(),
            amplitude: self.amplitude.value(),
            balance: self.balance.value(),
        }
    }
}

impl ProtocolEncoder for SignalEncoder {
    /// Parameters of the previous tick; unknown axes keep them
    type Context = SignalParameters;
    type Output = SignalParameters;

    fn encode(&self, frame: &Frame<'_>, previous: &SignalParameters) -> SignalParameters {
        SignalParameters {
            waveform: self.waveform,
            frequency: self.frequency.evaluate(frame.values, previous.frequency),
            amplitude: self.amplitude.evaluate(frame.values, previous.amplitude),
            balance: self.balance.evaluate(frame.values, previous.balance),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::{Axis, AxisValues};
    use std::time::Duration;

    #[test]
    fn test_maps_bound_axes() {
        let encoder = SignalEncoder {
            waveform: Waveform::Square,
            frequency: DeviceAxisMappedValue::new(100.0, 440.0, 200.0).with_axis(Axis::L0),
            amplitude: DeviceAxisMappedValue::new(0.0, 1.0, 1.0).with_axis(Axis::V0),
            balance: DeviceAxisMappedValue::new(-1.0, 1.0, 0.0),
        };
        let mut values = AxisValues::unknown();
        values[Axis::L0] = 0.5;
        values[Axis::V0] = 0.25;

        let frame = Frame {
            values: &values,
            axes: &[],
            elapsed: Duration::from_millis(10),
            interval: Duration::from_millis(10),
        };
        let params = encoder.encode(&frame, &encoder.initial());
        assert_eq!(params.waveform, Waveform::Square);
        assert_eq!(params.frequency, 270.0);
        assert_eq!(params.amplitude, 0.25);
        assert_eq!(params.balance, 0.0);
    }

    #[test]
    fn test_unknown_axis_keeps_previous() {
        let encoder = SignalEncoder {
            frequency: DeviceAxisMappedValue::new(100.0, 440.0, 200.0).with_axis(Axis::L0),
            ..Default::default()
        };
        let values = AxisValues::unknown();
        let frame = Frame {
            values: &values,
            axes: &[],
            elapsed: Duration::ZERO,
            interval: Duration::from_millis(10),
        };
        let previous = SignalParameters {
            frequency: 333.0,
            ..Default::default()
        };
        assert_eq!(encoder.encode(&frame, &previous).frequency, 333.0);
    }

    #[test]
    fn test_waveform_names() {
        assert_eq!("sawtooth".parse::<Waveform>().unwrap(), Waveform::Sawtooth);
        assert_eq!(Waveform::Triangle.to_string(), "triangle");
    }
}
