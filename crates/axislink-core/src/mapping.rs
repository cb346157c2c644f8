use serde::{Deserialize, Serialize};

use crate::axis::{Axis, AxisValues, map_range};

/// Maps an axis sample into an arbitrary output range.
///
/// `value_from <= value_to` holds after every mutation: moving one bound past
/// the other drags the other bound along instead of failing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "MappedValueRepr", into = "MappedValueRepr")]
pub struct DeviceAxisMappedValue {
    axis: Option<Axis>,
    value: f64,
    value_from: f64,
    value_to: f64,
}

impl DeviceAxisMappedValue {
    pub fn new(value_from: f64, value_to: f64, value: f64) -> Self {
        let mut mapped = Self {
            axis: None,
            value,
            value_from,
            value_to: value_from,
        };
        mapped.set_value_to(value_to);
        mapped
    }

    pub fn with_axis(mut self, axis: Axis) -> Self {
        self.axis = Some(axis);
        self
    }

    pub fn axis(&self) -> Option<Axis> {
        self.axis
    }

    pub fn set_axis(&mut self, axis: Option<Axis>) {
        self.axis = axis;
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn set_value(&mut self, value: f64) {
        self.value = value;
    }

    pub fn value_from(&self) -> f64 {
        self.value_from
    }

    pub fn value_to(&self) -> f64 {
        self.value_to
    }

    pub fn set_value_from(&mut self, value_from: f64) {
        self.value_from = value_from;
        if self.value_from > self.value_to {
            self.value_to = self.value_from;
        }
    }

    pub fn set_value_to(&mut self, value_to: f64) {
        self.value_to = value_to;
        if self.value_to < self.value_from {
            self.value_from = self.value_to;
        }
    }

    /// Compute the mapped value for this tick and remember it.
    ///
    /// With a bound axis, the axis sample is mapped from `[0, 1]` into the range;
    /// an unknown sample keeps the previous value. Without an axis, the stored
    /// value is clamped into the range.
    pub fn map(&mut self, values: &AxisValues) -> f64 {
        self.value = self.evaluate(values, self.value);
        self.value
    }

    /// Same as [`map`](Self::map) but with an explicit fallback and no state change.
    pub fn evaluate(&self, values: &AxisValues, fallback: f64) -> f64 {
        let (from, to) = (self.value_from, self.value_to);
        match self.axis {
            Some(axis) if values[axis].is_finite() => {
                map_range(values[axis].clamp(0.0, 1.0), 0.0, 1.0, from, to)
            }
            _ if fallback.is_finite() => fallback.clamp(from, to),
            _ => from,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct MappedValueRepr {
    #[serde(default)]
    axis: Option<Axis>,
    value: f64,
    value_from: f64,
    value_to: f64,
}

impl From<MappedValueRepr> for DeviceAxisMappedValue {
    fn from(repr: MappedValueRepr) -> Self {
        let mut mapped = Self::new(repr.value_from, repr.value_to, repr.value);
        mapped.axis = repr.axis;
        mapped
    }
}

impl From<DeviceAxisMappedValue> for MappedValueRepr {
    fn from(mapped: DeviceAxisMappedValue) -> Self {
        Self {
            axis: mapped.axis,
            value: mapped.value,
            value_from: mapped.value_from,
            value_to: mapped.value_to,
        }
    }
}
