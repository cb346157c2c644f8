//! Control axes and per-axis values.
//!
//! The axis set is closed and shared by every backend. Values are `f64`
//! samples in `[0, 1]`; NaN means "no data yet".

use std::collections::BTreeMap;
use std::ops::{Index, IndexMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, FromRepr, IntoEnumIterator, IntoStaticStr};

/// One independently controlled output dimension (TCode naming).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumIter,
    EnumString,
    FromRepr,
    IntoStaticStr,
    Display,
)]
#[repr(u8)]
pub enum Axis {
    L0 = 0,
    L1 = 1,
    L2 = 2,
    R0 = 3,
    R1 = 4,
    R2 = 5,
    V0 = 6,
    V1 = 7,
    A0 = 8,
    A1 = 9,
    A2 = 10,
}

impl Axis {
    pub const COUNT: usize = 11;

    pub fn all() -> impl Iterator<Item = Axis> {
        Self::iter()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn code(self) -> &'static str {
        self.into()
    }

    /// Rest position sent when a device should go idle
    pub fn default_value(self) -> f64 {
        match self {
            Self::L0 | Self::L1 | Self::L2 | Self::R0 | Self::R1 | Self::R2 => 0.5,
            Self::V0 | Self::V1 | Self::A0 | Self::A1 | Self::A2 => 0.0,
        }
    }

    pub fn friendly_name(self) -> &'static str {
        match self {
            Self::L0 => "Up/Down",
            Self::L1 => "Forward/Backward",
            Self::L2 => "Left/Right",
            Self::R0 => "Twist",
            Self::R1 => "Roll",
            Self::R2 => "Pitch",
            Self::V0 => "Vibrate",
            Self::V1 => "Pump",
            Self::A0 => "Valve",
            Self::A1 => "Suck",
            Self::A2 => "Lube",
        }
    }
}

/// Tick-local copy of every axis value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisValues([f64; Axis::COUNT]);

impl AxisValues {
    /// All axes set to "no data yet"
    pub fn unknown() -> Self {
        Self([f64::NAN; Axis::COUNT])
    }

    pub fn rest() -> Self {
        let mut values = Self::unknown();
        for axis in Axis::all() {
            values[axis] = axis.default_value();
        }
        values
    }

    /// Copy the provider's current values into a new buffer.
    pub fn read_from<P: AxisValueProvider + ?Sized>(provider: &P) -> Self {
        let mut values = Self::unknown();
        values.refresh(provider);
        values
    }

    pub fn refresh<P: AxisValueProvider + ?Sized>(&mut self, provider: &P) {
        for axis in Axis::all() {
            self[axis] = provider.value(axis);
        }
    }

    pub fn get(&self, axis: Axis) -> f64 {
        self.0[axis.index()]
    }

    pub fn set(&mut self, axis: Axis, value: f64) {
        self.0[axis.index()] = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = (Axis, f64)> + '_ {
        Axis::all().map(|axis| (axis, self.get(axis)))
    }
}

impl Default for AxisValues {
    fn default() -> Self {
        Self::unknown()
    }
}

impl Index<Axis> for AxisValues {
    type Output = f64;

    fn index(&self, axis: Axis) -> &f64 {
        &self.0[axis.index()]
    }
}

impl IndexMut<Axis> for AxisValues {
    fn index_mut(&mut self, axis: Axis) -> &mut f64 {
        &mut self.0[axis.index()]
    }
}

/// Supplies the current target value of each axis.
///
/// Implementations are read from every backend thread once per tick, so
/// `value` must be cheap and must not block.
pub trait AxisValueProvider: Send + Sync {
    /// Current value in `[0, 1]`, or NaN if unknown.
    fn value(&self, axis: Axis) -> f64;
}

impl<P: AxisValueProvider + ?Sized> AxisValueProvider for Arc<P> {
    fn value(&self, axis: Axis) -> f64 {
        (**self).value(axis)
    }
}

/// Lock-free value store that many backends can read while one writer updates it.
#[derive(Clone)]
pub struct SharedAxisValues {
    slots: Arc<[AtomicU64; Axis::COUNT]>,
}

impl SharedAxisValues {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(std::array::from_fn(|_| AtomicU64::new(f64::NAN.to_bits()))),
        }
    }

    pub fn set(&self, axis: Axis, value: f64) {
        self.slots[axis.index()].store(value.to_bits(), Ordering::Release);
    }

    pub fn set_all(&self, values: &AxisValues) {
        for (axis, value) in values.iter() {
            self.set(axis, value);
        }
    }

    pub fn clear(&self) {
        for axis in Axis::all() {
            self.set(axis, f64::NAN);
        }
    }
}

impl Default for SharedAxisValues {
    fn default() -> Self {
        Self::new()
    }
}

impl AxisValueProvider for SharedAxisValues {
    fn value(&self, axis: Axis) -> f64 {
        f64::from_bits(self.slots[axis.index()].load(Ordering::Acquire))
    }
}

/// Per-axis output settings.
///
/// `minimum` and `maximum` are percentages of the device range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisSettings {
    pub enabled: bool,
    pub minimum: f64,
    pub maximum: f64,
}

impl Default for AxisSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            minimum: 0.0,
            maximum: 100.0,
        }
    }
}

impl AxisSettings {
    /// Map a normalized sample into the configured range.
    ///
    /// Non-finite input stays NaN so that "no data" is never turned into a command.
    pub fn apply(&self, value: f64) -> f64 {
        if !value.is_finite() {
            return f64::NAN;
        }
        lerp(self.minimum / 100.0, self.maximum / 100.0, value.clamp(0.0, 1.0)).clamp(0.0, 1.0)
    }
}

/// Settings for the whole axis set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisSettingsMap(BTreeMap<Axis, AxisSettings>);

impl AxisSettingsMap {
    pub fn get(&self, axis: Axis) -> AxisSettings {
        self.0.get(&axis).copied().unwrap_or_default()
    }

    pub fn set(&mut self, axis: Axis, settings: AxisSettings) {
        self.0.insert(axis, settings);
    }

    pub fn is_enabled(&self, axis: Axis) -> bool {
        self.get(axis).enabled
    }

    pub fn enabled_axes(&self) -> impl Iterator<Item = Axis> + '_ {
        Axis::all().filter(|axis| self.is_enabled(*axis))
    }

    /// Apply every axis' range to `values` in place.
    pub fn apply(&self, values: &mut AxisValues) {
        for axis in Axis::all() {
            values[axis] = self.get(axis).apply(values[axis]);
        }
    }
}

impl Default for AxisSettingsMap {
    fn default() -> Self {
        Self(
            Axis::all()
                .map(|axis| (axis, AxisSettings::default()))
                .collect(),
        )
    }
}

pub fn lerp(from: f64, to: f64, t: f64) -> f64 {
    from + (to - from) * t
}

/// Linear map of `value` from `[from_low, from_high]` into `[to_low, to_high]`.
pub fn map_range(value: f64, from_low: f64, from_high: f64, to_low: f64, to_high: f64) -> f64 {
    if from_high == from_low {
        return to_low;
    }
    to_low + (value - from_low) * (to_high - to_low) / (from_high - from_low)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_axis_codes_round_trip_through_strum() {
        assert_eq!(Axis::L0.code(), "L0");
        assert_eq!(Axis::from_str("R2").unwrap(), Axis::R2);
        assert!(Axis::from_str("X9").is_err());
        assert_eq!(Axis::all().count(), Axis::COUNT);
        assert!(Axis::all().enumerate().all(|(i, axis)| axis.index() == i));
    }

    #[test]
    fn test_default_values() {
        assert_eq!(Axis::L0.default_value(), 0.5);
        assert_eq!(Axis::V0.default_value(), 0.0);
        let rest = AxisValues::rest();
        assert_eq!(rest[Axis::R0], 0.5);
        assert_eq!(rest[Axis::A2], 0.0);
    }

    #[test]
    fn test_shared_values_start_unknown() {
        let shared = SharedAxisValues::new();
        assert!(shared.value(Axis::L0).is_nan());

        shared.set(Axis::L0, 0.25);
        let copy = AxisValues::read_from(&shared);
        assert_eq!(copy[Axis::L0], 0.25);
        assert!(copy[Axis::L1].is_nan());

        shared.clear();
        assert!(shared.value(Axis::L0).is_nan());
    }

    #[test]
    fn test_shared_values_concurrent_reads() {
        let shared = SharedAxisValues::new();
        shared.set(Axis::V0, 0.75);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let reader = shared.clone();
                std::thread::spawn(move || AxisValues::read_from(&reader)[Axis::V0])
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 0.75);
        }
    }

    #[test]
    fn test_axis_settings_apply_range() {
        let settings = AxisSettings {
            enabled: true,
            minimum: 20.0,
            maximum: 80.0,
        };
        assert!((settings.apply(0.5) - 0.5).abs() < 1e-9);
        assert!((settings.apply(0.0) - 0.2).abs() < 1e-9);
        assert!((settings.apply(1.5) - 0.8).abs() < 1e-9);
        assert!(settings.apply(f64::NAN).is_nan());
    }

    #[test]
    fn test_settings_map_enabled_axes() {
        let mut map = AxisSettingsMap::default();
        map.set(
            Axis::L1,
            AxisSettings {
                enabled: false,
                ..Default::default()
            },
        );
        let enabled: Vec<_> = map.enabled_axes().collect();
        assert!(!enabled.contains(&Axis::L1));
        assert!(enabled.contains(&Axis::L0));
        assert_eq!(enabled.len(), Axis::COUNT - 1);
    }

    #[test]
    fn test_map_range() {
        assert_eq!(map_range(0.5, 0.0, 1.0, 100.0, 440.0), 270.0);
        assert_eq!(map_range(0.0, -1.0, 1.0, 2.0, 0.0), 1.0);
        assert_eq!(map_range(3.0, 1.0, 1.0, 7.0, 9.0), 7.0);
    }
}
