//! Redundant-transmission suppression.

use crate::axis::{Axis, AxisValues};

/// Minimum change between two samples that warrants a new transmission.
pub const DIRTY_EPSILON: f64 = 0.005;

/// Decide whether `current` must be sent given the last sent `previous`.
///
/// The first valid sample and any transition to exactly zero always pass,
/// regardless of the threshold; a dropped zero can leave a device running.
pub fn is_dirty(previous: f64, current: f64) -> bool {
    if !current.is_finite() {
        return false;
    }
    if !previous.is_finite() {
        return true;
    }
    if current == 0.0 && previous != 0.0 {
        return true;
    }
    (previous - current).abs() >= DIRTY_EPSILON
}

/// Last-sent value per axis for one connected session.
#[derive(Debug, Clone)]
pub struct DirtyValueTracker {
    last_sent: AxisValues,
}

impl DirtyValueTracker {
    pub fn new() -> Self {
        Self {
            last_sent: AxisValues::unknown(),
        }
    }

    /// Axes among `candidates` whose value in `current` is dirty.
    pub fn dirty_axes<I>(&self, current: &AxisValues, candidates: I) -> Vec<Axis>
    where
        I: IntoIterator<Item = Axis>,
    {
        candidates
            .into_iter()
            .filter(|axis| is_dirty(self.last_sent[*axis], current[*axis]))
            .collect()
    }

    /// Record `axes` as sent with their values from `current`.
    pub fn commit(&mut self, axes: &[Axis], current: &AxisValues) {
        for axis in axes {
            self.last_sent[*axis] = current[*axis];
        }
    }

    pub fn last_sent(&self, axis: Axis) -> f64 {
        self.last_sent[axis]
    }

    /// Forget everything; the next valid sample of every axis will be sent.
    pub fn reset(&mut self) {
        self.last_sent = AxisValues::unknown();
    }
}

impl Default for DirtyValueTracker {
    fn default() -> Self {
        Self::new()
    }
}
