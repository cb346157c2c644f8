//! Sampling loops.
//!
//! Both schedulers run on the calling thread and take `&mut self`, so a tick
//! callback can never overlap with itself. They return when the token is
//! cancelled, when the callback breaks, or when it fails.

mod fixed;
mod polled;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

pub use fixed::FixedRateScheduler;
pub use polled::{Keyframe, KeyframeSource, PolledScheduler, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerState {
    #[default]
    Idle,
    Running,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UpdateMode {
    /// Sample the value provider at a constant rate
    #[default]
    Fixed,
    /// Follow discrete keyframes from a keyframe source
    Polled,
}

/// Live-adjustable update rate in Hz.
///
/// Clones share the same value; schedulers re-read it every tick.
#[derive(Debug, Clone)]
pub struct UpdateRate(Arc<AtomicU32>);

impl UpdateRate {
    pub fn new(hz: u32) -> Self {
        Self(Arc::new(AtomicU32::new(hz)))
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, hz: u32) {
        self.0.store(hz, Ordering::Relaxed);
    }

    /// `max(1, 1000 / rate)` milliseconds.
    pub fn interval(&self) -> Duration {
        let hz = self.get().max(1) as f64;
        Duration::from_secs_f64((1000.0 / hz).max(1.0) / 1000.0)
    }
}

impl Default for UpdateRate {
    fn default() -> Self {
        Self::new(60)
    }
}

/// Timing of one fixed-rate tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// Time since the previous tick started
    pub elapsed: Duration,
    /// Interval in effect for this tick
    pub interval: Duration,
}
