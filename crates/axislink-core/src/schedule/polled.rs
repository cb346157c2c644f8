use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::{SchedulerState, UpdateRate};
use crate::axis::Axis;
use crate::cancel::CancelToken;
use crate::error::Result;

/// A timed target value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    /// Seconds from the start of playback
    pub position: f64,
    pub value: f64,
}

impl Keyframe {
    pub fn new(position: f64, value: f64) -> Self {
        Self { position, value }
    }
}

/// Source of keyframes and of the playback position they are timed against.
pub trait KeyframeSource: Send + Sync {
    /// Current playback position in seconds, or `None` while not playing.
    fn position(&self) -> Option<f64>;

    /// Keyframes for `axis` sorted by position.
    fn keyframes(&self, axis: Axis) -> Option<Arc<[Keyframe]>>;
}

impl<S: KeyframeSource + ?Sized> KeyframeSource for Arc<S> {
    fn position(&self) -> Option<f64> {
        (**self).position()
    }

    fn keyframes(&self, axis: Axis) -> Option<Arc<[Keyframe]>> {
        (**self).keyframes(axis)
    }
}

/// Bracketing keyframes of one axis at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub axis: Axis,
    pub index_from: usize,
    pub index_to: usize,
    pub keyframe_from: Keyframe,
    pub keyframe_to: Keyframe,
    /// Progress from `keyframe_from` to `keyframe_to` in `[0, 1]`
    pub fraction: f64,
    /// Time left until `keyframe_to`
    pub duration: Duration,
    /// Time since the previous quantum
    pub elapsed: Duration,
}

impl Snapshot {
    /// Locate the pair of keyframes around `position`.
    ///
    /// Returns `None` before the first keyframe, at or after the last one,
    /// and for fewer than two keyframes.
    pub fn locate(
        axis: Axis,
        keyframes: &[Keyframe],
        position: f64,
        elapsed: Duration,
    ) -> Option<Self> {
        if !position.is_finite() {
            return None;
        }

        let index_to = keyframes.partition_point(|k| k.position <= position);
        if index_to == 0 || index_to >= keyframes.len() {
            return None;
        }
        let index_from = index_to - 1;
        let keyframe_from = keyframes[index_from];
        let keyframe_to = keyframes[index_to];

        let span = keyframe_to.position - keyframe_from.position;
        let fraction = if span > 0.0 {
            ((position - keyframe_from.position) / span).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let duration = Duration::from_secs_f64((keyframe_to.position - position).max(0.0));

        Some(Self {
            axis,
            index_from,
            index_to,
            keyframe_from,
            keyframe_to,
            fraction,
            duration,
            elapsed,
        })
    }
}

/// Calls back once per axis and quantum with the current keyframe bracket.
#[derive(Debug)]
pub struct PolledScheduler {
    rate: UpdateRate,
    state: SchedulerState,
}

impl PolledScheduler {
    pub fn new(rate: UpdateRate) -> Self {
        Self {
            rate,
            state: SchedulerState::Idle,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Run until cancelled, until `on_snapshot` breaks, or until it fails.
    ///
    /// Axes without keyframes or without a bracket at the current position
    /// are skipped; nothing is called back while the source is not playing.
    pub fn run<S, F>(
        &mut self,
        source: &S,
        axes: &[Axis],
        cancel: &CancelToken,
        on_snapshot: F,
    ) -> Result<()>
    where
        S: KeyframeSource + ?Sized,
        F: FnMut(&Snapshot) -> Result<ControlFlow<()>>,
    {
        self.state = SchedulerState::Running;
        let result = Self::run_loop(&self.rate, source, axes, cancel, on_snapshot);
        self.state = SchedulerState::Idle;
        result
    }

    fn run_loop<S, F>(
        rate: &UpdateRate,
        source: &S,
        axes: &[Axis],
        cancel: &CancelToken,
        mut on_snapshot: F,
    ) -> Result<()>
    where
        S: KeyframeSource + ?Sized,
        F: FnMut(&Snapshot) -> Result<ControlFlow<()>>,
    {
        let mut last_quantum: Option<Instant> = None;

        'quantum: while !cancel.is_cancelled() {
            let started = Instant::now();
            let interval = rate.interval();
            let elapsed = last_quantum.map_or(interval, |last| started - last);
            last_quantum = Some(started);

            if let Some(position) = source.position() {
                for axis in axes {
                    let Some(keyframes) = source.keyframes(*axis) else {
                        continue;
                    };
                    let Some(snapshot) = Snapshot::locate(*axis, &keyframes, position, elapsed)
                    else {
                        continue;
                    };
                    if on_snapshot(&snapshot)?.is_break() {
                        break 'quantum;
                    }
                }
            }

            let remaining = interval.saturating_sub(started.elapsed());
            if cancel.wait(remaining) {
                break;
            }
        }

        Ok(())
    }
}
