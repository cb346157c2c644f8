use std::ops::ControlFlow;
use std::time::Instant;

use tracing::trace;

use super::{SchedulerState, Tick, UpdateRate};
use crate::cancel::CancelToken;
use crate::error::Result;

/// Calls back at a constant, live-adjustable rate.
#[derive(Debug)]
pub struct FixedRateScheduler {
    rate: UpdateRate,
    state: SchedulerState,
}

impl FixedRateScheduler {
    pub fn new(rate: UpdateRate) -> Self {
        Self {
            rate,
            state: SchedulerState::Idle,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn rate(&self) -> &UpdateRate {
        &self.rate
    }

    /// Run until cancelled, until `on_tick` breaks, or until it fails.
    ///
    /// The first tick reports one interval as its elapsed time.
    pub fn run<F>(&mut self, cancel: &CancelToken, on_tick: F) -> Result<()>
    where
        F: FnMut(Tick) -> Result<ControlFlow<()>>,
    {
        self.state = SchedulerState::Running;
        let result = Self::run_loop(&self.rate, cancel, on_tick);
        self.state = SchedulerState::Idle;
        result
    }

    fn run_loop<F>(rate: &UpdateRate, cancel: &CancelToken, mut on_tick: F) -> Result<()>
    where
        F: FnMut(Tick) -> Result<ControlFlow<()>>,
    {
        let mut last_tick: Option<Instant> = None;

        while !cancel.is_cancelled() {
            let started = Instant::now();
            let interval = rate.interval();
            let elapsed = last_tick.map_or(interval, |last| started - last);
            last_tick = Some(started);

            trace!("Begin FixedUpdate [Elapsed: {:?}]", elapsed);
            if on_tick(Tick { elapsed, interval })?.is_break() {
                break;
            }

            let remaining = interval.saturating_sub(started.elapsed());
            if cancel.wait(remaining) {
                break;
            }
        }

        Ok(())
    }
}
