//! Per-target runtime.
//!
//! [`OutputTargetRuntime`] runs one connected session of one backend on the
//! calling thread: connect, schedule ticks, tear down. [`OutputTarget`] owns
//! the thread that hosts it and is what callers hold on to.

mod target;

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace};

pub use target::OutputTarget;

use crate::axis::{Axis, AxisSettingsMap, AxisValueProvider, AxisValues};
use crate::backend::OutputBackend;
use crate::cancel::CancelToken;
use crate::connection::ConnectionManager;
use crate::dirty::DirtyValueTracker;
use crate::encode::Frame;
use crate::error::{Error, Result};
use crate::schedule::{
    FixedRateScheduler, KeyframeSource, PolledScheduler, Snapshot, Tick, UpdateMode, UpdateRate,
};

/// Where a target reads its values from.
#[derive(Clone)]
pub struct ValueSources {
    pub values: Arc<dyn AxisValueProvider>,
    pub keyframes: Option<Arc<dyn KeyframeSource>>,
}

impl ValueSources {
    pub fn new(values: Arc<dyn AxisValueProvider>) -> Self {
        Self {
            values,
            keyframes: None,
        }
    }

    pub fn with_keyframes(mut self, keyframes: Arc<dyn KeyframeSource>) -> Self {
        self.keyframes = Some(keyframes);
        self
    }
}

impl std::fmt::Debug for ValueSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueSources")
            .field("keyframes", &self.keyframes.is_some())
            .finish()
    }
}

/// Settings fixed for the lifetime of one session.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub update_rate: UpdateRate,
    pub axes: AxisSettingsMap,
}

/// State that must not outlive a connection.
#[derive(Debug)]
struct SessionState {
    tracker: DirtyValueTracker,
    values: AxisValues,
    /// Index of the keyframe each axis last moved from (polled mode)
    last_keyframe: [Option<usize>; Axis::COUNT],
}

impl SessionState {
    fn new() -> Self {
        Self {
            tracker: DirtyValueTracker::new(),
            values: AxisValues::unknown(),
            last_keyframe: [None; Axis::COUNT],
        }
    }

    fn reset(&mut self) {
        *self = Self::new();
    }

    fn tick<B: OutputBackend>(
        &mut self,
        backend: &mut B,
        axes: &AxisSettingsMap,
        provider: &dyn AxisValueProvider,
        candidates: &[Axis],
        tick: Tick,
        cancel: &CancelToken,
    ) -> Result<()> {
        backend.poll()?;

        self.values.refresh(provider);
        axes.apply(&mut self.values);
        for axis in Axis::all() {
            self.values[axis] = backend.coerce(axis, self.values[axis]);
        }

        let dirty_only = backend.send_dirty_only();
        let selected = if dirty_only {
            self.tracker
                .dirty_axes(&self.values, candidates.iter().copied())
        } else {
            candidates.to_vec()
        };
        if dirty_only && selected.is_empty() {
            return Ok(());
        }

        let frame = Frame {
            values: &self.values,
            axes: &selected,
            elapsed: tick.elapsed,
            interval: tick.interval,
        };
        if let Some(payload) = backend.encode(&frame) {
            backend.send(payload, cancel)?;
        }
        self.tracker.commit(&selected, &self.values);
        Ok(())
    }

    fn keyframe<B: OutputBackend>(
        &mut self,
        backend: &mut B,
        axes: &AxisSettingsMap,
        snapshot: &Snapshot,
        cancel: &CancelToken,
    ) -> Result<()> {
        let axis = snapshot.axis;
        if self.last_keyframe[axis.index()] == Some(snapshot.index_from) {
            return Ok(());
        }

        let value = backend.coerce(axis, axes.get(axis).apply(snapshot.keyframe_to.value));
        if !value.is_finite() {
            return Ok(());
        }

        trace!(
            "{} keyframe {} -> {} [{:?}]",
            axis, snapshot.index_from, snapshot.index_to, snapshot.duration
        );
        if let Some(payload) = backend.encode_keyframe(axis, value, snapshot.duration) {
            backend.send(payload, cancel)?;
        }
        self.last_keyframe[axis.index()] = Some(snapshot.index_from);
        self.values[axis] = value;
        self.tracker.commit(&[axis], &self.values);
        Ok(())
    }
}

/// One backend session driven by a scheduler.
pub struct OutputTargetRuntime<B: OutputBackend> {
    backend: B,
    settings: RuntimeSettings,
    sources: ValueSources,
    manager: ConnectionManager,
    session: SessionState,
}

impl<B: OutputBackend> OutputTargetRuntime<B> {
    pub fn new(
        backend: B,
        settings: RuntimeSettings,
        sources: ValueSources,
        manager: ConnectionManager,
    ) -> Self {
        Self {
            backend,
            settings,
            sources,
            manager,
            session: SessionState::new(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Last value sent for `axis` in the current session.
    pub fn last_sent(&self, axis: Axis) -> f64 {
        self.session.tracker.last_sent(axis)
    }

    /// Connect, stream until cancelled or failed, then tear down.
    ///
    /// Failures are reported through the connection manager once and also
    /// returned; cancellation ends the session with `Ok`.
    pub fn run(&mut self, cancel: &CancelToken) -> Result<()> {
        if self.backend.update_mode() == UpdateMode::Polled && self.sources.keyframes.is_none() {
            let err = Error::InvalidConfig("polled updates need a keyframe source".into());
            self.manager.report_failure(&err);
            return Err(err);
        }

        if let Err(e) = self.manager.connect(&mut self.backend, cancel) {
            self.manager.report_failure(&e);
            return if e.is_cancelled() { Ok(()) } else { Err(e) };
        }

        let result = match self.backend.update_mode() {
            UpdateMode::Fixed => self.run_fixed(cancel),
            UpdateMode::Polled => self.run_polled(cancel),
        };

        self.manager.teardown(&mut self.backend);
        self.session.reset();

        match result {
            Err(e) if e.is_cancelled() || cancel.is_cancelled() => {
                debug!("{}: session ended by cancellation ({})", self.backend.name(), e);
                Ok(())
            }
            Err(e) => {
                self.manager.report_failure(&e);
                Err(e)
            }
            Ok(()) => Ok(()),
        }
    }

    fn run_fixed(&mut self, cancel: &CancelToken) -> Result<()> {
        let Self {
            backend,
            settings,
            sources,
            session,
            ..
        } = self;

        let enabled: Vec<Axis> = settings.axes.enabled_axes().collect();
        let candidates = backend.candidate_axes(&enabled);
        let provider = sources.values.as_ref();

        let mut scheduler = FixedRateScheduler::new(settings.update_rate.clone());
        scheduler.run(cancel, |tick| {
            session.tick(backend, &settings.axes, provider, &candidates, tick, cancel)?;
            Ok(ControlFlow::Continue(()))
        })
    }

    fn run_polled(&mut self, cancel: &CancelToken) -> Result<()> {
        let Self {
            backend,
            settings,
            sources,
            session,
            ..
        } = self;
        let Some(source) = sources.keyframes.clone() else {
            return Err(Error::InvalidConfig(
                "polled updates need a keyframe source".into(),
            ));
        };

        let enabled: Vec<Axis> = settings.axes.enabled_axes().collect();
        let rate = settings.update_rate.clone();
        let mut last_poll = Instant::now();

        let mut scheduler = PolledScheduler::new(settings.update_rate.clone());
        scheduler.run(source.as_ref(), &enabled, cancel, |snapshot| {
            if last_poll.elapsed() >= rate.interval() {
                backend.poll()?;
                last_poll = Instant::now();
            }
            session.keyframe(backend, &settings.axes, snapshot, cancel)?;
            Ok(ControlFlow::Continue(()))
        })
    }
}
