use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Deserialize;
use tracing::info;

use super::PlaybackClock;
use crate::axis::{Axis, AxisValueProvider, lerp};
use crate::error::Result;
use crate::schedule::{Keyframe, KeyframeSource};

#[derive(Debug, Deserialize)]
struct ScriptFile {
    #[serde(default)]
    inverted: bool,
    actions: Vec<ScriptAction>,
}

#[derive(Debug, Deserialize)]
struct ScriptAction {
    /// Milliseconds from the start
    at: i64,
    /// 0..=100
    pos: f64,
}

/// Keyframes of one axis, sorted by position.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    keyframes: Arc<[Keyframe]>,
}

impl Script {
    pub fn from_keyframes(mut keyframes: Vec<Keyframe>) -> Self {
        keyframes.retain(|k| k.position.is_finite() && k.value.is_finite());
        keyframes.sort_by(|a, b| a.position.total_cmp(&b.position));
        Self {
            keyframes: keyframes.into(),
        }
    }

    /// Parse funscript JSON (`actions: [{at, pos}]`, optional `inverted`).
    pub fn from_json(json: &str) -> Result<Self> {
        let file: ScriptFile = serde_json::from_str(json)?;
        let keyframes = file
            .actions
            .iter()
            .map(|action| {
                let mut value = (action.pos / 100.0).clamp(0.0, 1.0);
                if file.inverted {
                    value = 1.0 - value;
                }
                Keyframe::new(action.at as f64 / 1000.0, value)
            })
            .collect();
        Ok(Self::from_keyframes(keyframes))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let script = Self::from_json(&content)?;
        info!("Loaded {} keyframes from {}", script.len(), path.display());
        Ok(script)
    }

    pub fn keyframes(&self) -> Arc<[Keyframe]> {
        Arc::clone(&self.keyframes)
    }

    pub fn len(&self) -> usize {
        self.keyframes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    /// Interpolated value at `position`; NaN before the first keyframe,
    /// the last value after the final one.
    pub fn value_at(&self, position: f64) -> f64 {
        let keyframes = &self.keyframes;
        let index = keyframes.partition_point(|k| k.position <= position);
        if index == 0 {
            return f64::NAN;
        }
        if index >= keyframes.len() {
            return keyframes[keyframes.len() - 1].value;
        }

        let (from, to) = (keyframes[index - 1], keyframes[index]);
        let span = to.position - from.position;
        if span <= 0.0 {
            return to.value;
        }
        lerp(from.value, to.value, (position - from.position) / span)
    }
}

/// Per-axis scripts played against a [`PlaybackClock`].
///
/// Serves both scheduling modes: interpolated values for fixed-rate
/// targets and raw keyframes for polled ones.
#[derive(Debug, Default)]
pub struct ScriptPlayer {
    clock: PlaybackClock,
    scripts: RwLock<HashMap<Axis, Script>>,
}

impl ScriptPlayer {
    pub fn new(clock: PlaybackClock) -> Self {
        Self {
            clock,
            scripts: RwLock::new(HashMap::new()),
        }
    }

    pub fn clock(&self) -> &PlaybackClock {
        &self.clock
    }

    pub fn set_script(&self, axis: Axis, script: Script) {
        self.scripts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(axis, script);
    }

    pub fn remove_script(&self, axis: Axis) -> Option<Script> {
        self.scripts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&axis)
    }

    pub fn clear(&self) {
        self.scripts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn has_script(&self, axis: Axis) -> bool {
        self.scripts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&axis)
    }
}

impl AxisValueProvider for ScriptPlayer {
    fn value(&self, axis: Axis) -> f64 {
        let scripts = self.scripts.read().unwrap_or_else(PoisonError::into_inner);
        match scripts.get(&axis) {
            Some(script) => script.value_at(self.clock.position()),
            None => f64::NAN,
        }
    }
}

impl KeyframeSource for ScriptPlayer {
    fn position(&self) -> Option<f64> {
        self.clock.is_playing().then(|| self.clock.position())
    }

    fn keyframes(&self, axis: Axis) -> Option<Arc<[Keyframe]>> {
        self.scripts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&axis)
            .map(Script::keyframes)
    }
}
