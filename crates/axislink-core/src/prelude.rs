//! Prelude module for convenient imports
//!
//! ```ignore
//! use axislink_core::prelude::*;
//! ```

// Targets and their wiring
pub use crate::runtime::{OutputTarget, ValueSources};
pub use crate::cancel::CancelToken;
pub use crate::connection::{ConnectionStatus, TargetEvent, TargetEventKind};

// Configuration
pub use crate::config::{AppConfig, BackendConfig, JsonSettingsStore, SettingsStore, TargetConfig};

// Values
pub use crate::axis::{Axis, AxisValueProvider, SharedAxisValues};
pub use crate::source::{PlaybackClock, Script, ScriptPlayer};

// Error handling
pub use crate::error::{Error, Result};
