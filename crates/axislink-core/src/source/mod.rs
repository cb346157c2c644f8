//! Value sources that feed the output targets.
//!
//! Targets only see [`AxisValueProvider`](crate::axis::AxisValueProvider)
//! and [`KeyframeSource`](crate::schedule::KeyframeSource); this module holds
//! the implementations the CLI wires up: scripts played against a clock that
//! follows player telemetry.

mod clock;
mod script;
pub mod telemetry;

pub use clock::PlaybackClock;
pub use script::{Script, ScriptPlayer};
pub use telemetry::{FrameDecoder, PlayerEvent, TelemetryClient};
