//! # axislink-core
//!
//! Core library for streaming per-axis motion values to output devices.
//!
//! This crate provides:
//! - The axis model and lock-free value providers
//! - Wire encoders for TCode, the device-bus protocol and audio signals
//! - Fixed-rate and keyframe-polled update schedulers
//! - Output backends (TCP, WebSocket device bus, local audio) behind one trait
//! - `OutputTarget`, which runs a backend session on its own thread
//! - Script playback and player telemetry as value sources
//!
//! ## Feature Flags
//!
//! - `audio` (default): the cpal-based audio backend.

pub mod axis;
pub mod backend;
pub mod cancel;
pub mod config;
pub mod connection;
pub mod devices;
pub mod dirty;
pub mod encode;
pub mod error;
pub mod mapping;
pub mod prelude;
pub mod runtime;
pub mod schedule;
pub mod source;

pub use axis::{
    Axis, AxisSettings, AxisSettingsMap, AxisValueProvider, AxisValues, SharedAxisValues,
};
pub use backend::{OutputBackend, probe};
pub use cancel::CancelToken;
pub use config::{
    AppConfig, AudioConfig, BackendConfig, DeviceBusConfig, Endpoint, JsonSettingsStore,
    SettingsStore, TargetConfig, TcpConfig, TcpConfigBuilder,
};
pub use connection::{ConnectionStatus, TargetEvent, TargetEventKind};
pub use devices::{CommandType, DeviceEvent, DeviceInfo, DeviceRegistry};
pub use encode::{DeviceBinding, SignalEncoder, Waveform};
pub use error::{Error, Result};
pub use runtime::{OutputTarget, ValueSources};
pub use schedule::{Keyframe, KeyframeSource, UpdateMode};
pub use source::{PlaybackClock, PlayerEvent, Script, ScriptPlayer, TelemetryClient};
