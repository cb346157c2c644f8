use std::fmt::Write;
use std::time::Duration;

use super::{Frame, ProtocolEncoder};
use crate::axis::Axis;

pub const DEFAULT_PRECISION: u32 = 3;
const MAX_PRECISION: u32 = 9;

/// TCode line encoder.
///
/// Each sample renders as `<AXIS><digits>[I<ms>]`; commands are separated by a
/// space and the line ends with `\n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TCodeEncoder {
    precision: u32,
    offload_elapsed: bool,
}

impl TCodeEncoder {
    pub fn new(precision: u32, offload_elapsed: bool) -> Self {
        Self {
            precision: precision.clamp(1, MAX_PRECISION),
            offload_elapsed,
        }
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    /// When set, durations are omitted and the device times its own moves.
    pub fn offload_elapsed(&self) -> bool {
        self.offload_elapsed
    }

    /// Render one command without separator or terminator.
    pub fn command(&self, axis: Axis, value: f64, duration: Option<Duration>) -> String {
        let mut out = String::with_capacity(12);
        self.write_command(&mut out, axis, value, duration);
        out
    }

    /// Single keyframe command (polled mode); always carries the move duration.
    pub fn keyframe_line(&self, axis: Axis, value: f64, duration: Duration) -> String {
        let mut line = self.command(axis, value, Some(duration));
        line.push('\n');
        line
    }

    fn write_command(&self, out: &mut String, axis: Axis, value: f64, duration: Option<Duration>) {
        let scale = 10u64.pow(self.precision) - 1;
        let digits = (value.clamp(0.0, 1.0) * scale as f64).round() as u64;
        let width = self.precision as usize;
        let _ = write!(out, "{}{:0width$}", axis.code(), digits);
        if let Some(duration) = duration {
            let _ = write!(out, "I{}", duration.as_millis());
        }
    }
}

impl Default for TCodeEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_PRECISION, false)
    }
}

impl ProtocolEncoder for TCodeEncoder {
    type Context = ();
    type Output = Option<String>;

    fn encode(&self, frame: &Frame<'_>, _context: &()) -> Option<String> {
        let duration = (!self.offload_elapsed).then_some(frame.elapsed);
        let mut line = String::new();
        for (axis, value) in frame.samples() {
            if !line.is_empty() {
                line.push(' ');
            }
            self.write_command(&mut line, axis, value, duration);
        }

        if line.is_empty() {
            return None;
        }
        line.push('\n');
        Some(line)
    }
}
