//! Reconnect loop for player telemetry.

use std::time::Duration;

use axislink_core::CancelToken;
use axislink_core::source::{PlaybackClock, TelemetryClient};
use tracing::{debug, info};

/// Delay between telemetry connection attempts
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Feed `clock` from `client`, reconnecting until `cancel` fires.
pub fn follow_telemetry_with_retry(
    client: &TelemetryClient,
    clock: &PlaybackClock,
    cancel: &CancelToken,
) {
    let mut attempts = 0u32;
    while !cancel.is_cancelled() {
        attempts += 1;

        match client.run(cancel, |event| clock.apply(&event)) {
            Ok(()) => {
                attempts = 0;
                info!(
                    "Player closed telemetry, reconnecting in {}s...",
                    RETRY_DELAY.as_secs()
                );
            }
            Err(e) if e.is_cancelled() => break,
            Err(e) => {
                // the player is usually just not running yet
                debug!(
                    "Telemetry at {} unavailable ({}), retrying in {}s (attempt {})",
                    client.endpoint(),
                    e,
                    RETRY_DELAY.as_secs(),
                    attempts
                );
            }
        }

        if cancel.wait(RETRY_DELAY) {
            break;
        }
    }
}
