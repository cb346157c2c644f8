//! Player telemetry over a length-prefixed JSON socket.
//!
//! Each frame is a little-endian `i32` byte count followed by a JSON object.
//! A zero-length frame is a keepalive; the client sends one every
//! [`PING_INTERVAL`] as well.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::backend::tcp::connect_stream;
use crate::cancel::CancelToken;
use crate::config::Endpoint;
use crate::error::{Error, Result};

pub const DEFAULT_TELEMETRY_PORT: u16 = 23554;
pub const PING_INTERVAL: Duration = Duration::from_millis(500);
/// Frames claiming more than this are treated as stream corruption.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_millis(50);
const PING: [u8; 4] = [0; 4];

/// One fact reported by the player.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    Playing(bool),
    /// Seconds
    Duration(f64),
    /// Seconds
    Position(f64),
    File(Option<String>),
    Speed(f64),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TelemetryFrame {
    player_state: Option<i32>,
    duration: Option<f64>,
    current_time: Option<f64>,
    path: Option<String>,
    playback_speed: Option<f64>,
}

/// Events carried by one frame payload.
///
/// The file comes first so the position that follows applies to it.
pub fn parse_frame(payload: &[u8]) -> Result<Vec<PlayerEvent>> {
    let frame: TelemetryFrame =
        serde_json::from_slice(payload).map_err(|e| Error::MalformedFrame(e.to_string()))?;

    let mut events = Vec::new();
    if let Some(path) = frame.path {
        events.push(PlayerEvent::File(Some(path)));
    }
    if let Some(duration) = frame.duration {
        events.push(PlayerEvent::Duration(duration));
    }
    if let Some(position) = frame.current_time {
        events.push(PlayerEvent::Position(position));
    }
    if let Some(speed) = frame.playback_speed {
        events.push(PlayerEvent::Speed(speed));
    }
    if let Some(state) = frame.player_state {
        events.push(PlayerEvent::Playing(state == 0));
    }
    Ok(events)
}

/// Reassembles frames from arbitrary read chunks.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Append `data` and return the events of every frame it completes.
    pub fn decode(&mut self, data: &[u8]) -> Vec<PlayerEvent> {
        self.buffer.extend_from_slice(data);

        let mut events = Vec::new();
        while self.buffer.len() >= 4 {
            let header = [self.buffer[0], self.buffer[1], self.buffer[2], self.buffer[3]];
            let length = i32::from_le_bytes(header);

            if length == 0 {
                self.buffer.drain(..4);
                continue;
            }
            if length < 0 || length as usize > MAX_FRAME_LEN {
                warn!("Invalid telemetry frame length {}, dropping buffered data", length);
                self.buffer.clear();
                break;
            }

            let end = 4 + length as usize;
            if self.buffer.len() < end {
                break;
            }

            match parse_frame(&self.buffer[4..end]) {
                Ok(parsed) => events.extend(parsed),
                Err(e) => debug!("Discarding telemetry frame: {}", e),
            }
            self.buffer.drain(..end);
        }
        events
    }
}

/// Reads player telemetry from one endpoint.
#[derive(Debug, Clone)]
pub struct TelemetryClient {
    endpoint: Endpoint,
}

impl TelemetryClient {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Run one session until the player disconnects or `cancel` fires.
    ///
    /// However the session ends, `on_event` finally receives `File(None)`
    /// and `Playing(false)`.
    pub fn run<F>(&self, cancel: &CancelToken, mut on_event: F) -> Result<()>
    where
        F: FnMut(PlayerEvent),
    {
        let result = self.session(cancel, &mut on_event);
        on_event(PlayerEvent::File(None));
        on_event(PlayerEvent::Playing(false));
        result
    }

    fn session<F>(&self, cancel: &CancelToken, on_event: &mut F) -> Result<()>
    where
        F: FnMut(PlayerEvent),
    {
        let mut stream = connect_stream(&self.endpoint, CONNECT_TIMEOUT, cancel)?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        info!("Connected to player telemetry at {}", self.endpoint);

        let result = pump(&mut stream, cancel, on_event);
        let _ = stream.shutdown(Shutdown::Both);
        info!("Player telemetry at {} disconnected", self.endpoint);
        result
    }
}

fn pump<F>(stream: &mut TcpStream, cancel: &CancelToken, on_event: &mut F) -> Result<()>
where
    F: FnMut(PlayerEvent),
{
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 4096];
    let mut next_ping = Instant::now() + PING_INTERVAL;

    while !cancel.is_cancelled() {
        if Instant::now() >= next_ping {
            stream
                .write_all(&PING)
                .and_then(|_| stream.flush())
                .map_err(|e| Error::Transport(e.to_string()))?;
            next_ping += PING_INTERVAL;
        }

        match stream.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => decoder.decode(&buf[..n]).into_iter().for_each(&mut *on_event),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(Error::Transport(e.to_string())),
        }
    }
    Err(Error::Cancelled)
}
