//! TCode over a plain TCP socket.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace};

use super::OutputBackend;
use crate::axis::Axis;
use crate::cancel::CancelToken;
use crate::config::{Endpoint, TcpConfig};
use crate::encode::{Frame, ProtocolEncoder, TCodeEncoder};
use crate::error::{Error, Result};
use crate::schedule::UpdateMode;

/// Length of one connect attempt before the token is checked again.
const CONNECT_SLICE: Duration = Duration::from_millis(250);
/// Socket read timeout used while polling for controller output.
const POLL_READ_TIMEOUT: Duration = Duration::from_millis(1);
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Open a TCP connection, giving up at `timeout` or as soon as `cancel` fires.
pub(crate) fn connect_stream(
    endpoint: &Endpoint,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<TcpStream> {
    let failed = |message: String| Error::ConnectFailed {
        endpoint: endpoint.to_string(),
        message,
    };

    let addrs = endpoint.resolve().map_err(|e| failed(e.to_string()))?;
    let deadline = Instant::now() + timeout;

    loop {
        for addr in &addrs {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(failed("timed out".into()));
            }

            match TcpStream::connect_timeout(addr, remaining.min(CONNECT_SLICE)) {
                Ok(stream) => return Ok(stream),
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    trace!("Connect attempt to {} timed out, retrying", addr);
                }
                Err(e) => return Err(failed(e.to_string())),
            }
        }
    }
}

pub struct TcpBackend {
    config: TcpConfig,
    encoder: TCodeEncoder,
    label: String,
    stream: Option<TcpStream>,
}

impl TcpBackend {
    pub fn new(config: TcpConfig) -> Self {
        let encoder = TCodeEncoder::new(config.precision, config.offload_elapsed_time);
        let label = format!("tcp {}", config.endpoint);
        Self {
            config,
            encoder,
            label,
            stream: None,
        }
    }

    /// Whether a controller accepts connections at `endpoint`.
    pub fn can_connect(endpoint: &Endpoint, cancel: &CancelToken) -> bool {
        match connect_stream(endpoint, Duration::from_secs(1), cancel) {
            Ok(stream) => {
                let _ = stream.shutdown(Shutdown::Both);
                true
            }
            Err(e) => {
                debug!("Probe of {} failed: {}", endpoint, e);
                false
            }
        }
    }

    fn stream(&mut self) -> Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| Error::Transport("not connected".into()))
    }
}

impl OutputBackend for TcpBackend {
    type Payload = String;

    fn name(&self) -> &str {
        &self.label
    }

    fn connect(&mut self, cancel: &CancelToken) -> Result<()> {
        info!("Connecting to {}", self.config.endpoint);
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let stream = connect_stream(&self.config.endpoint, timeout, cancel)?;

        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(POLL_READ_TIMEOUT))?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            debug!("Closed connection to {}", self.config.endpoint);
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Log anything the controller sends back.
    fn poll(&mut self) -> Result<()> {
        let mut buf = [0u8; 1024];
        let stream = self.stream()?;
        match stream.read(&mut buf) {
            Ok(0) => Err(Error::Transport("connection closed by controller".into())),
            Ok(n) => {
                debug!("Received \"{}\"", String::from_utf8_lossy(&buf[..n]).trim_end());
                Ok(())
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(()),
            Err(e) => Err(Error::Transport(e.to_string())),
        }
    }

    fn update_mode(&self) -> UpdateMode {
        self.config.update_mode
    }

    fn send_dirty_only(&self) -> bool {
        self.config.send_dirty_values_only
    }

    fn encode(&self, frame: &Frame<'_>) -> Option<String> {
        self.encoder.encode(frame, &())
    }

    fn encode_keyframe(&self, axis: Axis, value: f64, duration: Duration) -> Option<String> {
        Some(self.encoder.keyframe_line(axis, value, duration))
    }

    fn send(&mut self, payload: String, _cancel: &CancelToken) -> Result<()> {
        trace!("Sending \"{}\"", payload.trim_end());
        let stream = self.stream()?;
        stream
            .write_all(payload.as_bytes())
            .map_err(|e| Error::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::AxisValues;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;

    fn listener() -> (TcpListener, Endpoint) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, Endpoint::new("127.0.0.1", port))
    }

    fn backend(endpoint: Endpoint) -> TcpBackend {
        TcpBackend::new(TcpConfig::builder().endpoint(endpoint).build())
    }

    #[test]
    fn test_sends_encoded_line() {
        let (listener, endpoint) = listener();
        let mut backend = backend(endpoint);
        backend.connect(&CancelToken::new()).unwrap();
        let (peer, _) = listener.accept().unwrap();

        let mut values = AxisValues::unknown();
        values[Axis::L0] = 0.42;
        let frame = Frame {
            values: &values,
            axes: &[Axis::L0],
            elapsed: Duration::from_millis(16),
            interval: Duration::from_millis(16),
        };
        let payload = backend.encode(&frame).unwrap();
        backend.send(payload, &CancelToken::new()).unwrap();

        let mut line = String::new();
        BufReader::new(peer).read_line(&mut line).unwrap();
        assert_eq!(line, "L0420I16\n");
    }

    #[test]
    fn test_poll_tolerates_silence_and_reads_data() {
        let (listener, endpoint) = listener();
        let mut backend = backend(endpoint);
        backend.connect(&CancelToken::new()).unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        backend.poll().unwrap();
        peer.write_all(b"TCode v0.3\n").unwrap();
        backend.poll().unwrap();
    }

    #[test]
    fn test_poll_reports_closed_peer() {
        let (listener, endpoint) = listener();
        let mut backend = backend(endpoint);
        backend.connect(&CancelToken::new()).unwrap();
        let (peer, _) = listener.accept().unwrap();
        drop(peer);

        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            match backend.poll() {
                Err(Error::Transport(_)) => break,
                Ok(()) => assert!(Instant::now() < deadline, "close not observed"),
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
    }

    #[test]
    fn test_refused_connection_fails() {
        let (listener, endpoint) = listener();
        drop(listener);

        let mut backend = backend(endpoint);
        let err = backend.connect(&CancelToken::new()).unwrap_err();
        assert!(matches!(err, Error::ConnectFailed { .. }));
        assert!(!backend.is_connected());
    }

    #[test]
    fn test_cancelled_connect() {
        let (_listener, endpoint) = listener();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = backend(endpoint).connect(&cancel).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_can_connect_probe() {
        let (listener, endpoint) = listener();
        assert!(TcpBackend::can_connect(&endpoint, &CancelToken::new()));
        drop(listener);
        assert!(!TcpBackend::can_connect(&endpoint, &CancelToken::new()));
    }

    #[test]
    fn test_send_without_connection_is_transport_error() {
        let (_listener, endpoint) = listener();
        let mut backend = backend(endpoint);
        assert!(matches!(
            backend.send("L0500\n".into(), &CancelToken::new()),
            Err(Error::Transport(_))
        ));
    }
}
