//! WebSocket client for the device-bus server.
//!
//! One I/O thread owns the socket. Requests are queued to it and complete
//! through a per-id reply channel, so any number of requests can be in
//! flight while the caller waits on all of them at once.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use tracing::{debug, info, trace, warn};
use tungstenite::handshake::HandshakeError;
use tungstenite::{Message, WebSocket};

use super::protocol::{ClientMessage, MESSAGE_VERSION, ServerMessage};
use super::CommandSink;
use crate::backend::tcp::connect_stream;
use crate::cancel::CancelToken;
use crate::config::Endpoint;
use crate::devices::DeviceEvent;
use crate::encode::DeviceCommand;
use crate::error::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Socket read timeout of the I/O thread; bounds outgoing latency too.
const IO_POLL_INTERVAL: Duration = Duration::from_millis(2);
const HANDSHAKE_POLL_INTERVAL: Duration = Duration::from_millis(50);

type Reply = Sender<Result<()>>;

#[derive(Default)]
struct Shared {
    pending: Mutex<HashMap<u32, Reply>>,
    failure: Mutex<Option<String>>,
    alive: AtomicBool,
    last_id: AtomicU32,
}

impl Shared {
    /// Message ids start at 1; 0 is reserved for server notifications.
    fn next_id(&self) -> u32 {
        self.last_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn resolve(&self, id: u32, result: Result<()>) {
        let reply = self.pending.lock().ok().and_then(|mut p| p.remove(&id));
        match reply {
            Some(reply) => {
                let _ = reply.send(result);
            }
            None => {
                if let Err(e) = result {
                    warn!("Server error for unknown request {}: {}", id, e);
                }
            }
        }
    }

    fn fail(&self, message: String) {
        warn!("Device bus connection lost: {}", message);
        if let Ok(mut failure) = self.failure.lock() {
            failure.get_or_insert(message);
        }
        self.alive.store(false, Ordering::SeqCst);
        // Dropping the reply senders wakes every waiter.
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
    }

    fn failure(&self) -> Error {
        let message = self
            .failure
            .lock()
            .ok()
            .and_then(|f| f.clone())
            .unwrap_or_else(|| "connection closed".into());
        Error::Transport(message)
    }
}

/// Handle to a pending request.
#[derive(Debug)]
pub struct Ticket {
    id: u32,
    reply: Receiver<Result<()>>,
}

pub struct DeviceBusClient {
    endpoint: Endpoint,
    shared: Arc<Shared>,
    outgoing: Sender<ClientMessage>,
    events: Receiver<DeviceEvent>,
    cancel: CancelToken,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceBusClient {
    /// Open the socket, perform the WebSocket upgrade and the server handshake.
    ///
    /// The server's current device list is requested as part of the
    /// handshake; its entries arrive as [`DeviceEvent::Added`].
    pub fn connect(endpoint: &Endpoint, client_name: &str, cancel: &CancelToken) -> Result<Self> {
        let stream = connect_stream(endpoint, CONNECT_TIMEOUT, cancel)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(HANDSHAKE_POLL_INTERVAL))?;
        let socket = upgrade(endpoint, stream, cancel)?;
        socket.get_ref().set_read_timeout(Some(IO_POLL_INTERVAL))?;

        let shared = Arc::new(Shared::default());
        shared.alive.store(true, Ordering::SeqCst);
        let (outgoing_tx, outgoing_rx) = unbounded();
        let (events_tx, events_rx) = unbounded();
        let io_cancel = cancel.child();

        let thread = {
            let shared = Arc::clone(&shared);
            let io_cancel = io_cancel.clone();
            thread::Builder::new()
                .name("device-bus-io".into())
                .spawn(move || {
                    IoLoop {
                        socket,
                        shared,
                        outgoing: outgoing_rx,
                        events: events_tx,
                        ping_interval: None,
                        last_ping: Instant::now(),
                    }
                    .run(&io_cancel)
                })?
        };

        let client = Self {
            endpoint: endpoint.clone(),
            shared,
            outgoing: outgoing_tx,
            events: events_rx,
            cancel: io_cancel,
            thread: Mutex::new(Some(thread)),
        };

        let handshake = client
            .request(
                |id| ClientMessage::RequestServerInfo {
                    id,
                    client_name: client_name.to_string(),
                    message_version: MESSAGE_VERSION,
                },
                REQUEST_TIMEOUT,
                cancel,
            )
            .and_then(|()| {
                client.request(
                    |id| ClientMessage::RequestDeviceList { id },
                    REQUEST_TIMEOUT,
                    cancel,
                )
            });

        if let Err(e) = handshake {
            client.close();
            return Err(match e {
                Error::Cancelled => Error::Cancelled,
                other => Error::ConnectFailed {
                    endpoint: endpoint.to_string(),
                    message: other.to_string(),
                },
            });
        }

        info!("Connected to device bus at {}", endpoint);
        Ok(client)
    }

    /// Whether a device-bus server completes the handshake at `endpoint`.
    pub fn can_connect(endpoint: &Endpoint, cancel: &CancelToken) -> bool {
        match Self::connect(endpoint, "axislink-probe", cancel) {
            Ok(client) => {
                client.close();
                true
            }
            Err(e) => {
                debug!("Probe of {} failed: {}", endpoint, e);
                false
            }
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    /// Error describing why the connection is gone.
    pub fn failure(&self) -> Error {
        self.shared.failure()
    }

    /// Discovery notifications in arrival order.
    pub fn events(&self) -> &Receiver<DeviceEvent> {
        &self.events
    }

    /// Queue a request without waiting for the reply.
    pub fn submit<F>(&self, build: F) -> Result<Ticket>
    where
        F: FnOnce(u32) -> ClientMessage,
    {
        if !self.is_alive() {
            return Err(self.failure());
        }

        let id = self.shared.next_id();
        let (reply_tx, reply_rx) = bounded(1);
        if let Ok(mut pending) = self.shared.pending.lock() {
            pending.insert(id, reply_tx);
        }

        if self.outgoing.send(build(id)).is_err() {
            self.forget(id);
            return Err(self.failure());
        }
        Ok(Ticket {
            id,
            reply: reply_rx,
        })
    }

    /// Wait for a reply until `deadline`.
    pub fn wait(&self, ticket: Ticket, deadline: Instant) -> Result<()> {
        match ticket.reply.recv_deadline(deadline) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                self.forget(ticket.id);
                Err(Error::Transport(format!("request {} timed out", ticket.id)))
            }
            Err(RecvTimeoutError::Disconnected) => Err(self.failure()),
        }
    }

    /// Submit and wait, observing `cancel` while waiting.
    pub fn request<F>(&self, build: F, timeout: Duration, cancel: &CancelToken) -> Result<()>
    where
        F: FnOnce(u32) -> ClientMessage,
    {
        let ticket = self.submit(build)?;
        let deadline = Instant::now() + timeout;
        loop {
            if cancel.is_cancelled() {
                self.forget(ticket.id);
                return Err(Error::Cancelled);
            }
            let slice = (Instant::now() + HANDSHAKE_POLL_INTERVAL).min(deadline);
            match ticket.reply.recv_deadline(slice) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Timeout) if Instant::now() < deadline => continue,
                Err(RecvTimeoutError::Timeout) => {
                    self.forget(ticket.id);
                    return Err(Error::Transport(format!("request {} timed out", ticket.id)));
                }
                Err(RecvTimeoutError::Disconnected) => return Err(self.failure()),
            }
        }
    }

    /// Stop the I/O thread and close the socket. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
        let thread = self.thread.lock().ok().and_then(|mut t| t.take());
        if let Some(thread) = thread
            && thread.join().is_err()
        {
            warn!("Device bus I/O thread panicked");
        }
        self.shared.alive.store(false, Ordering::SeqCst);
    }

    fn forget(&self, id: u32) {
        if let Ok(mut pending) = self.shared.pending.lock() {
            pending.remove(&id);
        }
    }
}

impl Drop for DeviceBusClient {
    fn drop(&mut self) {
        self.close();
    }
}

impl CommandSink for DeviceBusClient {
    type Ticket = Ticket;

    fn submit(&self, command: &DeviceCommand) -> Result<Ticket> {
        DeviceBusClient::submit(self, |id| ClientMessage::command(id, command))
    }

    fn settle(&self, ticket: Ticket, deadline: Instant) -> Result<()> {
        self.wait(ticket, deadline)
    }
}

fn upgrade(
    endpoint: &Endpoint,
    stream: TcpStream,
    cancel: &CancelToken,
) -> Result<WebSocket<TcpStream>> {
    let failed = |message: String| Error::ConnectFailed {
        endpoint: endpoint.to_string(),
        message,
    };

    let mut attempt = tungstenite::client(endpoint.ws_url(), stream);
    loop {
        match attempt {
            Ok((socket, _response)) => return Ok(socket),
            Err(HandshakeError::Interrupted(mid)) => {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                attempt = mid.handshake();
            }
            Err(HandshakeError::Failure(e)) => return Err(failed(e.to_string())),
        }
    }
}

fn is_timeout(error: &tungstenite::Error) -> bool {
    matches!(error, tungstenite::Error::Io(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut))
}

struct IoLoop {
    socket: WebSocket<TcpStream>,
    shared: Arc<Shared>,
    outgoing: Receiver<ClientMessage>,
    events: Sender<DeviceEvent>,
    ping_interval: Option<Duration>,
    last_ping: Instant,
}

impl IoLoop {
    fn run(mut self, cancel: &CancelToken) {
        debug!("Device bus I/O thread started");
        if let Err(e) = self.pump(cancel) {
            self.shared.fail(e.to_string());
        }
        let _ = self.socket.close(None);
        let _ = self.socket.flush();
        self.shared.alive.store(false, Ordering::SeqCst);
        debug!("Device bus I/O thread stopped");
    }

    fn pump(&mut self, cancel: &CancelToken) -> Result<()> {
        while !cancel.is_cancelled() {
            while let Ok(message) = self.outgoing.try_recv() {
                self.write(&message)?;
            }

            if let Some(interval) = self.ping_interval
                && self.last_ping.elapsed() >= interval
            {
                self.last_ping = Instant::now();
                // The reply is not awaited; the server drops us if pings stop.
                let id = self.shared.next_id();
                self.write(&ClientMessage::Ping { id })?;
            }

            match self.socket.read() {
                Ok(Message::Text(text)) => self.handle_frame(&text),
                Ok(Message::Close(frame)) => {
                    return Err(Error::Transport(format!("server closed connection ({:?})", frame)));
                }
                Ok(_) => {}
                Err(e) if is_timeout(&e) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn write(&mut self, message: &ClientMessage) -> Result<()> {
        let frame = message.to_frame()?;
        trace!("Sending {}", frame);
        match self.socket.send(Message::Text(frame)) {
            Ok(()) => Ok(()),
            Err(e) if is_timeout(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn handle_frame(&mut self, text: &str) {
        trace!("Received {}", text);
        let messages = match ServerMessage::parse_frame(text) {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Discarding malformed device bus frame: {}", e);
                return;
            }
        };

        for message in messages {
            match message {
                Ok(message) => self.handle_message(message),
                Err(e) => debug!("Ignoring unsupported server message: {}", e),
            }
        }
    }

    fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Ok { id } => self.shared.resolve(id, Ok(())),
            ServerMessage::Error {
                id,
                error_message,
                error_code,
            } => self.shared.resolve(
                id,
                Err(Error::Protocol(format!("{} (code {})", error_message, error_code))),
            ),
            ServerMessage::ServerInfo {
                id,
                server_name,
                message_version,
                max_ping_time,
            } => {
                info!(
                    "Device bus server \"{}\" (message version {})",
                    server_name, message_version
                );
                if max_ping_time > 0 {
                    self.ping_interval = Some(Duration::from_millis(max_ping_time / 2));
                }
                self.shared.resolve(id, Ok(()));
            }
            ServerMessage::DeviceList { id, devices } => {
                for device in &devices {
                    let _ = self.events.send(device.into());
                }
                self.shared.resolve(id, Ok(()));
            }
            ServerMessage::DeviceAdded { device, .. } => {
                let _ = self.events.send((&device).into());
            }
            ServerMessage::DeviceRemoved { device_index, .. } => {
                let _ = self.events.send(DeviceEvent::Removed(device_index));
            }
            ServerMessage::ScanningFinished { .. } => {
                let _ = self.events.send(DeviceEvent::ScanningFinished);
            }
        }
    }
}
