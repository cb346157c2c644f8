//! Drives a TCP output target end to end against a local listener.

use std::io::{BufRead, BufReader, Read};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use axislink_core::config::Endpoint;
use axislink_core::{
    Axis, BackendConfig, CancelToken, ConnectionStatus, OutputTarget, SharedAxisValues,
    TargetConfig, TargetEvent, TargetEventKind, TcpConfig, ValueSources,
};
use crossbeam_channel::{Receiver, unbounded};

fn listener() -> (TcpListener, Endpoint) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, Endpoint::new("127.0.0.1", port))
}

fn wait_for_failure(events: &Receiver<TargetEvent>) -> Option<String> {
    while let Ok(event) = events.recv_timeout(Duration::from_secs(5)) {
        if let TargetEventKind::Failed { message } = event.kind {
            return Some(message);
        }
    }
    None
}

fn wait_for(events: &Receiver<TargetEvent>, wanted: &TargetEventKind) -> bool {
    while let Ok(event) = events.recv_timeout(Duration::from_secs(5)) {
        if &event.kind == wanted {
            return true;
        }
    }
    false
}

#[test]
fn test_streams_dirty_values_as_tcode_lines() {
    let (listener, endpoint) = listener();
    let values = SharedAxisValues::new();
    values.set(Axis::L0, 0.42);

    let config = TargetConfig::new(
        "tcode",
        BackendConfig::Tcp(TcpConfig::builder().endpoint(endpoint).update_rate(60).build()),
    );
    let (tx, rx) = unbounded();
    let mut target =
        OutputTarget::new(config, ValueSources::new(Arc::new(values.clone()))).with_events(tx);

    let cancel = CancelToken::new();
    target.connect(&cancel).unwrap();

    let (socket, _) = listener.accept().unwrap();
    socket.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut reader = BufReader::new(socket);

    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    assert_eq!(line, "L0420I16\n");

    assert!(wait_for(
        &rx,
        &TargetEventKind::StatusChanged(ConnectionStatus::Connected)
    ));
    assert_eq!(target.status(), ConnectionStatus::Connected);

    // only the changed axis goes out on the next line
    values.set(Axis::R0, 0.5);
    line.clear();
    reader.read_line(&mut line).unwrap();
    assert!(line.starts_with("R0500I"), "line: {:?}", line);
    assert!(!line.contains("L0"));

    target.disconnect();
    assert_eq!(target.status(), ConnectionStatus::Disconnected);
    assert!(!target.is_running());
}

#[test]
fn test_peer_close_reports_failure_once() {
    let (listener, endpoint) = listener();
    let values = SharedAxisValues::new();
    values.set(Axis::L0, 0.1);

    let config = TargetConfig::new(
        "tcode",
        BackendConfig::Tcp(TcpConfig::builder().endpoint(endpoint).build()),
    );
    let (tx, rx) = unbounded();
    let mut target =
        OutputTarget::new(config, ValueSources::new(Arc::new(values))).with_events(tx);
    target.connect(&CancelToken::new()).unwrap();

    let (socket, _) = listener.accept().unwrap();
    drop(socket);

    assert!(wait_for_failure(&rx).is_some());
    assert_eq!(target.status(), ConnectionStatus::Disconnected);

    while let Ok(event) = rx.recv_timeout(Duration::from_millis(300)) {
        assert!(!matches!(event.kind, TargetEventKind::Failed { .. }));
    }
    target.disconnect();
}

#[test]
fn test_unreachable_endpoint_reports_failure() {
    let (listener, endpoint) = listener();
    drop(listener);

    let tcp = TcpConfig::builder()
        .endpoint(endpoint)
        .connect_timeout_ms(500)
        .build();
    let config = TargetConfig::new("tcode", BackendConfig::Tcp(tcp));
    let (tx, rx) = unbounded();
    let mut target = OutputTarget::new(config, ValueSources::new(Arc::new(SharedAxisValues::new())))
        .with_events(tx);

    target.connect(&CancelToken::new()).unwrap();
    let message = wait_for_failure(&rx).unwrap();
    assert!(message.contains("127.0.0.1"), "message: {}", message);

    target.disconnect();
    assert_eq!(target.status(), ConnectionStatus::Disconnected);
}

#[test]
fn test_second_connect_replaces_session_in_flight() {
    let (listener, endpoint) = listener();
    let config = TargetConfig::new(
        "tcode",
        BackendConfig::Tcp(TcpConfig::builder().endpoint(endpoint).build()),
    );
    let (tx, rx) = unbounded();
    let mut target = OutputTarget::new(config, ValueSources::new(Arc::new(SharedAxisValues::new())))
        .with_events(tx);

    let cancel = CancelToken::new();
    target.connect(&cancel).unwrap();
    target.connect(&cancel).unwrap();

    let mut statuses = Vec::new();
    while let Ok(event) = rx.recv_timeout(Duration::from_secs(5)) {
        if let TargetEventKind::StatusChanged(status) = event.kind {
            statuses.push(status);
            let connecting = statuses
                .iter()
                .filter(|s| **s == ConnectionStatus::Connecting)
                .count();
            if connecting == 2 && status == ConnectionStatus::Connected {
                break;
            }
        }
    }

    // the first session may be cancelled before or after its connect completed
    let first_session_cancelled = [
        ConnectionStatus::Connecting,
        ConnectionStatus::Disconnected,
        ConnectionStatus::Connecting,
        ConnectionStatus::Connected,
    ];
    let first_session_torn_down = [
        ConnectionStatus::Connecting,
        ConnectionStatus::Connected,
        ConnectionStatus::Disconnecting,
        ConnectionStatus::Disconnected,
        ConnectionStatus::Connecting,
        ConnectionStatus::Connected,
    ];
    assert!(
        statuses == first_session_cancelled || statuses == first_session_torn_down,
        "statuses: {:?}",
        statuses
    );
    assert_eq!(target.status(), ConnectionStatus::Connected);
    assert!(target.is_running());

    // whatever the replaced session opened is closed again, the live one is not
    listener.set_nonblocking(true).unwrap();
    let mut sockets = Vec::new();
    let deadline = Instant::now() + Duration::from_millis(300);
    while Instant::now() < deadline {
        match listener.accept() {
            Ok((socket, _)) => sockets.push(socket),
            Err(_) => thread::sleep(Duration::from_millis(10)),
        }
    }
    let mut open = 0;
    for mut socket in sockets {
        socket.set_nonblocking(false).unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        let mut buf = [0u8; 16];
        if !matches!(socket.read(&mut buf), Ok(0)) {
            open += 1;
        }
    }
    assert_eq!(open, 1);

    target.disconnect();
    assert_eq!(target.status(), ConnectionStatus::Disconnected);
    assert!(!target.is_running());
    while let Ok(event) = rx.recv_timeout(Duration::from_millis(200)) {
        assert!(!matches!(event.kind, TargetEventKind::Failed { .. }));
    }
}
