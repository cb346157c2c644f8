use super::device_bus::DeviceBusClient;
use super::tcp::TcpBackend;
use crate::cancel::CancelToken;
use crate::config::BackendConfig;

/// Check whether a backend's endpoint is reachable without starting a session.
///
/// Audio output has no endpoint and always reports true.
pub fn probe(config: &BackendConfig, cancel: &CancelToken) -> bool {
    match config {
        BackendConfig::Tcp(c) => TcpBackend::can_connect(&c.endpoint, cancel),
        BackendConfig::DeviceBus(c) => DeviceBusClient::can_connect(&c.endpoint, cancel),
        BackendConfig::Audio(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AudioConfig, Endpoint, TcpConfig};
    use std::net::TcpListener;

    #[test]
    fn test_probe_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = BackendConfig::Tcp(
            TcpConfig::builder()
                .endpoint(Endpoint::new("127.0.0.1", port))
                .build(),
        );
        assert!(probe(&config, &CancelToken::new()));
    }

    #[test]
    fn test_probe_audio_is_always_reachable() {
        let config = BackendConfig::Audio(AudioConfig::default());
        assert!(probe(&config, &CancelToken::new()));
    }
}
