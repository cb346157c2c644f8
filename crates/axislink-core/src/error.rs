use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to connect to {endpoint}: {message}")]
    ConnectFailed { endpoint: String, message: String },

    #[error("Connection attempt cancelled")]
    Cancelled,

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Device \"{device}\" rejected command: {message}")]
    Device { device: String, message: String },

    #[error("Invalid endpoint \"{0}\": expected host:port")]
    InvalidEndpoint(String),

    #[error(
        "Duplicate binding: feature {feature_index} of \"{device_name}\" is already bound for {command}"
    )]
    DuplicateBinding {
        device_name: String,
        command: String,
        feature_index: u32,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Malformed telemetry frame: {0}")]
    MalformedFrame(String),

    #[error("Audio output error: {0}")]
    Audio(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is a "file not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }

    /// Check if this error was produced by cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Configuration errors are rejected before any connection attempt
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidEndpoint(_) | Error::DuplicateBinding { .. } | Error::InvalidConfig(_)
        )
    }
}
