use crate::types::DeviceId;

/// Errors that can occur when talking to the Myo bridge.
#[derive(Debug, thiserror::Error)]
pub enum MyoError {
    #[error("Transport unavailable at {url}: {source}")]
    TransportUnavailable {
        url: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error("WebSocket error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("No device registered with id {0}")]
    UnknownDevice(DeviceId),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Hub already started")]
    AlreadyStarted,

    #[error("Session stopped")]
    SessionStopped,

    #[error("Timeout waiting for notification")]
    Timeout,

    #[error("Channel disconnected")]
    ChannelDisconnected,
}
