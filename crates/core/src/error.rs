pub use recall_native_utils::audio::DecodeError;

/// Microphone or speaker could not be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),
    #[error("no audio device available: {0}")]
    NoDevice(String),
    #[error("audio stream error: {0}")]
    Stream(String),
}

/// The realtime connection was rejected, dropped or failed mid-session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection rejected: {0}")]
    Rejected(String),
    #[error("connection closed: {0}")]
    Closed(String),
    #[error("connection error: {0}")]
    Io(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("session orchestrator has stopped")]
    Stopped,
}
