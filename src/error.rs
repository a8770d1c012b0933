use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a scan session can end in the `Failed` state.
///
/// This is a closed set: providers and frame sources report their own richer
/// errors, and the session controller resolves them into one of these kinds
/// before anything is surfaced to the caller or the result sink. Raw platform
/// error details are logged once at the point of resolution and then dropped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionFailure {
    #[error("no camera capability is available on this platform")]
    CameraUnavailable,

    #[error("camera permission denied")]
    PermissionDenied,

    #[error("no camera device found")]
    DeviceNotFound,

    #[error("camera device unsupported")]
    DeviceUnsupported,

    #[error("frame buffer does not match frame dimensions")]
    InvalidFrameBuffer,

    #[error("camera stream terminated unexpectedly")]
    StreamTerminated,

    #[error("video playback failed")]
    PlaybackFailed,
}

/// Refusal reasons a camera provider may return from `acquire`.
///
/// The `details` strings carry platform-specific context for logging; they
/// never travel past the session controller.
#[derive(Error, Debug)]
pub enum AcquireError {
    #[error("camera permission denied: {details}")]
    PermissionDenied { details: String },

    #[error("no camera device found: {details}")]
    DeviceNotFound { details: String },

    #[error("camera device unsupported: {details}")]
    DeviceUnsupported { details: String },
}

impl AcquireError {
    /// Resolve the refusal into the closed session failure set.
    pub fn failure_kind(&self) -> SessionFailure {
        match self {
            AcquireError::PermissionDenied { .. } => SessionFailure::PermissionDenied,
            AcquireError::DeviceNotFound { .. } => SessionFailure::DeviceNotFound,
            AcquireError::DeviceUnsupported { .. } => SessionFailure::DeviceUnsupported,
        }
    }
}

/// Fatal conditions reported by a live frame source.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("stream terminated: {details}")]
    Terminated { details: String },

    #[error("playback failed: {details}")]
    Playback { details: String },
}

impl StreamError {
    /// Resolve the stream fault into the closed session failure set.
    pub fn failure_kind(&self) -> SessionFailure {
        match self {
            StreamError::Terminated { .. } => SessionFailure::StreamTerminated,
            StreamError::Playback { .. } => SessionFailure::PlaybackFailed,
        }
    }
}

/// Contract violations reported by a decoder adapter.
///
/// A frame with no decodable QR symbol is a miss, not an error; the only
/// error a decoder may raise is a pixel buffer that does not match the
/// dimensions it was handed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid frame buffer: expected {expected} bytes for {width}x{height} RGBA, got {actual}")]
    InvalidFrameBuffer {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },
}

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Failed to read history file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write history file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode history: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum QrScanError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] toml::de::Error),

    #[error("Scan session failed: {0}")]
    Session(#[from] SessionFailure),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl QrScanError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, QrScanError>;
