use crate::stream_mode::{Modality, StreamMode};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DepthcamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Synchronization error: {0}")]
    Sync(#[from] SyncError),

    #[error("System error: {message}")]
    System { message: String },
}

/// Errors raised by the device capability interface and stream control
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Device index {index} out of range, {available} devices found")]
    IndexOutOfRange { index: usize, available: usize },

    #[error("{modality} stream mode {width} x {height} @ {fps} not supported")]
    UnsupportedMode {
        modality: Modality,
        width: u32,
        height: u32,
        fps: u32,
    },

    #[error("Device does not expose a {modality} stream")]
    MissingModality { modality: Modality },

    #[error("Stream mode {requested} not available, device offers {available}")]
    ModeNotAvailable {
        requested: StreamMode,
        available: StreamMode,
    },

    #[error("Driver error: {details}")]
    Driver { details: String },

    #[error("Device lost: {connection}")]
    DeviceLost { connection: String },
}

/// Per-frame decode failures. Callback handlers drop these locally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame carries {actual} data, expected {expected}")]
    WrongModality { expected: Modality, actual: Modality },

    #[error("Frame {width}x{height} cannot be decoded into a {target_width}x{target_height} buffer")]
    DimensionMismatch {
        width: u32,
        height: u32,
        target_width: u32,
        target_height: u32,
    },

    #[error("Frame payload truncated: expected {expected} samples, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("No {modality} buffer allocated for device {connection}")]
    MissingBuffer { modality: Modality, connection: String },
}

/// Errors surfaced by the rendezvous
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Timed out after {waited:?} waiting for {mode} (ready: {ready})")]
    Timeout {
        mode: StreamMode,
        ready: StreamMode,
        waited: Duration,
    },

    #[error("Wait cancelled")]
    Cancelled,

    #[error("Waiting for {expected}, but {requested} is now requested")]
    ModeChanged {
        expected: StreamMode,
        requested: StreamMode,
    },

    #[error("Synchronizer has been shut down")]
    ShutDown,

    #[error("Device lost: {connection}")]
    DeviceLost { connection: String },
}

impl DepthcamError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    /// Whether the caller may retry the same operation
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DepthcamError::Sync(SyncError::Timeout { .. })
                | DepthcamError::Sync(SyncError::Cancelled)
                | DepthcamError::Sync(SyncError::ModeChanged { .. })
        )
    }

    /// True for the distinct "device lost" condition, whichever layer reported it
    pub fn is_device_lost(&self) -> bool {
        matches!(
            self,
            DepthcamError::Device(DeviceError::DeviceLost { .. })
                | DepthcamError::Sync(SyncError::DeviceLost { .. })
        )
    }
}

impl DeviceError {
    pub fn driver<S: Into<String>>(details: S) -> Self {
        Self::Driver {
            details: details.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DepthcamError>;
