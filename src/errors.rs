// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the effect pipeline
//!
//! Each layer has its own error enum. Control-boundary errors are returned to
//! callers unchanged; capture, effect and segmentation errors are absorbed by
//! the frame loop; only a persistent [`SinkError`] ends the loop.

use thiserror::Error;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Result type for control-surface operations
pub type ControlResult<T> = Result<T, ControlError>;

/// Main application error type
#[derive(Debug, Clone, Error)]
pub enum AppError {
    /// Rejected control operation
    #[error("Control error: {0}")]
    Control(#[from] ControlError),
    /// Capture device errors
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),
    /// Virtual camera sink errors
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
    /// D-Bus service errors
    #[error("D-Bus error: {0}")]
    Dbus(String),
    /// Filesystem errors
    #[error("I/O error: {0}")]
    Io(String),
}

/// Errors returned by the control surface
///
/// None of these affect the running pipeline: a rejected call leaves the
/// effect chain and the capture session exactly as they were.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    /// Configuration failed the effect's parameter schema
    #[error("Invalid configuration for '{effect}': {reason}")]
    InvalidConfig { effect: String, reason: String },
    /// Effect type name is not one of the known kinds
    #[error("Unknown effect type '{0}'")]
    UnknownEffectType(String),
    /// Chain index does not exist
    #[error("Index {index} out of range (chain has {len} effects)")]
    IndexOutOfRange { index: i64, len: usize },
    /// Effect type is not present in the chain
    #[error("Effect '{0}' is not in the chain")]
    EffectNotFound(String),
    /// Capture device could not be opened
    #[error("Camera unavailable: {0}")]
    DeviceUnavailable(String),
    /// Pipeline is stopping and no longer accepts calls
    #[error("Pipeline is shutting down")]
    ShuttingDown,
}

impl ControlError {
    pub(crate) fn invalid(effect: impl Into<String>, reason: impl Into<String>) -> Self {
        ControlError::InvalidConfig {
            effect: effect.into(),
            reason: reason.into(),
        }
    }
}

/// Capture device errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// Device could not be opened at the requested mode
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),
    /// No frame arrived within the read timeout
    #[error("Timed out waiting for a frame")]
    ReadTimeout,
    /// Device produced an unusable frame or reported an error
    #[error("Read failed: {0}")]
    ReadError(String),
    /// Device reported a fatal error, usually because it was unplugged
    #[error("Device disconnected: {0}")]
    Disconnected(String),
    /// Read attempted while the session is not open
    #[error("Capture session is not open")]
    NotOpen,
    /// Session was shut down and cannot be reopened
    #[error("Capture session has shut down")]
    Retired,
}

/// Virtual camera sink errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// Sink could not be created or rejected a frame
    #[error("Sink unavailable: {0}")]
    Unavailable(String),
    /// Frame does not match the negotiated sink format
    #[error("Format mismatch: {0}")]
    FormatMismatch(String),
    /// Consumer notifications cannot be delivered
    #[error("Consumer events unavailable: {0}")]
    ConsumerEventsUnavailable(String),
}

/// Per-entry failure while applying the effect chain
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EffectError {
    /// The effect itself failed on this frame
    #[error("Effect '{effect}' failed: {reason}")]
    Apply { effect: String, reason: String },
    /// The tick's mask computation failed, so the effect was skipped
    #[error("Effect '{0}' skipped: no mask available")]
    MaskUnavailable(String),
}

/// Segmentation collaborator failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Segmentation failed: {0}")]
pub struct SegmentationError(pub String);

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<zbus::Error> for AppError {
    fn from(err: zbus::Error) -> Self {
        AppError::Dbus(err.to_string())
    }
}
