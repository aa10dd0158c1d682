//! Error types for the transfer engine.
//!
//! Every fallible operation returns one of the enums below wrapped in
//! [`Error`]. Nothing in the engine panics on a transport or validation
//! failure; the caller decides what to show the user.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error returned by session and scheduler operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Port(#[from] PortError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    QueueFull(#[from] QueueFull),

    #[error(transparent)]
    FileIo(#[from] FileIoError),
}

/// Failures of the serial connection itself.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PortError {
    /// No port name was supplied.
    #[error("No port selected")]
    NoPortSelected,

    /// The OS refused access; usually another program holds the port.
    #[error("Permission denied opening {port}: the port may be occupied")]
    PermissionDenied { port: String },

    #[error("Can not open {port} with these parameters: {reason}")]
    Open { port: String, reason: String },

    /// A byte size or stop bit count the port cannot be opened with.
    #[error("Unsupported {setting}: {value}")]
    UnsupportedSetting { setting: &'static str, value: u8 },

    #[error("Serial port is not open")]
    NotOpen,

    /// Port enumeration is refused while a port is open.
    #[error("Close the port before scanning for ports")]
    Busy,

    #[error("Serial write error: {0}")]
    Write(String),

    #[error("Serial read error: {0}")]
    Read(String),

    #[error("Could not enumerate serial ports: {0}")]
    Enumerate(String),
}

/// Rejected user input or send-mode configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Not correct hex format data")]
    InvalidHexFormat,

    #[error("Cycle time is not set")]
    MissingCycleInterval,

    #[error("Cycle send time should be greater than 0")]
    ZeroCycleInterval,

    #[error("Send data is empty")]
    EmptyPayload,

    /// Two periodic modes were requested at once; both are now inactive.
    #[error("Conflicting cycle send modes, all of them were deactivated")]
    ConflictingCycleModes,

    #[error("No send slot numbered {0} (slots are 1..=6)")]
    NoSuchSlot(usize),
}

/// Failures while loading a send file.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    #[error("Send file does not exist: {0}")]
    NotFound(PathBuf),

    #[error("Error reading send file {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("Malformed send script: {0}")]
    Malformed(String),

    #[error("Send script is empty")]
    Empty,

    /// Item `index` (0-based) is not valid hex in a hex-mode script.
    #[error("Item {index} of the send script is not valid hex")]
    InvalidHexItem { index: usize },
}

/// The receive queue is saturated; the chunk was not stored.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Receive queue is full")]
pub struct QueueFull;

/// Failures on auxiliary files (received-data dump, encoding probe).
#[derive(Error, Debug)]
pub enum FileIoError {
    #[error("Error writing received data into {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error reading {path} to predict its encoding: {source}")]
    PredictEncoding {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_errors_keep_their_message() {
        let err: Error = ValidationError::InvalidHexFormat.into();
        assert_eq!(err.to_string(), "Not correct hex format data");

        let err: Error = PortError::PermissionDenied { port: "/dev/ttyUSB0".into() }.into();
        assert!(err.to_string().contains("/dev/ttyUSB0"));
    }

    #[test]
    fn queue_full_converts_into_error() {
        let err: Error = QueueFull.into();
        assert!(matches!(err, Error::QueueFull(_)));
    }
}
