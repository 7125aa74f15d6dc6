use std::io;

use thiserror::Error;

/// Transport failures: the link could not be opened, or died under a read.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("invalid mac address: {0}")]
    InvalidAddress(String),
    #[error("rfcomm connection failed: {0}")]
    Connect(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
}

/// Rejections at the command boundary. Nothing has changed state when one of
/// these is returned; the message is suitable for showing to the user.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("invalid mac address: {0}")]
    InvalidAddress(String),
    #[error("session label must not be empty")]
    EmptyLabel,
    #[error("session duration must be 1-10 minutes, got {0}")]
    DurationOutOfRange(u32),
    #[error("not connected to a device")]
    NotConnected,
    #[error("a connection is already open or in progress")]
    ConnectionBusy,
    #[error("a session is already running")]
    SessionActive,
    #[error("no session is running")]
    NoSession,
}

/// Submission failures. Folded into the session outcome text by the caller,
/// never propagated as a crash.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

pub type Result<T, E = LinkError> = std::result::Result<T, E>;
