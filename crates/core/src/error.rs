use std::io;

use serde::{Deserialize, Serialize};

/// Result alias that carries the custom [`LightSyncError`] type.
pub type Result<T> = std::result::Result<T, LightSyncError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum LightSyncError {
    /// A session is already running; it has to be stopped first.
    #[error("a session is already active, stop it first")]
    Busy,
    /// Beat mode was requested while no analysed track is queued.
    #[error("the track queue is empty")]
    EmptyQueue,
    /// The track at the head of the queue has no beats to play.
    #[error("track `{0}` has no beats")]
    EmptyTrack(String),
    /// Request parameters were rejected before any scheduler was spawned.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Binding or configuring the multicast socket failed.
    #[error("socket setup failed: {0}")]
    Socket(#[source] io::Error),
    /// Transmitting a frame failed. Sessions never retry.
    #[error("frame transmission failed: {0}")]
    Send(#[source] io::Error),
    /// A session started by this process ended with a latched error.
    #[error("session ended with an error: {0}")]
    Session(ErrorInfo),
    #[error("configuration error: {0}")]
    Config(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl LightSyncError {
    /// Creates an [`LightSyncError::InvalidInput`] from any message.
    pub fn invalid<T: Into<String>>(msg: T) -> Self {
        Self::InvalidInput(msg.into())
    }
}

/// Category of an error latched by a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Socket,
    Send,
    EmptyTrack,
    Internal,
}

/// Session-fatal error in the form surfaced once through the status snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<&LightSyncError> for ErrorInfo {
    fn from(err: &LightSyncError) -> Self {
        let kind = match err {
            LightSyncError::Socket(_) => ErrorKind::Socket,
            LightSyncError::Send(_) => ErrorKind::Send,
            LightSyncError::EmptyTrack(_) => ErrorKind::EmptyTrack,
            _ => ErrorKind::Internal,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}
