//! Error types surfaced by the hub and the client actor.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Signaling error: {0}")]
    SignalingError(String),

    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    #[error("Channel not open to {0}")]
    ChannelNotOpen(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Relay authentication failed: {0}")]
    RelayAuthFailed(String),

    #[error("Not authenticated for relay")]
    RelayNotAuthenticated,

    #[error("Malformed frame: {0}")]
    MalformedFrame(#[source] serde_json::Error),

    #[error("Write failed: connection closed")]
    WriteFailed,
}

pub type Result<T> = std::result::Result<T, Error>;
