use std::time::Duration;

use shared::error::ValidationErrors;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket connect failed: {0}")]
    Connect(String),
    #[error("websocket send failed: {0}")]
    Send(String),
    #[error("frame serialization failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("transport closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum JoinError {
    #[error("join rejected by server: {reason}")]
    Rejected { reason: String },
    #[error("join not acknowledged within {0:?}")]
    Timeout(Duration),
    #[error("session closed before join completed")]
    SessionClosed,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Rejected(ValidationErrors),
    #[error("no joined session")]
    NotJoined,
    #[error("acknowledgement not received within {0:?}")]
    Timeout(Duration),
    #[error("session closed before acknowledgement")]
    SessionClosed,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum MountError {
    #[error("transport connect failed after {attempts} attempts: {last}")]
    ConnectExhausted { attempts: usize, last: TransportError },
}
