use thiserror::Error;

use crate::types::RejectionReason;

#[derive(Debug, Error)]
pub enum Error {
    #[error("exchange API error: {0}")]
    Exchange(String),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("decimal parse error: {0}")]
    Decimal(String),

    #[error("order rejected: {reason}")]
    Admission { reason: RejectionReason },

    #[error("venue rejected order: {0}")]
    VenueRejected(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
