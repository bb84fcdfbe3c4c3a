//! Flow transport error types.

use thiserror::Error;

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failure or timeout.
    #[error("request failed: {0}")]
    Request(String),

    #[error("flow manager returned {status}: {body}")]
    Server { status: u16, body: String },

    #[error("flow manager rejected request with {status}: {body}")]
    Client { status: u16, body: String },

    #[error("undecodable response: {0}")]
    Decode(String),

    #[error("invalid switch id: {0}")]
    InvalidSwitchId(String),
}

impl TransportError {
    /// Errors worth another attempt: connection failures and 5xx responses.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Request(_) | TransportError::Server { .. })
    }
}
