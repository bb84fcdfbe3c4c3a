//! Error types for the pipeline store.

use thiserror::Error;

use crate::types::PipelineStatus;

/// Result type alias for pipeline store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during pipeline store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("pipeline not found: {0}")]
    NotFound(String),

    #[error("pipeline {id} cannot move from {from} to {to}")]
    IllegalTransition {
        id: String,
        from: PipelineStatus,
        to: PipelineStatus,
    },

    #[error("conflict: {0}")]
    Conflict(String),
}
