//! Lifecycle error types.

use tablegrid_state::{PipelineStatus, StateError};
use thiserror::Error;

pub type LifecycleResult<T> = Result<T, LifecycleError>;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("pipeline {0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("pipeline {id} cannot move from {from} to {to}")]
    IllegalTransition {
        id: String,
        from: PipelineStatus,
        to: PipelineStatus,
    },

    #[error("pipeline store error: {0}")]
    State(StateError),
}

impl From<StateError> for LifecycleError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotFound(id) => LifecycleError::NotFound(id),
            StateError::Conflict(msg) => LifecycleError::Conflict(msg),
            StateError::IllegalTransition { id, from, to } => {
                LifecycleError::IllegalTransition { id, from, to }
            }
            other => LifecycleError::State(other),
        }
    }
}
