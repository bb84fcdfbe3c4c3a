//! Reconciliation error types.

use tablegrid_flows::{InvalidSwitchId, TransportError};
use tablegrid_lifecycle::LifecycleError;
use tablegrid_state::StateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("flow transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("pipeline store error: {0}")]
    State(#[from] StateError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Cookie(#[from] InvalidSwitchId),
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
