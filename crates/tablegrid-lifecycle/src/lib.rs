//! tablegrid pipeline lifecycle: the status state machine.
//!
//! Every pipeline moves through `disabled → enabling → enabled` and back
//! through `disabling → disabled`, with `enabling_error` / `disabling_error`
//! as terminal failure states. Each transition is persisted through the
//! [`PipelineStore`](tablegrid_state::PipelineStore) as an atomic
//! compare-and-set.
//!
//! # Components
//!
//! - **`transitions`**: the allowed-source table for each target status
//! - **`machine`**: `PipelineLifecycle`, the transition functions

pub mod error;
pub mod machine;
pub mod transitions;

pub use error::{LifecycleError, LifecycleResult};
pub use machine::PipelineLifecycle;
pub use transitions::{allowed_from, ENABLE_BLOCKERS};
