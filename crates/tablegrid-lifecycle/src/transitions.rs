//! Allowed status transitions.
//!
//! Each target status lists the statuses a pipeline may be in for the
//! transition to apply. Re-entering the current status is allowed wherever
//! a retry of the same step must be a no-op.

use tablegrid_state::PipelineStatus::{self, *};

/// Statuses of *another* pipeline that make an enable request conflict:
/// every status except `disabled`.
pub const ENABLE_BLOCKERS: &[PipelineStatus] =
    &[Enabling, Enabled, EnablingError, Disabling, DisablingError];

/// Statuses from which a pipeline may move to `to`.
pub fn allowed_from(to: PipelineStatus) -> &'static [PipelineStatus] {
    match to {
        Enabling => &[Disabled, Enabling, Enabled, EnablingError, DisablingError],
        Enabled => &[Enabling, Enabled],
        // `enabled` is included for installation failures reported after
        // the engine already declared success.
        EnablingError => &[Enabling, Enabled, EnablingError],
        Disabling => &[Enabling, Enabled, EnablingError, Disabling, DisablingError],
        Disabled => &[Disabling, Disabled],
        DisablingError => &[Disabling, DisablingError],
    }
}

pub fn is_allowed(from: PipelineStatus, to: PipelineStatus) -> bool {
    allowed_from(to).contains(&from)
}
