//! The seam between the reconciler and whatever carries flow requests to
//! switches.

use async_trait::async_trait;

use crate::error::TransportResult;
use crate::types::{FlowDelete, FlowEntry, FlowSnapshot, SwitchId};

/// Asynchronous access to installed flows and to flow install/delete
/// requests. Dispatch is fire-and-forget per batch: a successful call means
/// the request was accepted, not that every flow reached the switch.
#[async_trait]
pub trait FlowTransport: Send + Sync {
    /// Every installed flow, keyed by switch. Never cached by callers.
    async fn installed_flows(&self) -> TransportResult<FlowSnapshot>;

    /// Switches currently known to the controller.
    async fn switches(&self) -> TransportResult<Vec<SwitchId>>;

    async fn install(&self, switch: &str, flows: &[FlowEntry]) -> TransportResult<()>;

    async fn delete(&self, switch: &str, flows: &[FlowDelete]) -> TransportResult<()>;
}
