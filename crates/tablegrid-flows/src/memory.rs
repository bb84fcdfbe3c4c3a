//! In-process flow transport.
//!
//! Keeps a flow table per switch, applies installs and deletes to it, and
//! records every dispatched batch in order. Failures can be scripted per
//! call. Used by tests across the workspace and by the daemon's
//! `--dry-run` mode.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{TransportError, TransportResult};
use crate::transport::FlowTransport;
use crate::types::{FlowDelete, FlowEntry, FlowSnapshot, InstalledFlow, SwitchId};

/// One batch handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Install { switch: SwitchId, flows: Vec<FlowEntry> },
    Delete { switch: SwitchId, flows: Vec<FlowDelete> },
}

impl Dispatch {
    pub fn switch(&self) -> &str {
        match self {
            Dispatch::Install { switch, .. } | Dispatch::Delete { switch, .. } => switch,
        }
    }
}

#[derive(Default)]
struct Inner {
    snapshot: FlowSnapshot,
    switches: Vec<SwitchId>,
    dispatched: Vec<Dispatch>,
    snapshot_calls: usize,
    snapshot_failures: VecDeque<TransportError>,
    failing_installs: HashSet<SwitchId>,
    failing_deletes: HashSet<SwitchId>,
}

#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing set of installed flows. Every switch in the
    /// snapshot is also reported by `switches()`.
    pub fn with_snapshot(snapshot: FlowSnapshot) -> Self {
        let switches = snapshot.keys().cloned().collect();
        Self {
            inner: Arc::new(Mutex::new(Inner {
                snapshot,
                switches,
                ..Default::default()
            })),
        }
    }

    /// Register a switch with no flows.
    pub async fn add_switch(&self, switch: &str) {
        let mut inner = self.inner.lock().await;
        if !inner.switches.iter().any(|s| s == switch) {
            inner.switches.push(switch.to_string());
        }
        inner.snapshot.entry(switch.to_string()).or_default();
    }

    /// Make the next `installed_flows` calls fail, one error per call.
    pub async fn fail_snapshot_with(&self, errors: impl IntoIterator<Item = TransportError>) {
        self.inner.lock().await.snapshot_failures.extend(errors);
    }

    pub async fn fail_installs_on(&self, switch: &str) {
        self.inner.lock().await.failing_installs.insert(switch.to_string());
    }

    pub async fn fail_deletes_on(&self, switch: &str) {
        self.inner.lock().await.failing_deletes.insert(switch.to_string());
    }

    /// Batches dispatched so far, in order.
    pub async fn dispatched(&self) -> Vec<Dispatch> {
        self.inner.lock().await.dispatched.clone()
    }

    pub async fn clear_dispatched(&self) {
        self.inner.lock().await.dispatched.clear();
    }

    pub async fn snapshot_calls(&self) -> usize {
        self.inner.lock().await.snapshot_calls
    }

    /// Current flows of one switch.
    pub async fn flows_on(&self, switch: &str) -> Vec<FlowEntry> {
        self.inner
            .lock()
            .await
            .snapshot
            .get(switch)
            .map(|flows| flows.iter().map(|f| f.flow.clone()).collect())
            .unwrap_or_default()
    }
}

fn matches_delete(flow: &FlowEntry, delete: &FlowDelete) -> bool {
    if flow.cookie & delete.cookie_mask != delete.cookie & delete.cookie_mask {
        return false;
    }
    if flow.table_id != delete.table_id {
        return false;
    }
    match &delete.match_fields {
        Some(m) => flow.non_empty_match() == Some(m),
        None => true,
    }
}

#[async_trait]
impl FlowTransport for MemoryTransport {
    async fn installed_flows(&self) -> TransportResult<FlowSnapshot> {
        let mut inner = self.inner.lock().await;
        inner.snapshot_calls += 1;
        if let Some(err) = inner.snapshot_failures.pop_front() {
            debug!(error = %err, "memory transport snapshot failure");
            return Err(err);
        }
        Ok(inner.snapshot.clone())
    }

    async fn switches(&self) -> TransportResult<Vec<SwitchId>> {
        Ok(self.inner.lock().await.switches.clone())
    }

    async fn install(&self, switch: &str, flows: &[FlowEntry]) -> TransportResult<()> {
        let mut inner = self.inner.lock().await;
        inner.dispatched.push(Dispatch::Install {
            switch: switch.to_string(),
            flows: flows.to_vec(),
        });
        if inner.failing_installs.contains(switch) {
            return Err(TransportError::Client {
                status: 400,
                body: format!("install rejected on {switch}"),
            });
        }
        let table = inner.snapshot.entry(switch.to_string()).or_default();
        table.extend(flows.iter().cloned().map(InstalledFlow::from));
        Ok(())
    }

    async fn delete(&self, switch: &str, flows: &[FlowDelete]) -> TransportResult<()> {
        let mut inner = self.inner.lock().await;
        inner.dispatched.push(Dispatch::Delete {
            switch: switch.to_string(),
            flows: flows.to_vec(),
        });
        if inner.failing_deletes.contains(switch) {
            return Err(TransportError::Client {
                status: 400,
                body: format!("delete rejected on {switch}"),
            });
        }
        if let Some(table) = inner.snapshot.get_mut(switch) {
            table.retain(|installed| !flows.iter().any(|d| matches_delete(&installed.flow, d)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SW: &str = "00:00:00:00:00:00:00:01";

    fn flow(cookie: u64, table_id: u8) -> FlowEntry {
        FlowEntry {
            owner: Some("mef_eline".into()),
            table_id,
            table_group: Some("evpl".into()),
            cookie,
            match_fields: Some(json!({"in_port": 1})),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn install_then_delete_updates_snapshot() {
        let transport = MemoryTransport::new();
        transport.add_switch(SW).await;

        transport.install(SW, &[flow(1, 0), flow(2, 0)]).await.unwrap();
        assert_eq!(transport.flows_on(SW).await.len(), 2);

        let delete = FlowDelete {
            cookie: 1,
            cookie_mask: u64::MAX,
            table_id: 0,
            match_fields: Some(json!({"in_port": 1})),
            owner: None,
        };
        transport.delete(SW, &[delete]).await.unwrap();
        let remaining = transport.flows_on(SW).await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].cookie, 2);
        assert_eq!(transport.dispatched().await.len(), 2);
    }

    #[tokio::test]
    async fn delete_respects_table_and_match() {
        let transport = MemoryTransport::new();
        transport.install(SW, &[flow(1, 0), flow(1, 3)]).await.unwrap();
        let delete = FlowDelete {
            cookie: 1,
            cookie_mask: u64::MAX,
            table_id: 3,
            match_fields: Some(json!({"in_port": 9})),
            owner: None,
        };
        transport.delete(SW, &[delete]).await.unwrap();
        assert_eq!(transport.flows_on(SW).await.len(), 2);
    }

    #[tokio::test]
    async fn scripted_snapshot_failures_are_consumed_in_order() {
        let transport = MemoryTransport::new();
        transport
            .fail_snapshot_with([TransportError::Request("refused".into())])
            .await;
        assert!(transport.installed_flows().await.is_err());
        assert!(transport.installed_flows().await.is_ok());
        assert_eq!(transport.snapshot_calls().await, 2);
    }

    #[tokio::test]
    async fn failing_switch_records_but_rejects() {
        let transport = MemoryTransport::new();
        transport.fail_installs_on(SW).await;
        assert!(transport.install(SW, &[flow(1, 0)]).await.is_err());
        assert!(transport.flows_on(SW).await.is_empty());
        assert_eq!(transport.dispatched().await[0].switch(), SW);
    }
}
