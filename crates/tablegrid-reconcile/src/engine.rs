//! Flow reconciliation.
//!
//! [`plan_reconciliation`] is the pure half: given the tables of the
//! effective layout and a snapshot of installed flows it stages, per switch,
//! the deletes and installs that move every owner's flows to their assigned
//! tables and bring the table-miss flows in line. [`ReconcileEngine`] is the
//! effectful half that fetches the snapshot, dispatches the plan and settles
//! the pipeline status.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use tablegrid_flows::{
    FlowDelete, FlowEntry, FlowErrorNotification, FlowSnapshot, FlowTransport, RetryPolicy,
    SwitchId, COOKIE_MASK_ALL,
};
use tablegrid_lifecycle::{LifecycleError, PipelineLifecycle};
use tablegrid_state::{Pipeline, PipelineId, PipelineStatus, TableEntry};
use tracing::{debug, error, info, warn};

use crate::error::{ReconcileError, ReconcileResult};
use crate::layout::DesiredLayout;
use crate::miss_flows::{desired_miss_flows, MissFlowManager};

// ── Planning ───────────────────────────────────────────────────────

/// Deletes and installs addressed to one switch. Deletes go first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SwitchPlan {
    pub deletes: Vec<FlowDelete>,
    pub installs: Vec<FlowEntry>,
}

impl SwitchPlan {
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.installs.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    /// Only switches with work to do appear here.
    pub switches: BTreeMap<SwitchId, SwitchPlan>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.switches.is_empty()
    }

    pub fn delete_count(&self) -> usize {
        self.switches.values().map(|p| p.deletes.len()).sum()
    }

    pub fn install_count(&self) -> usize {
        self.switches.values().map(|p| p.installs.len()).sum()
    }
}

/// Stage the operations that bring `snapshot` in line with `tables`.
///
/// Flows of owners absent from the layout, flows whose group is not mapped,
/// and the engine's own miss flows are never relocated. Switches come from
/// `switches` and from the snapshot keys.
pub fn plan_reconciliation(
    tables: &[TableEntry],
    snapshot: &FlowSnapshot,
    switches: &[SwitchId],
    miss_flows: &MissFlowManager,
) -> ReconcileResult<ReconcilePlan> {
    let layout = DesiredLayout::from_tables(tables);
    let desired_miss = desired_miss_flows(tables);

    let all_switches: BTreeSet<&str> = switches
        .iter()
        .map(String::as_str)
        .chain(snapshot.keys().map(String::as_str))
        .collect();

    let mut plan = ReconcilePlan::default();
    for switch in all_switches {
        let flows = snapshot.get(switch).map(Vec::as_slice).unwrap_or_default();
        let mut switch_plan = SwitchPlan::default();

        for installed in flows {
            let flow = &installed.flow;
            let Some(owner) = flow.owner.as_deref() else {
                continue;
            };
            if owner == miss_flows.owner() || !layout.contains_owner(owner) {
                continue;
            }
            let Some(group) = flow.table_group.as_deref() else {
                debug!(%switch, %owner, cookie = flow.cookie, "flow without table group left in place");
                continue;
            };
            let Some(target) = layout.table_for(owner, group) else {
                debug!(%switch, %owner, %group, "flow group not mapped; left in place");
                continue;
            };
            if target == flow.table_id {
                continue;
            }

            switch_plan.deletes.push(FlowDelete {
                cookie: flow.cookie,
                cookie_mask: COOKIE_MASK_ALL,
                table_id: flow.table_id,
                match_fields: flow.non_empty_match().cloned(),
                owner: None,
            });
            let mut moved = flow.clone();
            moved.table_id = target;
            switch_plan.installs.push(moved);
        }

        let (deletes, installs) = miss_flows.plan_for_switch(switch, flows, &desired_miss)?;
        switch_plan.deletes.extend(deletes);
        switch_plan.installs.extend(installs);

        if !switch_plan.is_empty() {
            plan.switches.insert(switch.to_string(), switch_plan);
        }
    }
    Ok(plan)
}

// ── Reports ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SwitchCounts {
    pub deletes: usize,
    pub installs: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoActivePipeline,
    AlreadyEnabled,
    ErrorStatus(PipelineStatus),
}

/// What one reconciliation run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileReport {
    Skipped {
        reason: SkipReason,
    },
    Applied {
        pipeline_id: PipelineId,
        /// Status after the run.
        status: PipelineStatus,
        switches: BTreeMap<SwitchId, SwitchCounts>,
    },
    Failed {
        pipeline_id: PipelineId,
        status: PipelineStatus,
        error: String,
    },
}

/// What became of an installation-failure notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FlowErrorOutcome {
    /// Reported by the flow manager itself, not by a switch.
    IgnoredException,
    /// The cookie does not carry this engine's owner tag.
    NotOwned,
    NoActivePipeline,
    /// The active pipeline could not move to `enabling_error`.
    IgnoredTransition { pipeline_id: PipelineId, status: PipelineStatus },
    MarkedError { pipeline_id: PipelineId },
}

// ── Engine ─────────────────────────────────────────────────────────

pub struct ReconcileEngine {
    lifecycle: PipelineLifecycle,
    transport: Arc<dyn FlowTransport>,
    retry: RetryPolicy,
    miss_flows: MissFlowManager,
    default_tables: Vec<TableEntry>,
}

impl ReconcileEngine {
    pub fn new(
        lifecycle: PipelineLifecycle,
        transport: Arc<dyn FlowTransport>,
        retry: RetryPolicy,
        miss_flows: MissFlowManager,
        default_tables: Vec<TableEntry>,
    ) -> Self {
        Self {
            lifecycle,
            transport,
            retry,
            miss_flows,
            default_tables,
        }
    }

    pub fn default_tables(&self) -> &[TableEntry] {
        &self.default_tables
    }

    pub fn miss_flows(&self) -> &MissFlowManager {
        &self.miss_flows
    }

    /// Tables the layout of `pipeline` resolves to: its own while moving
    /// towards enabled, the default tables otherwise.
    pub fn effective_tables<'a>(&'a self, pipeline: Option<&'a Pipeline>) -> &'a [TableEntry] {
        match pipeline {
            Some(p) if p.status.is_enable_direction() => &p.multi_table,
            _ => &self.default_tables,
        }
    }

    /// Run one reconciliation against the active pipeline.
    pub async fn reconcile(&self) -> ReconcileResult<ReconcileReport> {
        let Some(pipeline) = self.lifecycle.active_pipeline()? else {
            debug!("no active pipeline; nothing to reconcile");
            return Ok(ReconcileReport::Skipped {
                reason: SkipReason::NoActivePipeline,
            });
        };
        match pipeline.status {
            PipelineStatus::Enabled => {
                debug!(pipeline_id = %pipeline.id, "pipeline already enabled; skipping");
                return Ok(ReconcileReport::Skipped {
                    reason: SkipReason::AlreadyEnabled,
                });
            }
            status if status.is_error() => {
                info!(pipeline_id = %pipeline.id, %status, "pipeline in error status; skipping");
                return Ok(ReconcileReport::Skipped {
                    reason: SkipReason::ErrorStatus(status),
                });
            }
            _ => {}
        }

        info!(pipeline_id = %pipeline.id, status = %pipeline.status, "reconciling flows");

        let (snapshot, switches) = match self.fetch().await {
            Ok(fetched) => fetched,
            Err(err) => {
                error!(pipeline_id = %pipeline.id, error = %err, "flow retrieval failed; aborting");
                return self.failed(&pipeline, err.into());
            }
        };

        let tables = self.effective_tables(Some(&pipeline));
        let plan = match plan_reconciliation(tables, &snapshot, &switches, &self.miss_flows) {
            Ok(plan) => plan,
            Err(err) => return self.failed(&pipeline, err),
        };
        info!(
            pipeline_id = %pipeline.id,
            switches = plan.switches.len(),
            deletes = plan.delete_count(),
            installs = plan.install_count(),
            "reconciliation planned"
        );

        let (counts, failures) = self.dispatch(&plan).await;
        if let Some(err) = failures.into_iter().next() {
            return self.failed(&pipeline, err);
        }

        let status = match self.lifecycle.complete(&pipeline) {
            Ok(change) => change.after.status,
            Err(LifecycleError::IllegalTransition { from, .. }) => {
                warn!(
                    pipeline_id = %pipeline.id,
                    %from,
                    "pipeline moved on during reconciliation; keeping its status"
                );
                from
            }
            Err(err) => return Err(err.into()),
        };
        Ok(ReconcileReport::Applied {
            pipeline_id: pipeline.id,
            status,
            switches: counts,
        })
    }

    /// Mark the active pipeline `enabling_error` if the failed flow is ours.
    pub fn handle_flow_error(
        &self,
        notification: &FlowErrorNotification,
    ) -> ReconcileResult<FlowErrorOutcome> {
        let cookie = notification.flow.cookie;
        if let Some(exception) = &notification.error_exception {
            debug!(cookie, %exception, "flow manager exception; ignoring");
            return Ok(FlowErrorOutcome::IgnoredException);
        }
        if !self.miss_flows.codec().owns(cookie) {
            return Ok(FlowErrorOutcome::NotOwned);
        }
        let Some(pipeline) = self.lifecycle.active_pipeline()? else {
            info!(cookie, "owned flow failed while no pipeline is active; dropping");
            return Ok(FlowErrorOutcome::NoActivePipeline);
        };

        match self.lifecycle.enabling_error(&pipeline.id) {
            Ok(_) => Ok(FlowErrorOutcome::MarkedError {
                pipeline_id: pipeline.id,
            }),
            Err(LifecycleError::IllegalTransition { id, from, .. }) => {
                warn!(pipeline_id = %id, status = %from, cookie, "flow error does not apply to pipeline status");
                Ok(FlowErrorOutcome::IgnoredTransition {
                    pipeline_id: id,
                    status: from,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn fetch(&self) -> Result<(FlowSnapshot, Vec<SwitchId>), tablegrid_flows::TransportError> {
        let transport = &self.transport;
        let snapshot = self
            .retry
            .run("installed_flows", move || transport.installed_flows())
            .await?;
        let switches = self.retry.run("switches", move || transport.switches()).await?;
        Ok((snapshot, switches))
    }

    /// Deletes for every switch, then installs for the switches whose
    /// deletes went through.
    async fn dispatch(
        &self,
        plan: &ReconcilePlan,
    ) -> (BTreeMap<SwitchId, SwitchCounts>, Vec<ReconcileError>) {
        let mut counts = BTreeMap::new();
        let mut failures = Vec::new();
        let mut blocked = BTreeSet::new();

        for (switch, switch_plan) in &plan.switches {
            if switch_plan.deletes.is_empty() {
                continue;
            }
            match self.transport.delete(switch, &switch_plan.deletes).await {
                Ok(()) => {
                    counts.entry(switch.clone()).or_insert_with(SwitchCounts::default).deletes =
                        switch_plan.deletes.len();
                }
                Err(err) => {
                    error!(%switch, error = %err, "delete dispatch failed; skipping installs");
                    blocked.insert(switch.as_str());
                    failures.push(err.into());
                }
            }
        }

        for (switch, switch_plan) in &plan.switches {
            if switch_plan.installs.is_empty() || blocked.contains(switch.as_str()) {
                continue;
            }
            match self.transport.install(switch, &switch_plan.installs).await {
                Ok(()) => {
                    counts.entry(switch.clone()).or_insert_with(SwitchCounts::default).installs =
                        switch_plan.installs.len();
                }
                Err(err) => {
                    error!(%switch, error = %err, "install dispatch failed");
                    failures.push(err.into());
                }
            }
        }
        (counts, failures)
    }

    fn failed(&self, pipeline: &Pipeline, err: ReconcileError) -> ReconcileResult<ReconcileReport> {
        let status = match self.lifecycle.fail(pipeline) {
            Ok(change) => change.after.status,
            Err(LifecycleError::IllegalTransition { from, .. }) => from,
            Err(state_err) => return Err(state_err.into()),
        };
        Ok(ReconcileReport::Failed {
            pipeline_id: pipeline.id.clone(),
            status,
            error: err.to_string(),
        })
    }
}
