//! Enable and disable orchestration.
//!
//! A transition is two steps: move the pipeline's status, then announce the
//! layout that reconciliation will converge to. The reconciliation itself
//! runs later, once the readiness barrier opens.

use std::sync::Arc;

use tablegrid_lifecycle::{LifecycleError, PipelineLifecycle};
use tablegrid_state::{Activation, Pipeline, TableEntry};
use tracing::info;

use crate::error::ReconcileResult;
use crate::layout::DesiredLayout;
use crate::readiness::{LayoutAnnouncement, ReadinessCoordinator};

/// What a disable request did.
#[derive(Debug, Clone, PartialEq)]
pub enum DisableOutcome {
    /// The pipeline was moved to `disabling` and the default layout announced.
    Disabling { before: Pipeline, announcement: LayoutAnnouncement },
    /// The pipeline was already disabled.
    AlreadyDisabled(Pipeline),
    /// Another pipeline is active; this one is left alone.
    OtherActive { active_id: String },
}

#[derive(Clone)]
pub struct PipelineControl {
    lifecycle: PipelineLifecycle,
    coordinator: Arc<ReadinessCoordinator>,
    default_tables: Vec<TableEntry>,
}

impl PipelineControl {
    pub fn new(
        lifecycle: PipelineLifecycle,
        coordinator: Arc<ReadinessCoordinator>,
        default_tables: Vec<TableEntry>,
    ) -> Self {
        Self {
            lifecycle,
            coordinator,
            default_tables,
        }
    }

    pub fn lifecycle(&self) -> &PipelineLifecycle {
        &self.lifecycle
    }

    pub fn coordinator(&self) -> &Arc<ReadinessCoordinator> {
        &self.coordinator
    }

    /// Move `id` to `enabling` and announce its layout.
    pub async fn enable(&self, id: &str) -> ReconcileResult<(Activation, LayoutAnnouncement)> {
        let activation = self.lifecycle.enabling(id)?;
        let layout = DesiredLayout::from_tables(&activation.change.after.multi_table);
        let announcement = self.coordinator.announce(Some(id), layout).await;
        Ok((activation, announcement))
    }

    /// Move `id` to `disabling` and announce the default layout.
    ///
    /// Disabling a pipeline while a different one is active is a no-op, as
    /// is disabling a pipeline that is already disabled.
    pub async fn disable(&self, id: &str) -> ReconcileResult<DisableOutcome> {
        let target = self
            .lifecycle
            .store()
            .get_pipeline(id)?
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;

        if let Some(active) = self.lifecycle.active_pipeline()? {
            if active.id != target.id {
                info!(pipeline_id = %id, active_id = %active.id, "another pipeline is active; disable is a no-op");
                return Ok(DisableOutcome::OtherActive { active_id: active.id });
            }
        }

        let before = self.lifecycle.disabling(id)?;
        if before.status.is_active() {
            let announcement = self.announce_default().await;
            Ok(DisableOutcome::Disabling { before, announcement })
        } else {
            Ok(DisableOutcome::AlreadyDisabled(before))
        }
    }

    /// Re-announce the layout the system should converge to. Used at startup
    /// to resume an interrupted transition.
    pub async fn announce_current(&self) -> ReconcileResult<LayoutAnnouncement> {
        match self.lifecycle.active_pipeline()? {
            Some(pipeline) if pipeline.status.is_enable_direction() => {
                info!(pipeline_id = %pipeline.id, status = %pipeline.status, "resuming pipeline layout");
                let layout = DesiredLayout::from_tables(&pipeline.multi_table);
                Ok(self.coordinator.announce(Some(&pipeline.id), layout).await)
            }
            _ => Ok(self.announce_default().await),
        }
    }

    async fn announce_default(&self) -> LayoutAnnouncement {
        let layout = DesiredLayout::from_tables(&self.default_tables);
        self.coordinator.announce(None, layout).await
    }
}
