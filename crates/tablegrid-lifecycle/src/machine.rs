//! Pipeline lifecycle: drives pipelines through their status machine.
//!
//! Each method is one transition. The store performs the status check and
//! the write in one transaction, so calling a transition twice leaves the
//! same final state.

use tablegrid_state::{Activation, Pipeline, PipelineStatus, PipelineStore, StatusChange};
use tracing::{info, warn};

use crate::error::{LifecycleError, LifecycleResult};
use crate::transitions::{allowed_from, ENABLE_BLOCKERS};

/// Transition functions over a [`PipelineStore`].
#[derive(Clone)]
pub struct PipelineLifecycle {
    store: PipelineStore,
}

impl PipelineLifecycle {
    pub fn new(store: PipelineStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &PipelineStore {
        &self.store
    }

    /// The unique non-disabled pipeline, or `None` when the default layout
    /// applies.
    pub fn active_pipeline(&self) -> LifecycleResult<Option<Pipeline>> {
        Ok(self.store.find_active()?)
    }

    /// Start enabling a pipeline.
    ///
    /// Conflicts while any other pipeline is not `disabled`. The store still
    /// forces stray active pipelines to `disabled` in the same write.
    pub fn enabling(&self, id: &str) -> LifecycleResult<Activation> {
        let activation = self.store.activate(
            id,
            allowed_from(PipelineStatus::Enabling),
            PipelineStatus::Enabling,
            ENABLE_BLOCKERS,
        )?;
        info!(
            pipeline_id = %id,
            from = %activation.change.before.status,
            superseded = activation.superseded.len(),
            "pipeline enabling"
        );
        Ok(activation)
    }

    pub fn enabled(&self, id: &str) -> LifecycleResult<StatusChange> {
        let change = self.transition(id, PipelineStatus::Enabled)?;
        info!(pipeline_id = %id, "pipeline enabled");
        Ok(change)
    }

    pub fn enabling_error(&self, id: &str) -> LifecycleResult<StatusChange> {
        let change = self.transition(id, PipelineStatus::EnablingError)?;
        warn!(pipeline_id = %id, from = %change.before.status, "pipeline enabling_error");
        Ok(change)
    }

    /// Start disabling a pipeline and return the document as it was before.
    ///
    /// A pipeline that is already `disabled` is returned untouched; callers
    /// check `before.status` to decide whether reconciliation is needed.
    pub fn disabling(&self, id: &str) -> LifecycleResult<Pipeline> {
        let current = self
            .store
            .get_pipeline(id)?
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;
        if current.status == PipelineStatus::Disabled {
            info!(pipeline_id = %id, "pipeline already disabled");
            return Ok(current);
        }
        let change = self.transition(id, PipelineStatus::Disabling)?;
        info!(pipeline_id = %id, from = %change.before.status, "pipeline disabling");
        Ok(change.before)
    }

    pub fn disabled(&self, id: &str) -> LifecycleResult<StatusChange> {
        let change = self.transition(id, PipelineStatus::Disabled)?;
        info!(pipeline_id = %id, "pipeline disabled");
        Ok(change)
    }

    pub fn disabling_error(&self, id: &str) -> LifecycleResult<StatusChange> {
        let change = self.transition(id, PipelineStatus::DisablingError)?;
        warn!(pipeline_id = %id, from = %change.before.status, "pipeline disabling_error");
        Ok(change)
    }

    /// Terminal success for whichever direction `pipeline` is moving in.
    pub fn complete(&self, pipeline: &Pipeline) -> LifecycleResult<StatusChange> {
        if pipeline.status.is_enable_direction() {
            self.enabled(&pipeline.id)
        } else {
            self.disabled(&pipeline.id)
        }
    }

    /// Terminal failure for whichever direction `pipeline` is moving in.
    pub fn fail(&self, pipeline: &Pipeline) -> LifecycleResult<StatusChange> {
        if pipeline.status.is_enable_direction() {
            self.enabling_error(&pipeline.id)
        } else {
            self.disabling_error(&pipeline.id)
        }
    }

    fn transition(&self, id: &str, to: PipelineStatus) -> LifecycleResult<StatusChange> {
        Ok(self.store.compare_and_set_status(id, allowed_from(to), to)?)
    }
}
