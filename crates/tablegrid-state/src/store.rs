//! PipelineStore: redb-backed persistence for pipeline documents.
//!
//! Provides CRUD over pipelines plus the atomic status transitions the
//! lifecycle relies on. All values are JSON-serialized into redb's `&[u8]`
//! value column. The store supports both on-disk and in-memory backends
//! (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::{debug, info, warn};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Current Unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Result of a successful status compare-and-set.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    /// The document as it was before the write.
    pub before: Pipeline,
    /// The document as written.
    pub after: Pipeline,
}

impl StatusChange {
    pub fn status_changed(&self) -> bool {
        self.before.status != self.after.status
    }
}

/// Result of activating a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Activation {
    pub change: StatusChange,
    /// Ids of other pipelines that were forced to `disabled`.
    pub superseded: Vec<PipelineId>,
}

/// Thread-safe pipeline store backed by redb.
#[derive(Clone)]
pub struct PipelineStore {
    db: Arc<Database>,
}

impl PipelineStore {
    /// Open (or create) a persistent pipeline store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "pipeline store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory pipeline store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory pipeline store opened");
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(PIPELINES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── CRUD ───────────────────────────────────────────────────────

    /// Persist a validated document as a new `disabled` pipeline.
    pub fn insert_pipeline(&self, new: NewPipeline) -> StateResult<Pipeline> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let pipeline = Pipeline::from_new(id, new, epoch_secs());
        let value = serde_json::to_vec(&pipeline).map_err(map_err!(Serialize))?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(PIPELINES).map_err(map_err!(Table))?;
            if table.get(pipeline.id.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::Conflict(format!(
                    "pipeline {} already exists",
                    pipeline.id
                )));
            }
            table
                .insert(pipeline.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        info!(pipeline_id = %pipeline.id, tables = pipeline.multi_table.len(), "pipeline created");
        Ok(pipeline)
    }

    /// Get a pipeline by id.
    pub fn get_pipeline(&self, id: &str) -> StateResult<Option<Pipeline>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PIPELINES).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let pipeline: Pipeline =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(pipeline))
            }
            None => Ok(None),
        }
    }

    /// List pipelines, optionally only those with the given status.
    pub fn list_pipelines(&self, status: Option<PipelineStatus>) -> StateResult<Vec<Pipeline>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PIPELINES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let pipeline: Pipeline =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if status.is_none_or(|s| s == pipeline.status) {
                results.push(pipeline);
            }
        }
        results.sort_by(|a, b| {
            a.inserted_at
                .cmp(&b.inserted_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(results)
    }

    /// Delete a pipeline. Only `disabled` pipelines may be deleted.
    pub fn delete_pipeline(&self, id: &str) -> StateResult<Pipeline> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let pipeline = {
            let mut table = txn.open_table(PIPELINES).map_err(map_err!(Table))?;
            let pipeline = read_pipeline(&table, id)?
                .ok_or_else(|| StateError::NotFound(id.to_string()))?;
            if pipeline.status != PipelineStatus::Disabled {
                return Err(StateError::Conflict(format!(
                    "pipeline {id} is {} and must be disabled before deletion",
                    pipeline.status
                )));
            }
            table.remove(id).map_err(map_err!(Write))?;
            pipeline
        };
        txn.commit().map_err(map_err!(Transaction))?;
        info!(pipeline_id = %id, "pipeline deleted");
        Ok(pipeline)
    }

    /// The pipeline whose status is not `disabled`, if any.
    pub fn find_active(&self) -> StateResult<Option<Pipeline>> {
        let mut active: Vec<Pipeline> = self
            .list_pipelines(None)?
            .into_iter()
            .filter(|p| p.status.is_active())
            .collect();
        if active.len() > 1 {
            warn!(
                count = active.len(),
                "more than one active pipeline; using the most recently updated"
            );
        }
        active.sort_by_key(|p| p.updated_at);
        Ok(active.pop())
    }

    // ── Transitions ────────────────────────────────────────────────

    /// Atomically move a pipeline to `to` if its current status is one of
    /// `allowed_from`. The read and the write happen in one transaction.
    pub fn compare_and_set_status(
        &self,
        id: &str,
        allowed_from: &[PipelineStatus],
        to: PipelineStatus,
    ) -> StateResult<StatusChange> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let change = {
            let mut table = txn.open_table(PIPELINES).map_err(map_err!(Table))?;
            let before = read_pipeline(&table, id)?
                .ok_or_else(|| StateError::NotFound(id.to_string()))?;
            if !allowed_from.contains(&before.status) {
                return Err(StateError::IllegalTransition {
                    id: id.to_string(),
                    from: before.status,
                    to,
                });
            }
            let after = with_status(&before, to);
            write_pipeline(&mut table, &after)?;
            StatusChange { before, after }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            pipeline_id = %id,
            from = %change.before.status,
            to = %change.after.status,
            "pipeline status updated"
        );
        Ok(change)
    }

    /// Activate a pipeline: compare-and-set it to `to` and force every other
    /// active pipeline to `disabled`, all in one write transaction.
    ///
    /// Fails with `Conflict` when another pipeline is in one of the
    /// `blocking` statuses.
    pub fn activate(
        &self,
        id: &str,
        allowed_from: &[PipelineStatus],
        to: PipelineStatus,
        blocking: &[PipelineStatus],
    ) -> StateResult<Activation> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let activation = {
            let mut table = txn.open_table(PIPELINES).map_err(map_err!(Table))?;
            let before = read_pipeline(&table, id)?
                .ok_or_else(|| StateError::NotFound(id.to_string()))?;

            let mut others = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let other: Pipeline =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if other.id != id && other.status.is_active() {
                    others.push(other);
                }
            }

            if let Some(busy) = others.iter().find(|p| blocking.contains(&p.status)) {
                return Err(StateError::Conflict(format!(
                    "pipeline {} is {}",
                    busy.id, busy.status
                )));
            }
            if !allowed_from.contains(&before.status) {
                return Err(StateError::IllegalTransition {
                    id: id.to_string(),
                    from: before.status,
                    to,
                });
            }

            let after = with_status(&before, to);
            write_pipeline(&mut table, &after)?;

            let mut superseded = Vec::with_capacity(others.len());
            for other in others {
                write_pipeline(&mut table, &with_status(&other, PipelineStatus::Disabled))?;
                superseded.push(other.id);
            }
            Activation {
                change: StatusChange { before, after },
                superseded,
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;

        for other in &activation.superseded {
            warn!(pipeline_id = %other, by = %id, "pipeline superseded and disabled");
        }
        debug!(
            pipeline_id = %id,
            from = %activation.change.before.status,
            to = %activation.change.after.status,
            "pipeline activated"
        );
        Ok(activation)
    }
}

fn with_status(pipeline: &Pipeline, status: PipelineStatus) -> Pipeline {
    let mut updated = pipeline.clone();
    updated.status = status;
    updated.updated_at = epoch_secs().max(pipeline.updated_at);
    updated
}

fn read_pipeline(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    id: &str,
) -> StateResult<Option<Pipeline>> {
    match table.get(id).map_err(map_err!(Read))? {
        Some(guard) => {
            let pipeline: Pipeline =
                serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            Ok(Some(pipeline))
        }
        None => Ok(None),
    }
}

fn write_pipeline(
    table: &mut redb::Table<'_, &'static str, &'static [u8]>,
    pipeline: &Pipeline,
) -> StateResult<()> {
    let value = serde_json::to_vec(pipeline).map_err(map_err!(Serialize))?;
    table
        .insert(pipeline.id.as_str(), value.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}
