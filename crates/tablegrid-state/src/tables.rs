//! redb table definitions for the pipeline store.
//!
//! Keys are pipeline ids; values are JSON-serialized `Pipeline` documents.

use redb::TableDefinition;

/// Pipeline documents keyed by `{pipeline_id}`.
pub const PIPELINES: TableDefinition<&str, &[u8]> = TableDefinition::new("pipelines");
