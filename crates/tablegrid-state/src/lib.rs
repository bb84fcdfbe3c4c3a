//! tablegrid-state: pipeline documents and the embedded pipeline store.
//!
//! Backed by [redb](https://docs.rs/redb). A pipeline assigns each owner
//! application's flow-groups to an OpenFlow table id and optionally declares
//! the table-miss flow of each table.
//!
//! # Architecture
//!
//! Pipelines are JSON-serialized into redb's `&[u8]` value column, keyed by
//! their generated id. Every status change is a compare-and-set performed
//! inside a single write transaction, which is what keeps the
//! "at most one non-disabled pipeline" invariant safe under concurrent
//! requests.
//!
//! The `PipelineStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;
pub mod validate;

pub use error::{StateError, StateResult};
pub use store::{Activation, PipelineStore, StatusChange};
pub use types::*;
pub use validate::{ValidationError, ValidationIssue};
