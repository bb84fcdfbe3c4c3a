//! tablegrid-reconcile: moves owner flows to the tables a pipeline assigns.
//!
//! A pipeline transition announces a new layout to the owner applications,
//! waits for each active owner to acknowledge it, then diffs the installed
//! flows against the layout and dispatches the resulting deletes and
//! installs.
//!
//! # Components
//!
//! - **`layout`**: `DesiredLayout` (owner → flow-group → table id) and the default tables
//! - **`readiness`**: the acknowledgement barrier, owner registry and layout publisher
//! - **`miss_flows`**: planning of table-miss entries
//! - **`engine`**: `plan_reconciliation` and the `ReconcileEngine` that applies it
//! - **`control`**: enable/disable orchestration used by the control surface
//! - **`worker`**: the single task that runs reconciliations on request

pub mod control;
pub mod engine;
pub mod error;
pub mod layout;
pub mod miss_flows;
pub mod readiness;
pub mod worker;

pub use control::{DisableOutcome, PipelineControl};
pub use engine::{
    plan_reconciliation, FlowErrorOutcome, ReconcileEngine, ReconcilePlan, ReconcileReport,
    SkipReason, SwitchCounts, SwitchPlan,
};
pub use error::{ReconcileError, ReconcileResult};
pub use layout::{default_tables, DesiredLayout};
pub use miss_flows::{MissFlowBody, MissFlowManager, MissFlowPlan, ENGINE_OWNER, MISS_FLOW_GROUP};
pub use readiness::{
    AckOutcome, LayoutAnnouncement, LayoutPublisher, OwnerRegistry, ReadinessBarrier,
    ReadinessCoordinator, ReconcileRequest, WatchPublisher, DEFAULT_SUBSCRIBED_OWNERS,
};
pub use worker::run_worker;
