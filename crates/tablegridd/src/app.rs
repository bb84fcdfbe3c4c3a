//! Component assembly.

use std::sync::Arc;

use axum::Router;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use tablegrid_api::ApiState;
use tablegrid_flows::FlowTransport;
use tablegrid_lifecycle::PipelineLifecycle;
use tablegrid_reconcile::{
    run_worker, OwnerRegistry, PipelineControl, ReadinessCoordinator, ReconcileEngine,
    ReconcileRequest, WatchPublisher,
};
use tablegrid_state::PipelineStore;

use crate::config::DaemonConfig;

/// Pending reconcile requests before announcers wait on the worker.
const REQUEST_QUEUE: usize = 16;

/// Every long-lived component of the daemon.
pub struct Daemon {
    pub state: ApiState,
    pub engine: Arc<ReconcileEngine>,
    requests: mpsc::Receiver<ReconcileRequest>,
}

impl Daemon {
    pub fn router(&self) -> Router {
        tablegrid_api::build_router(self.state.clone())
    }

    /// Start the reconcile worker. It stops when `shutdown` flips to true.
    pub fn spawn_worker(self, shutdown: watch::Receiver<bool>) -> (ApiState, JoinHandle<()>) {
        let handle = tokio::spawn(run_worker(self.engine, self.requests, shutdown));
        (self.state, handle)
    }
}

pub fn assemble(
    config: &DaemonConfig,
    store: PipelineStore,
    transport: Arc<dyn FlowTransport>,
) -> Daemon {
    let lifecycle = PipelineLifecycle::new(store.clone());
    let default_tables = config.default_tables();

    let publisher = Arc::new(WatchPublisher::new());
    let (tx, requests) = mpsc::channel(REQUEST_QUEUE);
    let coordinator = Arc::new(ReadinessCoordinator::new(
        config.subscribed_owners.iter().cloned(),
        OwnerRegistry::new(),
        publisher.clone(),
        tx,
    ));

    let engine = Arc::new(ReconcileEngine::new(
        lifecycle.clone(),
        transport,
        config.retry.clone(),
        config.miss_flow_manager(),
        default_tables.clone(),
    ));
    let control = PipelineControl::new(lifecycle, coordinator, default_tables);
    info!(
        owner = %config.owner,
        subscribed = config.subscribed_owners.len(),
        "components assembled"
    );

    Daemon {
        state: ApiState {
            store,
            control,
            engine: engine.clone(),
            publisher,
        },
        engine,
        requests,
    }
}
