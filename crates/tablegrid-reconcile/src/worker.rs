//! The reconcile worker: one task, one run at a time.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::engine::{ReconcileEngine, ReconcileReport};
use crate::readiness::ReconcileRequest;

/// Consume reconcile requests until the channel closes or `shutdown` flips
/// to true. A run in progress always finishes before the loop exits.
pub async fn run_worker(
    engine: Arc<ReconcileEngine>,
    mut requests: mpsc::Receiver<ReconcileRequest>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("reconcile worker started");
    loop {
        let request = tokio::select! {
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };

        info!(sequence = request.sequence(), ?request, "reconcile requested");
        match engine.reconcile().await {
            Ok(ReconcileReport::Skipped { reason }) => {
                info!(sequence = request.sequence(), ?reason, "reconciliation skipped");
            }
            Ok(ReconcileReport::Applied { pipeline_id, status, switches }) => {
                info!(
                    sequence = request.sequence(),
                    %pipeline_id,
                    %status,
                    switches = switches.len(),
                    "reconciliation applied"
                );
            }
            Ok(ReconcileReport::Failed { pipeline_id, status, error }) => {
                warn!(
                    sequence = request.sequence(),
                    %pipeline_id,
                    %status,
                    %error,
                    "reconciliation failed"
                );
            }
            Err(e) => {
                error!(sequence = request.sequence(), error = %e, "reconciliation error");
            }
        }
    }
    info!("reconcile worker stopped");
}
