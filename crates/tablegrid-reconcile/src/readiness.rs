//! Readiness coordinator.
//!
//! Before flows are moved, every owner that is both subscribed and
//! currently active must acknowledge the new layout. Each announcement
//! replaces the previous barrier; once the last outstanding owner
//! acknowledges, the barrier is discarded and exactly one reconcile
//! request is sent to the worker.
//!
//! There is no acknowledgement timeout: an owner that never answers keeps
//! the barrier closed until the next announcement.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, info, warn};

use tablegrid_state::store::epoch_secs;

use crate::layout::DesiredLayout;

/// Owners that take part in layout announcements unless configured otherwise.
pub const DEFAULT_SUBSCRIBED_OWNERS: [&str; 4] = ["coloring", "of_lldp", "mef_eline", "telemetry_int"];

// ── Owner registry ─────────────────────────────────────────────────

/// Owner applications currently running.
#[derive(Clone, Default)]
pub struct OwnerRegistry {
    active: Arc<RwLock<BTreeSet<String>>>,
}

impl OwnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the owner was already registered.
    pub async fn register(&self, owner: &str) -> bool {
        let added = self.active.write().await.insert(owner.to_string());
        if added {
            info!(%owner, "owner registered");
        }
        added
    }

    pub async fn unregister(&self, owner: &str) -> bool {
        let removed = self.active.write().await.remove(owner);
        if removed {
            info!(%owner, "owner unregistered");
        }
        removed
    }

    pub async fn is_active(&self, owner: &str) -> bool {
        self.active.read().await.contains(owner)
    }

    pub async fn list(&self) -> Vec<String> {
        self.active.read().await.iter().cloned().collect()
    }
}

// ── Announcements ──────────────────────────────────────────────────

/// A layout published to owner applications.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LayoutAnnouncement {
    pub sequence: u64,
    /// The pipeline the layout belongs to; `None` for the default layout.
    pub pipeline_id: Option<String>,
    pub layout: DesiredLayout,
    /// Owners whose acknowledgement is required.
    pub awaiting: BTreeSet<String>,
    pub announced_at: u64,
}

/// Delivers layout announcements to owner applications. Delivery is
/// fire-and-forget.
pub trait LayoutPublisher: Send + Sync {
    fn publish(&self, announcement: &LayoutAnnouncement);
}

/// Keeps the latest announcement in a watch channel.
pub struct WatchPublisher {
    tx: watch::Sender<Option<LayoutAnnouncement>>,
}

impl WatchPublisher {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<LayoutAnnouncement>> {
        self.tx.subscribe()
    }

    pub fn latest(&self) -> Option<LayoutAnnouncement> {
        self.tx.borrow().clone()
    }
}

impl Default for WatchPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl LayoutPublisher for WatchPublisher {
    fn publish(&self, announcement: &LayoutAnnouncement) {
        self.tx.send_replace(Some(announcement.clone()));
    }
}

// ── Barrier ────────────────────────────────────────────────────────

/// Outstanding acknowledgements for one announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessBarrier {
    sequence: u64,
    outstanding: BTreeSet<String>,
}

impl ReadinessBarrier {
    pub fn new(sequence: u64, required: BTreeSet<String>) -> Self {
        Self {
            sequence,
            outstanding: required,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn outstanding(&self) -> &BTreeSet<String> {
        &self.outstanding
    }

    /// Returns true if `owner` was outstanding.
    pub fn acknowledge(&mut self, owner: &str) -> bool {
        self.outstanding.remove(owner)
    }

    pub fn is_open(&self) -> bool {
        self.outstanding.is_empty()
    }
}

/// Why the worker is asked to reconcile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileRequest {
    /// No owner needed to acknowledge the announcement.
    Announced { sequence: u64 },
    /// The last outstanding owner acknowledged.
    Acknowledged { sequence: u64, owner: String },
}

impl ReconcileRequest {
    pub fn sequence(&self) -> u64 {
        match self {
            ReconcileRequest::Announced { sequence }
            | ReconcileRequest::Acknowledged { sequence, .. } => *sequence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AckOutcome {
    /// No barrier, or the owner was not outstanding.
    Ignored,
    Waiting { remaining: BTreeSet<String> },
    /// This acknowledgement closed the barrier.
    Triggered { sequence: u64 },
}

// ── Coordinator ────────────────────────────────────────────────────

pub struct ReadinessCoordinator {
    subscribed: BTreeSet<String>,
    registry: OwnerRegistry,
    publisher: Arc<dyn LayoutPublisher>,
    trigger: mpsc::Sender<ReconcileRequest>,
    barrier: Mutex<Option<ReadinessBarrier>>,
    sequence: AtomicU64,
}

impl ReadinessCoordinator {
    pub fn new(
        subscribed: impl IntoIterator<Item = String>,
        registry: OwnerRegistry,
        publisher: Arc<dyn LayoutPublisher>,
        trigger: mpsc::Sender<ReconcileRequest>,
    ) -> Self {
        Self {
            subscribed: subscribed.into_iter().collect(),
            registry,
            publisher,
            trigger,
            barrier: Mutex::new(None),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &OwnerRegistry {
        &self.registry
    }

    /// Publish `layout` and arm a barrier over the owners that must
    /// acknowledge it. Reconciliation is requested right away when none do.
    pub async fn announce(
        &self,
        pipeline_id: Option<&str>,
        layout: DesiredLayout,
    ) -> LayoutAnnouncement {
        let mut required = BTreeSet::new();
        for owner in layout.owners() {
            if self.subscribed.contains(owner) && self.registry.is_active(owner).await {
                required.insert(owner.to_string());
            }
        }

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let announcement = LayoutAnnouncement {
            sequence,
            pipeline_id: pipeline_id.map(str::to_string),
            layout,
            awaiting: required.clone(),
            announced_at: epoch_secs(),
        };

        let mut barrier = self.barrier.lock().await;
        if let Some(previous) = barrier.take() {
            debug!(
                sequence = previous.sequence(),
                outstanding = previous.outstanding().len(),
                "superseding previous readiness barrier"
            );
        }
        self.publisher.publish(&announcement);
        info!(
            sequence,
            pipeline_id = ?announcement.pipeline_id,
            awaiting = ?required,
            "layout announced"
        );

        if required.is_empty() {
            drop(barrier);
            self.request(ReconcileRequest::Announced { sequence }).await;
        } else {
            *barrier = Some(ReadinessBarrier::new(sequence, required));
        }
        announcement
    }

    /// Record that `owner` has applied the announced layout.
    pub async fn acknowledge(&self, owner: &str) -> AckOutcome {
        let mut guard = self.barrier.lock().await;
        let Some(barrier) = guard.as_mut() else {
            debug!(%owner, "acknowledgement without a pending layout");
            return AckOutcome::Ignored;
        };
        if !barrier.acknowledge(owner) {
            debug!(%owner, sequence = barrier.sequence(), "acknowledgement not expected");
            return AckOutcome::Ignored;
        }
        if !barrier.is_open() {
            let remaining = barrier.outstanding().clone();
            debug!(%owner, ?remaining, "acknowledgement recorded");
            return AckOutcome::Waiting { remaining };
        }

        let sequence = barrier.sequence();
        *guard = None;
        drop(guard);
        info!(%owner, sequence, "all owners acknowledged layout");
        self.request(ReconcileRequest::Acknowledged {
            sequence,
            owner: owner.to_string(),
        })
        .await;
        AckOutcome::Triggered { sequence }
    }

    /// Owners still expected to acknowledge, if a barrier is armed.
    pub async fn outstanding(&self) -> Option<BTreeSet<String>> {
        self.barrier
            .lock()
            .await
            .as_ref()
            .map(|b| b.outstanding().clone())
    }

    async fn request(&self, request: ReconcileRequest) {
        if let Err(e) = self.trigger.send(request).await {
            warn!(sequence = e.0.sequence(), "reconcile worker is gone; request dropped");
        }
    }
}
