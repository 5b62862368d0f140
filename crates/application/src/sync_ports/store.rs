use async_trait::async_trait;
use rolebridge_core::{AppResult, TenantId};
use rolebridge_domain::{NewSyncEvent, SyncEvent, SyncEventStatus};
use tokio::sync::mpsc;

/// Stream of newly appended sync events observed by one store instance.
///
/// Subscriptions never replay history; they deliver each append observed
/// after the subscription started exactly once. The channel abstraction keeps
/// the backing technology (change feed, log tailing, pub/sub) swappable.
pub struct SyncEventSubscription {
    receiver: mpsc::UnboundedReceiver<SyncEvent>,
}

impl SyncEventSubscription {
    /// Wraps a receiver fed by a store implementation.
    #[must_use]
    pub fn new(receiver: mpsc::UnboundedReceiver<SyncEvent>) -> Self {
        Self { receiver }
    }

    /// Waits for the next appended event; `None` when the store is gone.
    pub async fn next(&mut self) -> Option<SyncEvent> {
        self.receiver.recv().await
    }
}

/// Durable, queryable log of sync events.
#[async_trait]
pub trait SyncEventStore: Send + Sync {
    /// Atomically persists an event with a fresh id, `pending` status, and
    /// `created_at`, then notifies active subscriptions with the same record.
    async fn append(&self, event: NewSyncEvent) -> AppResult<SyncEvent>;

    /// Atomically moves a `pending` event to `processing`.
    ///
    /// Returns `None` when the event is missing or no longer pending, which
    /// is how a duplicate delivery is recognized and skipped.
    async fn claim(&self, event_id: &str) -> AppResult<Option<SyncEvent>>;

    /// Records a status change.
    ///
    /// A missing event and a same-status re-apply are no-ops; an illegal
    /// transition is an error.
    async fn update_status(
        &self,
        event_id: &str,
        status: SyncEventStatus,
        error: Option<String>,
    ) -> AppResult<()>;

    /// Returns one event by id.
    async fn find_event(&self, event_id: &str) -> AppResult<Option<SyncEvent>>;

    /// Lists events for one subject and scope, newest first.
    async fn list_for_subject(
        &self,
        tenant_id: TenantId,
        subject_id: &str,
        scope_id: &str,
    ) -> AppResult<Vec<SyncEvent>>;

    /// Subscribes to events appended after this call.
    async fn subscribe(&self) -> AppResult<SyncEventSubscription>;
}
