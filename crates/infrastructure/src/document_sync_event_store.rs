use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rolebridge_application::{
    DocumentFilter, DocumentOrder, DocumentRecord, DocumentStore, OrderDirection,
    SyncEventStore, SyncEventSubscription,
};
use rolebridge_core::{AppError, AppResult, TenantId};
use rolebridge_domain::{
    NewSyncEvent, StatusChange, SyncEvent, SyncEventKind, SyncEventPayload, SyncEventStatus,
    SyncSystem,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;

const COLLECTION: &str = "sync_events";

/// Document shape persisted for one sync event.
#[derive(Debug, Serialize, Deserialize)]
struct SyncEventDocument {
    kind: SyncEventKind,
    source_system: SyncSystem,
    target_system: SyncSystem,
    tenant_id: TenantId,
    subject_id: String,
    scope_id: String,
    payload: SyncEventPayload,
    status: SyncEventStatus,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SyncEventDocument {
    fn into_event(self, id: String) -> SyncEvent {
        SyncEvent {
            id,
            kind: self.kind,
            source_system: self.source_system,
            target_system: self.target_system,
            tenant_id: self.tenant_id,
            subject_id: self.subject_id,
            scope_id: self.scope_id,
            payload: self.payload,
            status: self.status,
            error: self.error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

fn record_to_event(record: DocumentRecord) -> AppResult<SyncEvent> {
    let document: SyncEventDocument = serde_json::from_value(record.data)
        .map_err(|error| AppError::Internal(format!("malformed sync event document: {error}")))?;
    Ok(document.into_event(record.id))
}

/// Sync event store layered on a [`DocumentStore`].
///
/// Claims rely on the store's conditional update, so two processors racing on
/// one pending event resolve to exactly one winner. Subscriptions ride the
/// document change feed filtered to `pending`, which delivers appends and
/// nothing else.
pub struct DocumentSyncEventStore {
    documents: Arc<dyn DocumentStore>,
}

impl DocumentSyncEventStore {
    /// Creates a sync event store over the given document store.
    #[must_use]
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self { documents }
    }
}

#[async_trait]
impl SyncEventStore for DocumentSyncEventStore {
    async fn append(&self, event: NewSyncEvent) -> AppResult<SyncEvent> {
        let now = Utc::now();
        let document = SyncEventDocument {
            kind: event.kind(),
            source_system: event.source_system(),
            target_system: event.target_system(),
            tenant_id: event.tenant_id(),
            subject_id: event.subject_id().to_owned(),
            scope_id: event.scope_id().to_owned(),
            payload: event.payload().clone(),
            status: SyncEventStatus::Pending,
            error: None,
            created_at: now,
            updated_at: now,
        };

        let data = serde_json::to_value(&document)
            .map_err(|error| AppError::StoreWrite(error.to_string()))?;
        let record = self
            .documents
            .create(COLLECTION, data)
            .await
            .map_err(|error| AppError::StoreWrite(error.to_string()))?;

        Ok(document.into_event(record.id))
    }

    async fn claim(&self, event_id: &str) -> AppResult<Option<SyncEvent>> {
        let claimed = self
            .documents
            .update_where(
                COLLECTION,
                event_id,
                &[DocumentFilter::eq(
                    "status",
                    json!(SyncEventStatus::Pending.as_str()),
                )],
                json!({
                    "status": SyncEventStatus::Processing.as_str(),
                    "updated_at": Utc::now(),
                }),
            )
            .await?;

        if !claimed {
            return Ok(None);
        }

        self.find_event(event_id).await
    }

    async fn update_status(
        &self,
        event_id: &str,
        status: SyncEventStatus,
        error: Option<String>,
    ) -> AppResult<()> {
        let Some(record) = self.documents.get(COLLECTION, event_id).await? else {
            return Ok(());
        };

        let current = record_to_event(record)?.status;
        if current.validate_transition(status)? == StatusChange::Unchanged {
            return Ok(());
        }

        self.documents
            .update(
                COLLECTION,
                event_id,
                json!({
                    "status": status.as_str(),
                    "error": error,
                    "updated_at": Utc::now(),
                }),
            )
            .await
    }

    async fn find_event(&self, event_id: &str) -> AppResult<Option<SyncEvent>> {
        self.documents
            .get(COLLECTION, event_id)
            .await?
            .map(record_to_event)
            .transpose()
    }

    async fn list_for_subject(
        &self,
        tenant_id: TenantId,
        subject_id: &str,
        scope_id: &str,
    ) -> AppResult<Vec<SyncEvent>> {
        let records = self
            .documents
            .query(
                COLLECTION,
                &[
                    DocumentFilter::eq("tenant_id", json!(tenant_id.to_string())),
                    DocumentFilter::eq("subject_id", json!(subject_id)),
                    DocumentFilter::eq("scope_id", json!(scope_id)),
                ],
                Some(&DocumentOrder {
                    field: "created_at".to_owned(),
                    direction: OrderDirection::Descending,
                }),
                None,
            )
            .await?;

        records.into_iter().map(record_to_event).collect()
    }

    async fn subscribe(&self) -> AppResult<SyncEventSubscription> {
        let mut changes = self
            .documents
            .on_change(
                COLLECTION,
                vec![DocumentFilter::eq(
                    "status",
                    json!(SyncEventStatus::Pending.as_str()),
                )],
            )
            .await?;

        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(record) = changes.next().await {
                match record_to_event(record) {
                    Ok(event) => {
                        if sender.send(event).is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        tracing::warn!(error = %error, "skipping malformed sync event document");
                    }
                }
            }
        });

        Ok(SyncEventSubscription::new(receiver))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use rolebridge_application::SyncEventStore;
    use rolebridge_core::TenantId;
    use rolebridge_domain::{
        NewSyncEvent, RoleMappingResolver, SyncEventPayload, SyncEventStatus, SyncSystem,
    };

    use super::DocumentSyncEventStore;
    use crate::InMemoryDocumentStore;

    fn queued_event(tenant_id: TenantId, subject_id: &str) -> NewSyncEvent {
        let mapping = match RoleMappingResolver::new().resolve("editor", None, None) {
            Ok(mapping) => mapping,
            Err(error) => panic!("editor must resolve: {error}"),
        };

        let event = NewSyncEvent::new(
            SyncSystem::Directory,
            SyncSystem::Workspace,
            tenant_id,
            subject_id,
            "project-1",
            SyncEventPayload::RoleAssigned {
                mapping,
                actor: None,
                reason: None,
                admin_action: false,
                metadata: BTreeMap::new(),
            },
        );

        match event {
            Ok(event) => event,
            Err(error) => panic!("event must validate: {error}"),
        }
    }

    fn store() -> DocumentSyncEventStore {
        DocumentSyncEventStore::new(Arc::new(InMemoryDocumentStore::new()))
    }

    #[tokio::test]
    async fn append_persists_a_pending_event() {
        let store = store();
        let tenant_id = TenantId::new();

        let appended = match store.append(queued_event(tenant_id, "u1")).await {
            Ok(event) => event,
            Err(error) => panic!("append failed: {error}"),
        };
        assert_eq!(appended.status, SyncEventStatus::Pending);

        let found = store.find_event(appended.id.as_str()).await;
        assert_eq!(found.ok().flatten().map(|event| event.id), Some(appended.id));
    }

    #[tokio::test]
    async fn claim_wins_once_and_only_once() {
        let store = store();
        let appended = match store.append(queued_event(TenantId::new(), "u1")).await {
            Ok(event) => event,
            Err(error) => panic!("append failed: {error}"),
        };

        let first = store.claim(appended.id.as_str()).await;
        assert_eq!(
            first.ok().flatten().map(|event| event.status),
            Some(SyncEventStatus::Processing)
        );

        let second = store.claim(appended.id.as_str()).await;
        assert_eq!(second.ok(), Some(None));
    }

    #[tokio::test]
    async fn terminal_reapply_is_a_noop_and_regression_is_loud() {
        let store = store();
        let appended = match store.append(queued_event(TenantId::new(), "u1")).await {
            Ok(event) => event,
            Err(error) => panic!("append failed: {error}"),
        };

        let claimed = store.claim(appended.id.as_str()).await;
        assert!(claimed.is_ok());

        let completed = store
            .update_status(appended.id.as_str(), SyncEventStatus::Completed, None)
            .await;
        assert!(completed.is_ok());

        let again = store
            .update_status(appended.id.as_str(), SyncEventStatus::Completed, None)
            .await;
        assert!(again.is_ok());

        let regression = store
            .update_status(appended.id.as_str(), SyncEventStatus::Pending, None)
            .await;
        assert!(regression.is_err());
    }

    #[tokio::test]
    async fn list_for_subject_is_scoped_and_newest_first() {
        let store = store();
        let tenant_id = TenantId::new();

        for subject in ["u1", "u1", "u2"] {
            let appended = store.append(queued_event(tenant_id, subject)).await;
            assert!(appended.is_ok());
        }

        let listed = store.list_for_subject(tenant_id, "u1", "project-1").await;
        let listed = match listed {
            Ok(listed) => listed,
            Err(error) => panic!("list failed: {error}"),
        };
        assert_eq!(listed.len(), 2);
        assert!(listed[0].created_at >= listed[1].created_at);
    }

    #[tokio::test]
    async fn subscription_sees_appends_but_not_status_updates() {
        let store = store();
        let mut subscription = match store.subscribe().await {
            Ok(subscription) => subscription,
            Err(error) => panic!("subscribe failed: {error}"),
        };

        let appended = match store.append(queued_event(TenantId::new(), "u1")).await {
            Ok(event) => event,
            Err(error) => panic!("append failed: {error}"),
        };

        let received = subscription.next().await;
        assert_eq!(received.map(|event| event.id), Some(appended.id.clone()));

        let claimed = store.claim(appended.id.as_str()).await;
        assert!(claimed.is_ok());
        let completed = store
            .update_status(appended.id.as_str(), SyncEventStatus::Completed, None)
            .await;
        assert!(completed.is_ok());

        let next = store.append(queued_event(TenantId::new(), "u2")).await;
        assert!(next.is_ok());
        let received = subscription.next().await;
        assert_eq!(
            received.map(|event| event.subject_id),
            Some("u2".to_owned())
        );
    }
}
