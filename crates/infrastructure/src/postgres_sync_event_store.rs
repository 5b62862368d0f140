use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rolebridge_application::{SyncEventStore, SyncEventSubscription};
use rolebridge_core::{AppError, AppResult, TenantId};
use rolebridge_domain::{
    NewSyncEvent, StatusChange, SyncEvent, SyncEventKind, SyncEventStatus, SyncSystem,
};
use sqlx::{FromRow, PgPool};
use tokio::sync::mpsc;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// PostgreSQL-backed durable sync event log.
///
/// Claims are single atomic conditional updates, so competing processors on
/// one pending event resolve to exactly one winner. Subscriptions tail the
/// table on a `(created_at, id)` watermark rather than relying on a push
/// channel, which keeps delivery working across processes.
#[derive(Clone)]
pub struct PostgresSyncEventStore {
    pool: PgPool,
}

impl PostgresSyncEventStore {
    /// Creates a store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct SyncEventRow {
    id: uuid::Uuid,
    kind: String,
    source_system: String,
    target_system: String,
    tenant_id: uuid::Uuid,
    subject_id: String,
    scope_id: String,
    payload: serde_json::Value,
    status: String,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn sync_event_from_row(row: SyncEventRow) -> AppResult<SyncEvent> {
    Ok(SyncEvent {
        id: row.id.to_string(),
        kind: SyncEventKind::from_str(row.kind.as_str())?,
        source_system: SyncSystem::from_str(row.source_system.as_str())?,
        target_system: SyncSystem::from_str(row.target_system.as_str())?,
        tenant_id: TenantId::from_uuid(row.tenant_id),
        subject_id: row.subject_id,
        scope_id: row.scope_id,
        payload: serde_json::from_value(row.payload).map_err(|error| {
            AppError::Internal(format!("malformed sync event payload column: {error}"))
        })?,
        status: SyncEventStatus::from_str(row.status.as_str())?,
        error: row.error,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn parse_event_id(event_id: &str) -> AppResult<uuid::Uuid> {
    uuid::Uuid::parse_str(event_id).map_err(|error| {
        AppError::Validation(format!("invalid sync event id '{event_id}': {error}"))
    })
}

const EVENT_COLUMNS: &str = r#"
    id,
    kind,
    source_system,
    target_system,
    tenant_id,
    subject_id,
    scope_id,
    payload,
    status,
    error,
    created_at,
    updated_at
"#;

#[async_trait]
impl SyncEventStore for PostgresSyncEventStore {
    async fn append(&self, event: NewSyncEvent) -> AppResult<SyncEvent> {
        let payload = serde_json::to_value(event.payload())
            .map_err(|error| AppError::StoreWrite(error.to_string()))?;

        let row = sqlx::query_as::<_, SyncEventRow>(&format!(
            r#"
            INSERT INTO sync_events (
                kind,
                source_system,
                target_system,
                tenant_id,
                subject_id,
                scope_id,
                payload,
                status,
                created_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', now(), now())
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(event.kind().as_str())
        .bind(event.source_system().as_str())
        .bind(event.target_system().as_str())
        .bind(event.tenant_id().as_uuid())
        .bind(event.subject_id())
        .bind(event.scope_id())
        .bind(&payload)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| {
            AppError::StoreWrite(format!("failed to append sync event: {error}"))
        })?;

        sync_event_from_row(row)
    }

    async fn claim(&self, event_id: &str) -> AppResult<Option<SyncEvent>> {
        let event_uuid = parse_event_id(event_id)?;

        let row = sqlx::query_as::<_, SyncEventRow>(&format!(
            r#"
            UPDATE sync_events
            SET status = 'processing', updated_at = now()
            WHERE id = $1
              AND status = 'pending'
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(event_uuid)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to claim sync event '{event_id}': {error}"))
        })?;

        row.map(sync_event_from_row).transpose()
    }

    async fn update_status(
        &self,
        event_id: &str,
        status: SyncEventStatus,
        error: Option<String>,
    ) -> AppResult<()> {
        let event_uuid = parse_event_id(event_id)?;

        let current = sqlx::query_scalar::<_, String>(
            r#"
            SELECT status
            FROM sync_events
            WHERE id = $1
            "#,
        )
        .bind(event_uuid)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to load sync event '{event_id}' status: {error}"
            ))
        })?;

        let Some(current) = current else {
            return Ok(());
        };

        let current = SyncEventStatus::from_str(current.as_str())?;
        if current.validate_transition(status)? == StatusChange::Unchanged {
            return Ok(());
        }

        let result = sqlx::query(
            r#"
            UPDATE sync_events
            SET status = $2, error = $3, updated_at = now()
            WHERE id = $1
              AND status = $4
            "#,
        )
        .bind(event_uuid)
        .bind(status.as_str())
        .bind(error)
        .bind(current.as_str())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to update sync event '{event_id}' status: {error}"
            ))
        })?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "sync event '{event_id}' status changed concurrently"
            )));
        }

        Ok(())
    }

    async fn find_event(&self, event_id: &str) -> AppResult<Option<SyncEvent>> {
        let event_uuid = parse_event_id(event_id)?;

        let row = sqlx::query_as::<_, SyncEventRow>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM sync_events
            WHERE id = $1
            "#
        ))
        .bind(event_uuid)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to load sync event '{event_id}': {error}"))
        })?;

        row.map(sync_event_from_row).transpose()
    }

    async fn list_for_subject(
        &self,
        tenant_id: TenantId,
        subject_id: &str,
        scope_id: &str,
    ) -> AppResult<Vec<SyncEvent>> {
        let rows = sqlx::query_as::<_, SyncEventRow>(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM sync_events
            WHERE tenant_id = $1
              AND subject_id = $2
              AND scope_id = $3
            ORDER BY created_at DESC
            "#
        ))
        .bind(tenant_id.as_uuid())
        .bind(subject_id)
        .bind(scope_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to list sync events for subject '{subject_id}': {error}"
            ))
        })?;

        rows.into_iter().map(sync_event_from_row).collect()
    }

    async fn subscribe(&self) -> AppResult<SyncEventSubscription> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let pool = self.pool.clone();

        tokio::spawn(async move {
            let mut watermark_at = Utc::now();
            let mut watermark_id = uuid::Uuid::nil();
            let mut ticker = tokio::time::interval(POLL_INTERVAL);

            loop {
                ticker.tick().await;
                if sender.is_closed() {
                    break;
                }

                let rows = sqlx::query_as::<_, SyncEventRow>(&format!(
                    r#"
                    SELECT {EVENT_COLUMNS}
                    FROM sync_events
                    WHERE status = 'pending'
                      AND (created_at, id) > ($1, $2)
                    ORDER BY created_at ASC, id ASC
                    "#
                ))
                .bind(watermark_at)
                .bind(watermark_id)
                .fetch_all(&pool)
                .await;

                let rows = match rows {
                    Ok(rows) => rows,
                    Err(error) => {
                        tracing::warn!(error = %error, "sync event tail query failed");
                        continue;
                    }
                };

                for row in rows {
                    watermark_at = row.created_at;
                    watermark_id = row.id;

                    match sync_event_from_row(row) {
                        Ok(event) => {
                            if sender.send(event).is_err() {
                                return;
                            }
                        }
                        Err(error) => {
                            tracing::warn!(error = %error, "skipping malformed sync event row");
                        }
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

    use rolebridge_application::SyncEventStore;
    use rolebridge_core::TenantId;
    use rolebridge_domain::{
        NewSyncEvent, RoleMappingResolver, SyncEventPayload, SyncEventStatus, SyncSystem,
    };
    use sqlx::PgPool;
    use sqlx::migrate::Migrator;
    use sqlx::postgres::PgPoolOptions;

    use super::PostgresSyncEventStore;

    static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

    async fn test_pool() -> Option<PgPool> {
        let Ok(database_url) = std::env::var("DATABASE_URL") else {
            return None;
        };

        let pool = match PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url.as_str())
            .await
        {
            Ok(pool) => pool,
            Err(error) => panic!("failed to connect to DATABASE_URL in test: {error}"),
        };

        if let Err(error) = MIGRATOR.run(&pool).await {
            panic!("failed to run migrations for postgres sync event tests: {error}");
        }

        Some(pool)
    }

    fn queued_event(tenant_id: TenantId, subject_id: &str) -> NewSyncEvent {
        let mapping = match RoleMappingResolver::new().resolve("manager", None, None) {
            Ok(mapping) => mapping,
            Err(error) => panic!("manager must resolve: {error}"),
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

    #[tokio::test]
    async fn append_claim_and_complete_round_trip() {
        let Some(pool) = test_pool().await else {
            return;
        };

        let store = PostgresSyncEventStore::new(pool);
        let tenant_id = TenantId::new();

        let appended = match store.append(queued_event(tenant_id, "u1")).await {
            Ok(event) => event,
            Err(error) => panic!("append failed: {error}"),
        };
        assert_eq!(appended.status, SyncEventStatus::Pending);

        let claimed = store.claim(appended.id.as_str()).await;
        assert_eq!(
            claimed.ok().flatten().map(|event| event.status),
            Some(SyncEventStatus::Processing)
        );

        let duplicate = store.claim(appended.id.as_str()).await;
        assert_eq!(duplicate.ok(), Some(None));

        let completed = store
            .update_status(appended.id.as_str(), SyncEventStatus::Completed, None)
            .await;
        assert!(completed.is_ok());

        let reapplied = store
            .update_status(appended.id.as_str(), SyncEventStatus::Completed, None)
            .await;
        assert!(reapplied.is_ok());

        let regression = store
            .update_status(appended.id.as_str(), SyncEventStatus::Pending, None)
            .await;
        assert!(regression.is_err());
    }

    #[tokio::test]
    async fn list_for_subject_returns_newest_first() {
        let Some(pool) = test_pool().await else {
            return;
        };

        let store = PostgresSyncEventStore::new(pool);
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
    async fn tailing_subscription_observes_new_appends() {
        let Some(pool) = test_pool().await else {
            return;
        };

        let store = PostgresSyncEventStore::new(pool);
        let mut subscription = match store.subscribe().await {
            Ok(subscription) => subscription,
            Err(error) => panic!("subscribe failed: {error}"),
        };

        let appended = match store.append(queued_event(TenantId::new(), "u1")).await {
            Ok(event) => event,
            Err(error) => panic!("append failed: {error}"),
        };

        let received = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                match subscription.next().await {
                    Some(event) if event.id == appended.id => break Some(event),
                    Some(_) => continue,
                    None => break None,
                }
            }
        })
        .await;

        assert_eq!(
            received.ok().flatten().map(|event| event.id),
            Some(appended.id)
        );
    }
}
