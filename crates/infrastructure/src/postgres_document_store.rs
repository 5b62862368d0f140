use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rolebridge_application::{
    DocumentChangeSubscription, DocumentFilter, DocumentOrder, DocumentRecord, DocumentStore,
    OrderDirection,
};
use rolebridge_core::{AppError, AppResult};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use tokio::sync::mpsc;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// PostgreSQL-backed document store over one JSONB table.
///
/// Documents live in `documents (collection, id, data)`; every mutation is a
/// single statement, so concurrent writers never observe a half-updated
/// document. Change feeds tail the table on an `(updated_at, id)` watermark.
#[derive(Clone)]
pub struct PostgresDocumentStore {
    pool: PgPool,
}

impl PostgresDocumentStore {
    /// Creates a store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct DocumentRow {
    id: uuid::Uuid,
    data: Value,
}

impl DocumentRow {
    fn into_record(self) -> DocumentRecord {
        DocumentRecord {
            id: self.id.to_string(),
            data: self.data,
        }
    }
}

#[derive(Debug, FromRow)]
struct ChangedDocumentRow {
    id: uuid::Uuid,
    data: Value,
    updated_at: DateTime<Utc>,
}

/// Appends one `AND` clause per filter, with `$n` placeholders continuing
/// from `next_placeholder`.
fn push_filter_clauses(sql: &mut String, filters: &[DocumentFilter], next_placeholder: usize) {
    let mut placeholder = next_placeholder;
    for filter in filters {
        let clause = match filter {
            DocumentFilter::Eq { .. } => " AND data -> ${field}::TEXT = ${value}",
            DocumentFilter::ArrayContains { .. } => " AND data -> ${field}::TEXT @> ${value}",
        };
        sql.push_str(
            clause
                .replace("{field}", placeholder.to_string().as_str())
                .replace("{value}", (placeholder + 1).to_string().as_str())
                .as_str(),
        );
        placeholder += 2;
    }
}

fn filter_parts(filter: &DocumentFilter) -> (&str, &Value) {
    match filter {
        DocumentFilter::Eq { field, value } | DocumentFilter::ArrayContains { field, value } => {
            (field.as_str(), value)
        }
    }
}

fn store_error(operation: &str, error: sqlx::Error) -> AppError {
    AppError::Internal(format!("document store {operation} failed: {error}"))
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    async fn query(
        &self,
        collection: &str,
        filters: &[DocumentFilter],
        order: Option<&DocumentOrder>,
        limit: Option<usize>,
    ) -> AppResult<Vec<DocumentRecord>> {
        let mut sql = String::from(
            r#"
            SELECT id, data
            FROM documents
            WHERE collection = $1
            "#,
        );
        push_filter_clauses(&mut sql, filters, 2);
        let mut placeholder = 2 + filters.len() * 2;

        if order.is_some() {
            let direction = match order.map(|order| order.direction) {
                Some(OrderDirection::Descending) => "DESC",
                _ => "ASC",
            };
            sql.push_str(format!(" ORDER BY data -> ${placeholder}::TEXT {direction}").as_str());
            placeholder += 1;
        }
        if limit.is_some() {
            sql.push_str(format!(" LIMIT ${placeholder}").as_str());
        }

        let mut query = sqlx::query_as::<_, DocumentRow>(sql.as_str()).bind(collection);
        for filter in filters {
            let (field, value) = filter_parts(filter);
            query = query.bind(field.to_owned()).bind(value.clone());
        }
        if let Some(order) = order {
            query = query.bind(order.field.clone());
        }
        if let Some(limit) = limit {
            let limit = i64::try_from(limit)
                .map_err(|error| AppError::Validation(format!("invalid query limit: {error}")))?;
            query = query.bind(limit);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|error| store_error("query", error))?;

        Ok(rows.into_iter().map(DocumentRow::into_record).collect())
    }

    async fn get(&self, collection: &str, id: &str) -> AppResult<Option<DocumentRecord>> {
        let Ok(document_uuid) = uuid::Uuid::parse_str(id) else {
            return Ok(None);
        };

        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT id, data
            FROM documents
            WHERE collection = $1
              AND id = $2
            "#,
        )
        .bind(collection)
        .bind(document_uuid)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| store_error("get", error))?;

        Ok(row.map(DocumentRow::into_record))
    }

    async fn create(&self, collection: &str, data: Value) -> AppResult<DocumentRecord> {
        let row = sqlx::query_as::<_, DocumentRow>(
            r#"
            INSERT INTO documents (collection, data, created_at, updated_at)
            VALUES ($1, $2, now(), now())
            RETURNING id, data
            "#,
        )
        .bind(collection)
        .bind(&data)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| store_error("create", error))?;

        Ok(row.into_record())
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> AppResult<()> {
        let document_uuid = uuid::Uuid::parse_str(id).map_err(|_| {
            AppError::NotFound(format!(
                "document '{id}' does not exist in collection '{collection}'"
            ))
        })?;

        let result = sqlx::query(
            r#"
            UPDATE documents
            SET data = data || $3, updated_at = now()
            WHERE collection = $1
              AND id = $2
            "#,
        )
        .bind(collection)
        .bind(document_uuid)
        .bind(&patch)
        .execute(&self.pool)
        .await
        .map_err(|error| store_error("update", error))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "document '{id}' does not exist in collection '{collection}'"
            )));
        }

        Ok(())
    }

    async fn update_where(
        &self,
        collection: &str,
        id: &str,
        preconditions: &[DocumentFilter],
        patch: Value,
    ) -> AppResult<bool> {
        let Ok(document_uuid) = uuid::Uuid::parse_str(id) else {
            return Ok(false);
        };

        let mut sql = String::from(
            r#"
            UPDATE documents
            SET data = data || $3, updated_at = now()
            WHERE collection = $1
              AND id = $2
            "#,
        );
        push_filter_clauses(&mut sql, preconditions, 4);

        let mut query = sqlx::query(sql.as_str())
            .bind(collection)
            .bind(document_uuid)
            .bind(&patch);
        for filter in preconditions {
            let (field, value) = filter_parts(filter);
            query = query.bind(field.to_owned()).bind(value.clone());
        }

        let result = query
            .execute(&self.pool)
            .await
            .map_err(|error| store_error("conditional update", error))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, collection: &str, id: &str) -> AppResult<()> {
        let Ok(document_uuid) = uuid::Uuid::parse_str(id) else {
            return Ok(());
        };

        sqlx::query(
            r#"
            DELETE FROM documents
            WHERE collection = $1
              AND id = $2
            "#,
        )
        .bind(collection)
        .bind(document_uuid)
        .execute(&self.pool)
        .await
        .map_err(|error| store_error("delete", error))?;

        Ok(())
    }

    async fn on_change(
        &self,
        collection: &str,
        filters: Vec<DocumentFilter>,
    ) -> AppResult<DocumentChangeSubscription> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let pool = self.pool.clone();
        let collection = collection.to_owned();

        tokio::spawn(async move {
            let mut watermark_at = Utc::now();
            let mut watermark_id = uuid::Uuid::nil();
            let mut ticker = tokio::time::interval(POLL_INTERVAL);

            loop {
                ticker.tick().await;
                if sender.is_closed() {
                    break;
                }

                let rows = sqlx::query_as::<_, ChangedDocumentRow>(
                    r#"
                    SELECT id, data, updated_at
                    FROM documents
                    WHERE collection = $1
                      AND (updated_at, id) > ($2, $3)
                    ORDER BY updated_at ASC, id ASC
                    "#,
                )
                .bind(collection.as_str())
                .bind(watermark_at)
                .bind(watermark_id)
                .fetch_all(&pool)
                .await;

                let rows = match rows {
                    Ok(rows) => rows,
                    Err(error) => {
                        tracing::warn!(error = %error, "document change tail query failed");
                        continue;
                    }
                };

                for row in rows {
                    watermark_at = row.updated_at;
                    watermark_id = row.id;

                    if !filters.iter().all(|filter| filter.matches(&row.data)) {
                        continue;
                    }

                    let record = DocumentRecord {
                        id: row.id.to_string(),
                        data: row.data,
                    };
                    if sender.send(record).is_err() {
                        return;
                    }
                }
            }
        });

        Ok(DocumentChangeSubscription::new(receiver))
    }
}
