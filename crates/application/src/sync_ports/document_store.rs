use async_trait::async_trait;
use rolebridge_core::AppResult;
use serde_json::Value;
use tokio::sync::mpsc;

/// Filter applied to document fields in queries and change feeds.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentFilter {
    /// Field equals the given value.
    Eq {
        /// Field name on the document.
        field: String,
        /// Value the field must equal.
        value: Value,
    },
    /// Array field contains the given value.
    ArrayContains {
        /// Field name on the document.
        field: String,
        /// Value the array must contain.
        value: Value,
    },
}

impl DocumentFilter {
    /// Builds an equality filter.
    #[must_use]
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::Eq {
            field: field.into(),
            value,
        }
    }

    /// Returns whether a document satisfies this filter.
    #[must_use]
    pub fn matches(&self, data: &Value) -> bool {
        match self {
            Self::Eq { field, value } => data.get(field.as_str()) == Some(value),
            Self::ArrayContains { field, value } => data
                .get(field.as_str())
                .and_then(Value::as_array)
                .is_some_and(|items| items.contains(value)),
        }
    }
}

/// Sort direction for ordered queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    /// Smallest value first.
    Ascending,
    /// Largest value first.
    Descending,
}

/// Ordering applied to a document query.
#[derive(Debug, Clone)]
pub struct DocumentOrder {
    /// Field name to order by.
    pub field: String,
    /// Sort direction.
    pub direction: OrderDirection,
}

/// One stored document with its store-assigned id.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    /// Store-assigned document id.
    pub id: String,
    /// Document body.
    pub data: Value,
}

/// Stream of created or updated documents matching a change-feed filter.
pub struct DocumentChangeSubscription {
    receiver: mpsc::UnboundedReceiver<DocumentRecord>,
}

impl DocumentChangeSubscription {
    /// Wraps a receiver fed by a store implementation.
    #[must_use]
    pub fn new(receiver: mpsc::UnboundedReceiver<DocumentRecord>) -> Self {
        Self { receiver }
    }

    /// Waits for the next changed document; `None` when the store is gone.
    pub async fn next(&mut self) -> Option<DocumentRecord> {
        self.receiver.recv().await
    }
}

/// Multi-tenant, schema-less collection store.
///
/// The single shared mutable resource of the engine; `create`, `update`, and
/// `update_where` are atomic single-document operations.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Queries a collection with equality/array filters, ordering, and limit.
    async fn query(
        &self,
        collection: &str,
        filters: &[DocumentFilter],
        order: Option<&DocumentOrder>,
        limit: Option<usize>,
    ) -> AppResult<Vec<DocumentRecord>>;

    /// Returns one document by id.
    async fn get(&self, collection: &str, id: &str) -> AppResult<Option<DocumentRecord>>;

    /// Creates a document with a store-assigned id.
    async fn create(&self, collection: &str, data: Value) -> AppResult<DocumentRecord>;

    /// Merges top-level fields of `patch` into an existing document.
    async fn update(&self, collection: &str, id: &str, patch: Value) -> AppResult<()>;

    /// Merges `patch` only when the current document satisfies every
    /// precondition; returns whether the patch was applied.
    async fn update_where(
        &self,
        collection: &str,
        id: &str,
        preconditions: &[DocumentFilter],
        patch: Value,
    ) -> AppResult<bool>;

    /// Deletes one document by id; missing documents are a no-op.
    async fn delete(&self, collection: &str, id: &str) -> AppResult<()>;

    /// Subscribes to documents created or updated after this call.
    async fn on_change(
        &self,
        collection: &str,
        filters: Vec<DocumentFilter>,
    ) -> AppResult<DocumentChangeSubscription>;
}
