use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use rolebridge_application::{
    DocumentChangeSubscription, DocumentFilter, DocumentOrder, DocumentRecord, DocumentStore,
    OrderDirection,
};
use rolebridge_core::{AppError, AppResult};
use serde_json::Value;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

struct Watcher {
    collection: String,
    filters: Vec<DocumentFilter>,
    sender: mpsc::UnboundedSender<DocumentRecord>,
}

/// In-memory document store implementation.
///
/// Every mutation is atomic under one write lock, matching the contract that
/// concurrent writers never observe a half-updated document.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
    watchers: RwLock<Vec<Watcher>>,
}

impl InMemoryDocumentStore {
    /// Creates an empty in-memory document store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            watchers: RwLock::new(Vec::new()),
        }
    }

    async fn notify(&self, collection: &str, record: &DocumentRecord) {
        let mut watchers = self.watchers.write().await;
        watchers.retain(|watcher| {
            if watcher.collection != collection {
                return true;
            }

            if !watcher.filters.iter().all(|filter| filter.matches(&record.data)) {
                return true;
            }

            watcher.sender.send(record.clone()).is_ok()
        });
    }
}

fn merge_top_level(target: &mut Value, patch: &Value) {
    if let (Value::Object(target), Value::Object(patch)) = (target, patch) {
        for (key, value) in patch {
            target.insert(key.clone(), value.clone());
        }
    }
}

fn compare_field(left: &Value, right: &Value, field: &str) -> Ordering {
    let left = left.get(field);
    let right = right.get(field);

    match (
        left.and_then(Value::as_f64),
        right.and_then(Value::as_f64),
    ) {
        (Some(left), Some(right)) => left.partial_cmp(&right).unwrap_or(Ordering::Equal),
        _ => left
            .and_then(Value::as_str)
            .unwrap_or("")
            .cmp(right.and_then(Value::as_str).unwrap_or("")),
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn query(
        &self,
        collection: &str,
        filters: &[DocumentFilter],
        order: Option<&DocumentOrder>,
        limit: Option<usize>,
    ) -> AppResult<Vec<DocumentRecord>> {
        let collections = self.collections.read().await;
        let mut matched: Vec<DocumentRecord> = collections
            .get(collection)
            .map(|documents| {
                documents
                    .iter()
                    .filter(|(_, data)| filters.iter().all(|filter| filter.matches(data)))
                    .map(|(id, data)| DocumentRecord {
                        id: id.clone(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = order {
            matched.sort_by(|left, right| {
                let ordering = compare_field(&left.data, &right.data, order.field.as_str());
                match order.direction {
                    OrderDirection::Ascending => ordering,
                    OrderDirection::Descending => ordering.reverse(),
                }
            });
        }

        if let Some(limit) = limit {
            matched.truncate(limit);
        }

        Ok(matched)
    }

    async fn get(&self, collection: &str, id: &str) -> AppResult<Option<DocumentRecord>> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .and_then(|documents| documents.get(id))
            .map(|data| DocumentRecord {
                id: id.to_owned(),
                data: data.clone(),
            }))
    }

    async fn create(&self, collection: &str, data: Value) -> AppResult<DocumentRecord> {
        let id = Uuid::new_v4().to_string();
        let record = DocumentRecord {
            id: id.clone(),
            data: data.clone(),
        };

        self.collections
            .write()
            .await
            .entry(collection.to_owned())
            .or_default()
            .insert(id, data);

        self.notify(collection, &record).await;
        Ok(record)
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> AppResult<()> {
        let record = {
            let mut collections = self.collections.write().await;
            let document = collections
                .get_mut(collection)
                .and_then(|documents| documents.get_mut(id))
                .ok_or_else(|| {
                    AppError::NotFound(format!(
                        "document '{id}' does not exist in collection '{collection}'"
                    ))
                })?;

            merge_top_level(document, &patch);
            DocumentRecord {
                id: id.to_owned(),
                data: document.clone(),
            }
        };

        self.notify(collection, &record).await;
        Ok(())
    }

    async fn update_where(
        &self,
        collection: &str,
        id: &str,
        preconditions: &[DocumentFilter],
        patch: Value,
    ) -> AppResult<bool> {
        let record = {
            let mut collections = self.collections.write().await;
            let Some(document) = collections
                .get_mut(collection)
                .and_then(|documents| documents.get_mut(id))
            else {
                return Ok(false);
            };

            if !preconditions.iter().all(|filter| filter.matches(document)) {
                return Ok(false);
            }

            merge_top_level(document, &patch);
            DocumentRecord {
                id: id.to_owned(),
                data: document.clone(),
            }
        };

        self.notify(collection, &record).await;
        Ok(true)
    }

    async fn delete(&self, collection: &str, id: &str) -> AppResult<()> {
        self.collections
            .write()
            .await
            .get_mut(collection)
            .and_then(|documents| documents.remove(id));
        Ok(())
    }

    async fn on_change(
        &self,
        collection: &str,
        filters: Vec<DocumentFilter>,
    ) -> AppResult<DocumentChangeSubscription> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.watchers.write().await.push(Watcher {
            collection: collection.to_owned(),
            filters,
            sender,
        });
        Ok(DocumentChangeSubscription::new(receiver))
    }
}
