//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod directory_role_adapter;
mod document_sync_event_store;
mod in_memory_document_store;
mod postgres_document_store;
mod postgres_sync_event_store;
mod workspace_role_adapter;

pub use directory_role_adapter::DirectoryRoleAdapter;
pub use document_sync_event_store::DocumentSyncEventStore;
pub use in_memory_document_store::InMemoryDocumentStore;
pub use postgres_document_store::PostgresDocumentStore;
pub use postgres_sync_event_store::PostgresSyncEventStore;
pub use workspace_role_adapter::WorkspaceRoleAdapter;
