//! Ports consumed by the sync coordinator and implemented by infrastructure.

mod adapter;
mod document_store;
mod inputs;
mod store;

pub use adapter::{ApplyContext, TargetAdapter};
pub use document_store::{
    DocumentChangeSubscription, DocumentFilter, DocumentOrder, DocumentRecord, DocumentStore,
    OrderDirection,
};
pub use inputs::{SyncRoleToDirectoryInput, SyncRoleToWorkspaceInput};
pub use store::{SyncEventStore, SyncEventSubscription};
