//! Application services and ports for the role synchronization engine.

#![forbid(unsafe_code)]

mod sync_ports;
mod sync_service;

pub use sync_ports::{
    ApplyContext, DocumentChangeSubscription, DocumentFilter, DocumentOrder, DocumentRecord,
    DocumentStore, OrderDirection, SyncEventStore, SyncEventSubscription,
    SyncRoleToDirectoryInput, SyncRoleToWorkspaceInput, TargetAdapter,
};
pub use sync_service::{SyncConfig, SyncService, SyncSubmission};
