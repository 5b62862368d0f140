//! Domain entities and invariants for cross-system role synchronization.

#![forbid(unsafe_code)]

mod assignment;
mod conflict;
mod role_mapping;
mod sync_event;
mod system;

pub use assignment::RoleAssignment;
pub use conflict::{ConflictPolicy, ConflictResolution};
pub use role_mapping::{RoleMapping, RoleMappingResolver, RoleTemplate};
pub use sync_event::{
    NewSyncEvent, StatusChange, SyncEvent, SyncEventKind, SyncEventPayload, SyncEventStatus,
};
pub use system::SyncSystem;
