use std::collections::BTreeSet;

use async_trait::async_trait;
use rolebridge_core::{AdapterError, TenantId};
use rolebridge_domain::{ConflictPolicy, RoleMapping, SyncSystem};

/// Context a target adapter applies synchronized writes under.
#[derive(Debug, Clone, Copy)]
pub struct ApplyContext {
    /// Policy deciding how conflicting hierarchies settle.
    pub conflict_policy: ConflictPolicy,
    /// Whether the originating event was an explicit administrator action.
    pub admin_action: bool,
}

/// Applies resolved role mappings to one target system's persisted records.
///
/// Implementations must read before writing (create vs. update), write
/// `synced_at`/`sync_source` provenance alongside the role fields, and be
/// idempotent when reissued with the same payload.
#[async_trait]
pub trait TargetAdapter: Send + Sync {
    /// Returns the system this adapter writes to.
    fn system(&self) -> SyncSystem;

    /// Applies a resolved role mapping to the subject's assignment in scope.
    async fn apply_role_mapping(
        &self,
        tenant_id: TenantId,
        subject_id: &str,
        scope_id: &str,
        mapping: &RoleMapping,
        context: ApplyContext,
    ) -> Result<(), AdapterError>;

    /// Removes the subject's assignment in scope.
    ///
    /// A routine removal of a scope's singleton admin assignment demotes to
    /// the baseline role instead of deleting; an admin-tagged removal deletes.
    async fn remove_role_assignment(
        &self,
        tenant_id: TenantId,
        subject_id: &str,
        scope_id: &str,
        context: ApplyContext,
    ) -> Result<(), AdapterError>;

    /// Updates only the hierarchy of an existing assignment.
    async fn update_hierarchy(
        &self,
        tenant_id: TenantId,
        subject_id: &str,
        scope_id: &str,
        hierarchy: i32,
        context: ApplyContext,
    ) -> Result<(), AdapterError>;

    /// Replaces only the permission set of an existing assignment.
    async fn update_permissions(
        &self,
        tenant_id: TenantId,
        subject_id: &str,
        scope_id: &str,
        permissions: &BTreeSet<String>,
        context: ApplyContext,
    ) -> Result<(), AdapterError>;
}
