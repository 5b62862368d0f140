use std::collections::BTreeMap;

use rolebridge_core::{SyncActor, TenantId};
use rolebridge_domain::RoleTemplate;
use serde_json::Value;

/// Input for propagating a directory role change to the workspace.
#[derive(Debug, Clone)]
pub struct SyncRoleToWorkspaceInput {
    /// Tenant the change belongs to.
    pub tenant_id: TenantId,
    /// Subject whose role changed.
    pub subject_id: String,
    /// Scope the role applies within.
    pub scope_id: String,
    /// Role token in the directory's vocabulary.
    pub source_role: String,
    /// Optional template overriding the precedence table.
    pub template: Option<RoleTemplate>,
    /// Optional tier recorded as mapping provenance.
    pub tier: Option<u32>,
    /// Principal that triggered the change, when known.
    pub actor: Option<SyncActor>,
    /// Free-text reason for the change.
    pub reason: Option<String>,
    /// Whether the change is an explicit administrator action.
    pub admin_action: bool,
    /// Arbitrary metadata forwarded with the event.
    pub metadata: BTreeMap<String, Value>,
}

impl SyncRoleToWorkspaceInput {
    /// Creates a routine (non-admin) input with no template, tier, or reason.
    #[must_use]
    pub fn routine(
        tenant_id: TenantId,
        subject_id: impl Into<String>,
        scope_id: impl Into<String>,
        source_role: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id,
            subject_id: subject_id.into(),
            scope_id: scope_id.into(),
            source_role: source_role.into(),
            template: None,
            tier: None,
            actor: None,
            reason: None,
            admin_action: false,
            metadata: BTreeMap::new(),
        }
    }
}

/// Input for propagating a workspace role change back to the directory.
#[derive(Debug, Clone)]
pub struct SyncRoleToDirectoryInput {
    /// Tenant the change belongs to.
    pub tenant_id: TenantId,
    /// Subject whose role changed.
    pub subject_id: String,
    /// Scope the role applies within.
    pub scope_id: String,
    /// Role token in the workspace's vocabulary.
    pub workspace_role: String,
    /// Effective hierarchy reported by the workspace side.
    pub hierarchy: i32,
    /// Principal that triggered the change, when known.
    pub actor: Option<SyncActor>,
    /// Free-text reason for the change.
    pub reason: Option<String>,
    /// Whether the change is an explicit administrator action.
    pub admin_action: bool,
    /// Arbitrary metadata forwarded with the event.
    pub metadata: BTreeMap<String, Value>,
}

impl SyncRoleToDirectoryInput {
    /// Creates a routine (non-admin) input with no reason or metadata.
    #[must_use]
    pub fn routine(
        tenant_id: TenantId,
        subject_id: impl Into<String>,
        scope_id: impl Into<String>,
        workspace_role: impl Into<String>,
        hierarchy: i32,
    ) -> Self {
        Self {
            tenant_id,
            subject_id: subject_id.into(),
            scope_id: scope_id.into(),
            workspace_role: workspace_role.into(),
            hierarchy,
            actor: None,
            reason: None,
            admin_action: false,
            metadata: BTreeMap::new(),
        }
    }
}
