use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rolebridge_core::TenantId;
use serde::{Deserialize, Serialize};

use crate::system::SyncSystem;

/// Role assignment record persisted on either side of a sync pair.
///
/// `sync_source` and `synced_at` distinguish synchronized writes from
/// locally-originated ones, which is what lets a change listener skip
/// re-propagating a change back to the system it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    /// Subject holding the role.
    pub subject_id: String,
    /// Scope the role applies within.
    pub scope_id: String,
    /// Tenant the assignment belongs to.
    pub tenant_id: TenantId,
    /// Role token in the owning system's vocabulary.
    pub role: String,
    /// Effective hierarchy of the assignment.
    pub hierarchy: i32,
    /// Permission set granted by the assignment.
    pub permissions: BTreeSet<String>,
    /// System the last synchronized write originated in, if any.
    pub sync_source: Option<SyncSystem>,
    /// Time of the last synchronized write, if any.
    pub synced_at: Option<DateTime<Utc>>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}
