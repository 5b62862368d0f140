use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rolebridge_core::{AppError, AppResult, SyncActor, TenantId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::role_mapping::RoleMapping;
use crate::system::SyncSystem;

/// Kind of role change a sync event propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEventKind {
    /// A role was assigned to a subject within a scope.
    RoleAssigned,
    /// An existing role assignment changed.
    RoleUpdated,
    /// A role assignment was removed.
    RoleRemoved,
    /// Only the hierarchy of an assignment changed.
    HierarchyChanged,
    /// Only the permission set of an assignment changed.
    PermissionsUpdated,
}

impl SyncEventKind {
    /// Returns a stable storage value for this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoleAssigned => "role_assigned",
            Self::RoleUpdated => "role_updated",
            Self::RoleRemoved => "role_removed",
            Self::HierarchyChanged => "hierarchy_changed",
            Self::PermissionsUpdated => "permissions_updated",
        }
    }
}

impl FromStr for SyncEventKind {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "role_assigned" => Ok(Self::RoleAssigned),
            "role_updated" => Ok(Self::RoleUpdated),
            "role_removed" => Ok(Self::RoleRemoved),
            "hierarchy_changed" => Ok(Self::HierarchyChanged),
            "permissions_updated" => Ok(Self::PermissionsUpdated),
            _ => Err(AppError::Validation(format!(
                "unknown sync event kind '{value}'"
            ))),
        }
    }
}

/// Processing status of a sync event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEventStatus {
    /// Appended and waiting for a processor.
    Pending,
    /// Claimed by a processor.
    Processing,
    /// Applied to the target system.
    Completed,
    /// Processing failed; resubmission appends a fresh event.
    Failed,
}

/// Outcome of validating a status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    /// The transition moves the event to a new status.
    Applied,
    /// The transition is an idempotent re-apply and must be a no-op.
    Unchanged,
}

impl SyncEventStatus {
    /// Returns a stable storage value for this status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Returns whether this status is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Validates a transition from this status to `to`.
    ///
    /// Re-applying the current status is an idempotent no-op; anything
    /// outside `pending → processing → {completed, failed}` is illegal and
    /// reported loudly.
    pub fn validate_transition(self, to: Self) -> AppResult<StatusChange> {
        if self == to {
            return Ok(StatusChange::Unchanged);
        }

        let legal = matches!(
            (self, to),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        );

        if legal {
            Ok(StatusChange::Applied)
        } else {
            Err(AppError::IllegalStatusTransition {
                from: self.as_str().to_owned(),
                to: to.as_str().to_owned(),
            })
        }
    }
}

impl FromStr for SyncEventStatus {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(AppError::Validation(format!(
                "unknown sync event status '{value}'"
            ))),
        }
    }
}

/// Payload carried by a sync event, one concrete shape per kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEventPayload {
    /// A resolved mapping to assign on the target side.
    RoleAssigned {
        /// Resolved role mapping to apply.
        mapping: RoleMapping,
        /// Principal that triggered the change, when known.
        actor: Option<SyncActor>,
        /// Free-text reason for the change.
        reason: Option<String>,
        /// Whether the change was an explicit administrator action.
        admin_action: bool,
        /// Arbitrary metadata forwarded with the event.
        metadata: BTreeMap<String, Value>,
    },
    /// A resolved mapping replacing an existing assignment.
    RoleUpdated {
        /// Resolved role mapping to apply.
        mapping: RoleMapping,
        /// Principal that triggered the change, when known.
        actor: Option<SyncActor>,
        /// Free-text reason for the change.
        reason: Option<String>,
        /// Whether the change was an explicit administrator action.
        admin_action: bool,
        /// Arbitrary metadata forwarded with the event.
        metadata: BTreeMap<String, Value>,
    },
    /// Removal of an assignment on the target side.
    RoleRemoved {
        /// Role token that was removed on the source side.
        source_role: String,
        /// Principal that triggered the change, when known.
        actor: Option<SyncActor>,
        /// Free-text reason for the change.
        reason: Option<String>,
        /// Whether the change was an explicit administrator action.
        admin_action: bool,
        /// Arbitrary metadata forwarded with the event.
        metadata: BTreeMap<String, Value>,
    },
    /// Hierarchy-only change on the target side.
    HierarchyChanged {
        /// New effective hierarchy.
        hierarchy: i32,
        /// Principal that triggered the change, when known.
        actor: Option<SyncActor>,
        /// Free-text reason for the change.
        reason: Option<String>,
        /// Whether the change was an explicit administrator action.
        admin_action: bool,
        /// Arbitrary metadata forwarded with the event.
        metadata: BTreeMap<String, Value>,
    },
    /// Permission-set-only change on the target side.
    PermissionsUpdated {
        /// New permission set.
        permissions: std::collections::BTreeSet<String>,
        /// Principal that triggered the change, when known.
        actor: Option<SyncActor>,
        /// Free-text reason for the change.
        reason: Option<String>,
        /// Whether the change was an explicit administrator action.
        admin_action: bool,
        /// Arbitrary metadata forwarded with the event.
        metadata: BTreeMap<String, Value>,
    },
}

impl SyncEventPayload {
    /// Returns the event kind this payload shape belongs to.
    #[must_use]
    pub fn kind(&self) -> SyncEventKind {
        match self {
            Self::RoleAssigned { .. } => SyncEventKind::RoleAssigned,
            Self::RoleUpdated { .. } => SyncEventKind::RoleUpdated,
            Self::RoleRemoved { .. } => SyncEventKind::RoleRemoved,
            Self::HierarchyChanged { .. } => SyncEventKind::HierarchyChanged,
            Self::PermissionsUpdated { .. } => SyncEventKind::PermissionsUpdated,
        }
    }

    /// Returns whether the payload is tagged as an administrator action.
    #[must_use]
    pub fn admin_action(&self) -> bool {
        match self {
            Self::RoleAssigned { admin_action, .. }
            | Self::RoleUpdated { admin_action, .. }
            | Self::RoleRemoved { admin_action, .. }
            | Self::HierarchyChanged { admin_action, .. }
            | Self::PermissionsUpdated { admin_action, .. } => *admin_action,
        }
    }

    fn validate(&self) -> AppResult<()> {
        match self {
            Self::RoleAssigned { mapping, .. } | Self::RoleUpdated { mapping, .. } => {
                if mapping.hierarchy <= 0 {
                    return Err(AppError::Validation(
                        "mapping hierarchy must be greater than zero".to_owned(),
                    ));
                }

                Ok(())
            }
            Self::RoleRemoved { source_role, .. } => {
                if source_role.trim().is_empty() {
                    return Err(AppError::Validation(
                        "role_removed payload requires a non-empty source_role".to_owned(),
                    ));
                }

                Ok(())
            }
            Self::HierarchyChanged { hierarchy, .. } => {
                if *hierarchy <= 0 {
                    return Err(AppError::Validation(
                        "hierarchy must be greater than zero".to_owned(),
                    ));
                }

                Ok(())
            }
            Self::PermissionsUpdated { permissions, .. } => {
                if permissions.is_empty() {
                    return Err(AppError::Validation(
                        "permissions_updated payload requires at least one permission".to_owned(),
                    ));
                }

                Ok(())
            }
        }
    }
}

/// Input payload used to append a validated sync event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSyncEvent {
    source_system: SyncSystem,
    target_system: SyncSystem,
    tenant_id: TenantId,
    subject_id: String,
    scope_id: String,
    payload: SyncEventPayload,
}

impl NewSyncEvent {
    /// Creates a validated sync event input.
    ///
    /// The source and target systems must differ, and subject and scope must
    /// be present; the payload is validated against its kind.
    pub fn new(
        source_system: SyncSystem,
        target_system: SyncSystem,
        tenant_id: TenantId,
        subject_id: impl Into<String>,
        scope_id: impl Into<String>,
        payload: SyncEventPayload,
    ) -> AppResult<Self> {
        if source_system == target_system {
            return Err(AppError::Validation(
                "source and target system must differ".to_owned(),
            ));
        }

        let subject_id = subject_id.into();
        if subject_id.trim().is_empty() {
            return Err(AppError::Validation(
                "subject_id must not be empty".to_owned(),
            ));
        }

        let scope_id = scope_id.into();
        if scope_id.trim().is_empty() {
            return Err(AppError::Validation("scope_id must not be empty".to_owned()));
        }

        payload.validate()?;

        Ok(Self {
            source_system,
            target_system,
            tenant_id,
            subject_id,
            scope_id,
            payload,
        })
    }

    /// Returns the kind derived from the payload.
    #[must_use]
    pub fn kind(&self) -> SyncEventKind {
        self.payload.kind()
    }

    /// Returns the system the change originated in.
    #[must_use]
    pub fn source_system(&self) -> SyncSystem {
        self.source_system
    }

    /// Returns the system the change is applied to.
    #[must_use]
    pub fn target_system(&self) -> SyncSystem {
        self.target_system
    }

    /// Returns the tenant the event belongs to.
    #[must_use]
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Returns the subject whose role changed.
    #[must_use]
    pub fn subject_id(&self) -> &str {
        self.subject_id.as_str()
    }

    /// Returns the scope the role applies within.
    #[must_use]
    pub fn scope_id(&self) -> &str {
        self.scope_id.as_str()
    }

    /// Returns the payload carried by the event.
    #[must_use]
    pub fn payload(&self) -> &SyncEventPayload {
        &self.payload
    }
}

/// Persisted unit of propagation between the two systems.
///
/// Processing must be a pure function of this record; at-least-once delivery
/// is safe because duplicates are rejected at the claim step and terminal
/// status updates are idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEvent {
    /// Store-assigned opaque identifier.
    pub id: String,
    /// Kind of role change.
    pub kind: SyncEventKind,
    /// System the change originated in.
    pub source_system: SyncSystem,
    /// System the change is applied to.
    pub target_system: SyncSystem,
    /// Tenant the event belongs to.
    pub tenant_id: TenantId,
    /// Subject whose role changed.
    pub subject_id: String,
    /// Scope the role applies within.
    pub scope_id: String,
    /// Payload carried by the event.
    pub payload: SyncEventPayload,
    /// Current processing status.
    pub status: SyncEventStatus,
    /// Error description, present only for failed events.
    pub error: Option<String>,
    /// Store-assigned append time.
    pub created_at: DateTime<Utc>,
    /// Last status change time.
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rolebridge_core::TenantId;

    use super::{NewSyncEvent, StatusChange, SyncEventPayload, SyncEventStatus};
    use crate::role_mapping::RoleMappingResolver;
    use crate::system::SyncSystem;

    fn assigned_payload() -> SyncEventPayload {
        let mapping = match RoleMappingResolver::new().resolve("admin", None, None) {
            Ok(mapping) => mapping,
            Err(error) => panic!("admin must resolve: {error}"),
        };

        SyncEventPayload::RoleAssigned {
            mapping,
            actor: None,
            reason: None,
            admin_action: false,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn new_event_rejects_matching_systems() {
        let event = NewSyncEvent::new(
            SyncSystem::Directory,
            SyncSystem::Directory,
            TenantId::new(),
            "u1",
            "p1",
            assigned_payload(),
        );

        assert!(event.is_err());
    }

    #[test]
    fn new_event_rejects_empty_subject() {
        let event = NewSyncEvent::new(
            SyncSystem::Directory,
            SyncSystem::Workspace,
            TenantId::new(),
            "  ",
            "p1",
            assigned_payload(),
        );

        assert!(event.is_err());
    }

    #[test]
    fn pending_to_processing_is_legal() {
        let change = SyncEventStatus::Pending.validate_transition(SyncEventStatus::Processing);
        assert_eq!(change.ok(), Some(StatusChange::Applied));
    }

    #[test]
    fn completed_to_pending_is_illegal() {
        let change = SyncEventStatus::Completed.validate_transition(SyncEventStatus::Pending);
        assert!(change.is_err());
    }

    #[test]
    fn terminal_reapply_is_a_noop() {
        let change = SyncEventStatus::Completed.validate_transition(SyncEventStatus::Completed);
        assert_eq!(change.ok(), Some(StatusChange::Unchanged));
    }

    #[test]
    fn processing_to_pending_is_illegal() {
        let change = SyncEventStatus::Processing.validate_transition(SyncEventStatus::Pending);
        assert!(change.is_err());
    }
}
