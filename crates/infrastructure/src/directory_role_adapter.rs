use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rolebridge_application::{ApplyContext, DocumentFilter, DocumentRecord, DocumentStore, TargetAdapter};
use rolebridge_core::{AdapterError, TenantId};
use rolebridge_domain::{
    ConflictResolution, RoleAssignment, RoleMapping, RoleMappingResolver, SyncSystem,
};
use serde_json::json;

const USERS: &str = "directory_users";
const GROUPS: &str = "directory_groups";
const ASSIGNMENTS: &str = "directory_role_assignments";

/// Directory role token that must have at most one holder per group.
const SINGLETON_ROLE: &str = "admin";

/// Applies synchronized role writes to the directory side.
///
/// Directory records live in document collections: users, groups, and one
/// assignment document per user and group. Every write stamps `sync_source`
/// and `synced_at` so directory-side change listeners can tell a
/// synchronized write from a local one and skip echoing it back.
pub struct DirectoryRoleAdapter {
    documents: Arc<dyn DocumentStore>,
    resolver: RoleMappingResolver,
}

impl DirectoryRoleAdapter {
    /// Creates an adapter over the given document store.
    #[must_use]
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self {
            documents,
            resolver: RoleMappingResolver::new(),
        }
    }

    async fn user_exists(
        &self,
        tenant_id: TenantId,
        user_id: &str,
    ) -> Result<bool, AdapterError> {
        let found = self
            .documents
            .query(
                USERS,
                &[
                    DocumentFilter::eq("tenant_id", json!(tenant_id.to_string())),
                    DocumentFilter::eq("user_id", json!(user_id)),
                ],
                None,
                Some(1),
            )
            .await
            .map_err(backend)?;
        Ok(!found.is_empty())
    }

    async fn group_exists(
        &self,
        tenant_id: TenantId,
        group_id: &str,
    ) -> Result<bool, AdapterError> {
        let found = self
            .documents
            .query(
                GROUPS,
                &[
                    DocumentFilter::eq("tenant_id", json!(tenant_id.to_string())),
                    DocumentFilter::eq("group_id", json!(group_id)),
                ],
                None,
                Some(1),
            )
            .await
            .map_err(backend)?;
        Ok(!found.is_empty())
    }

    async fn find_assignment(
        &self,
        tenant_id: TenantId,
        user_id: &str,
        group_id: &str,
    ) -> Result<Option<DocumentRecord>, AdapterError> {
        let mut found = self
            .documents
            .query(
                ASSIGNMENTS,
                &[
                    DocumentFilter::eq("tenant_id", json!(tenant_id.to_string())),
                    DocumentFilter::eq("subject_id", json!(user_id)),
                    DocumentFilter::eq("scope_id", json!(group_id)),
                ],
                None,
                Some(1),
            )
            .await
            .map_err(backend)?;
        Ok(found.pop())
    }

    /// Rejects a write that would give a group a second `admin` holder.
    async fn check_singleton_holder(
        &self,
        tenant_id: TenantId,
        user_id: &str,
        group_id: &str,
        role: &str,
    ) -> Result<(), AdapterError> {
        if role != SINGLETON_ROLE {
            return Ok(());
        }

        let holders = self
            .documents
            .query(
                ASSIGNMENTS,
                &[
                    DocumentFilter::eq("tenant_id", json!(tenant_id.to_string())),
                    DocumentFilter::eq("scope_id", json!(group_id)),
                    DocumentFilter::eq("role", json!(SINGLETON_ROLE)),
                ],
                None,
                None,
            )
            .await
            .map_err(backend)?;

        for holder in &holders {
            let holder = parse_assignment(holder)?;
            if holder.subject_id != user_id {
                return Err(AdapterError::ConflictingAdminInvariant {
                    scope_id: group_id.to_owned(),
                    role: SINGLETON_ROLE.to_owned(),
                    holder: holder.subject_id,
                });
            }
        }

        Ok(())
    }

    async fn write_assignment(
        &self,
        tenant_id: TenantId,
        user_id: &str,
        group_id: &str,
        existing: Option<&DocumentRecord>,
        role: &str,
        hierarchy: i32,
        permissions: &BTreeSet<String>,
    ) -> Result<(), AdapterError> {
        let now = Utc::now();
        let assignment = RoleAssignment {
            subject_id: user_id.to_owned(),
            scope_id: group_id.to_owned(),
            tenant_id,
            role: role.to_owned(),
            hierarchy,
            permissions: permissions.clone(),
            sync_source: Some(self.system().counterpart()),
            synced_at: Some(now),
            updated_at: now,
        };
        let data = serde_json::to_value(&assignment).map_err(|error| {
            AdapterError::BackendUnavailable(format!(
                "failed to serialize assignment document: {error}"
            ))
        })?;

        match existing {
            Some(record) => self
                .documents
                .update(ASSIGNMENTS, record.id.as_str(), data)
                .await
                .map_err(backend),
            None => self
                .documents
                .create(ASSIGNMENTS, data)
                .await
                .map(|_| ())
                .map_err(backend),
        }
    }

    /// Updates only the provenance stamps of an assignment whose role fields
    /// won the conflict and stay as they are.
    async fn touch_provenance(&self, record: &DocumentRecord) -> Result<(), AdapterError> {
        let now = Utc::now();
        self.documents
            .update(
                ASSIGNMENTS,
                record.id.as_str(),
                json!({
                    "sync_source": SyncSystem::Workspace.as_str(),
                    "synced_at": now,
                    "updated_at": now,
                }),
            )
            .await
            .map_err(backend)
    }
}

fn backend(error: rolebridge_core::AppError) -> AdapterError {
    AdapterError::BackendUnavailable(error.to_string())
}

fn parse_assignment(record: &DocumentRecord) -> Result<RoleAssignment, AdapterError> {
    serde_json::from_value(record.data.clone()).map_err(|error| {
        AdapterError::BackendUnavailable(format!("malformed assignment document: {error}"))
    })
}

#[async_trait]
impl TargetAdapter for DirectoryRoleAdapter {
    fn system(&self) -> SyncSystem {
        SyncSystem::Directory
    }

    async fn apply_role_mapping(
        &self,
        tenant_id: TenantId,
        subject_id: &str,
        scope_id: &str,
        mapping: &RoleMapping,
        context: ApplyContext,
    ) -> Result<(), AdapterError> {
        if !self.user_exists(tenant_id, subject_id).await? {
            return Err(AdapterError::SubjectNotFound {
                subject_id: subject_id.to_owned(),
            });
        }
        if !self.group_exists(tenant_id, scope_id).await? {
            return Err(AdapterError::ScopeNotFound {
                scope_id: scope_id.to_owned(),
            });
        }

        self.check_singleton_holder(tenant_id, subject_id, scope_id, mapping.target_role.as_str())
            .await?;

        let existing = self.find_assignment(tenant_id, subject_id, scope_id).await?;
        let current = match existing.as_ref() {
            Some(record) => Some(parse_assignment(record)?),
            None => None,
        };
        let resolution = context.conflict_policy.resolve(
            current.map(|assignment| assignment.hierarchy),
            mapping.hierarchy,
            context.admin_action,
        );

        match resolution {
            ConflictResolution::Hold => {
                tracing::info!(
                    subject_id,
                    scope_id,
                    incoming = mapping.hierarchy,
                    "holding conflicting directory role write for operator review"
                );
                Ok(())
            }
            ConflictResolution::Apply { hierarchy } if hierarchy == mapping.hierarchy => {
                self.write_assignment(
                    tenant_id,
                    subject_id,
                    scope_id,
                    existing.as_ref(),
                    mapping.target_role.as_str(),
                    hierarchy,
                    &mapping.permissions,
                )
                .await
            }
            ConflictResolution::Apply { .. } => match existing.as_ref() {
                // Existing assignment won; record that the sync looked at it.
                Some(record) => self.touch_provenance(record).await,
                None => {
                    self.write_assignment(
                        tenant_id,
                        subject_id,
                        scope_id,
                        None,
                        mapping.target_role.as_str(),
                        mapping.hierarchy,
                        &mapping.permissions,
                    )
                    .await
                }
            },
        }
    }

    async fn remove_role_assignment(
        &self,
        tenant_id: TenantId,
        subject_id: &str,
        scope_id: &str,
        context: ApplyContext,
    ) -> Result<(), AdapterError> {
        let Some(existing) = self.find_assignment(tenant_id, subject_id, scope_id).await? else {
            return Ok(());
        };

        if parse_assignment(&existing)?.role == SINGLETON_ROLE && !context.admin_action {
            // A group must not silently lose its only admin; demote instead.
            let baseline = self.resolver.baseline().map_err(backend)?;
            return self
                .write_assignment(
                    tenant_id,
                    subject_id,
                    scope_id,
                    Some(&existing),
                    baseline.source_role.as_str(),
                    baseline.hierarchy,
                    &baseline.permissions,
                )
                .await;
        }

        self.documents
            .delete(ASSIGNMENTS, existing.id.as_str())
            .await
            .map_err(backend)
    }

    async fn update_hierarchy(
        &self,
        tenant_id: TenantId,
        subject_id: &str,
        scope_id: &str,
        hierarchy: i32,
        context: ApplyContext,
    ) -> Result<(), AdapterError> {
        let Some(existing) = self.find_assignment(tenant_id, subject_id, scope_id).await? else {
            return Err(AdapterError::SubjectNotFound {
                subject_id: subject_id.to_owned(),
            });
        };

        let resolution = context.conflict_policy.resolve(
            Some(parse_assignment(&existing)?.hierarchy),
            hierarchy,
            context.admin_action,
        );
        let effective = match resolution {
            ConflictResolution::Hold => return Ok(()),
            ConflictResolution::Apply { hierarchy } => hierarchy,
        };

        let now = Utc::now();
        self.documents
            .update(
                ASSIGNMENTS,
                existing.id.as_str(),
                json!({
                    "hierarchy": effective,
                    "sync_source": SyncSystem::Workspace.as_str(),
                    "synced_at": now,
                    "updated_at": now,
                }),
            )
            .await
            .map_err(backend)
    }

    async fn update_permissions(
        &self,
        tenant_id: TenantId,
        subject_id: &str,
        scope_id: &str,
        permissions: &BTreeSet<String>,
        _context: ApplyContext,
    ) -> Result<(), AdapterError> {
        let Some(existing) = self.find_assignment(tenant_id, subject_id, scope_id).await? else {
            return Err(AdapterError::SubjectNotFound {
                subject_id: subject_id.to_owned(),
            });
        };

        let now = Utc::now();
        self.documents
            .update(
                ASSIGNMENTS,
                existing.id.as_str(),
                json!({
                    "permissions": permissions,
                    "sync_source": SyncSystem::Workspace.as_str(),
                    "synced_at": now,
                    "updated_at": now,
                }),
            )
            .await
            .map_err(backend)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rolebridge_application::{ApplyContext, DocumentFilter, DocumentStore, TargetAdapter};
    use rolebridge_core::{AdapterError, TenantId};
    use rolebridge_domain::{ConflictPolicy, RoleMappingResolver};
    use serde_json::json;

    use super::DirectoryRoleAdapter;
    use crate::InMemoryDocumentStore;

    fn routine() -> ApplyContext {
        ApplyContext {
            conflict_policy: ConflictPolicy::HierarchyBased,
            admin_action: false,
        }
    }

    fn admin_context() -> ApplyContext {
        ApplyContext {
            conflict_policy: ConflictPolicy::HierarchyBased,
            admin_action: true,
        }
    }

    async fn seed(documents: &InMemoryDocumentStore, tenant_id: TenantId, user_id: &str, group_id: &str) {
        let user = documents
            .create(
                "directory_users",
                json!({"tenant_id": tenant_id.to_string(), "user_id": user_id}),
            )
            .await;
        assert!(user.is_ok());
        let group = documents
            .create(
                "directory_groups",
                json!({"tenant_id": tenant_id.to_string(), "group_id": group_id}),
            )
            .await;
        assert!(group.is_ok());
    }

    async fn assignment_field(
        documents: &InMemoryDocumentStore,
        user_id: &str,
        field: &str,
    ) -> Option<serde_json::Value> {
        let found = documents
            .query(
                "directory_role_assignments",
                &[DocumentFilter::eq("subject_id", json!(user_id))],
                None,
                None,
            )
            .await;
        match found {
            Ok(records) => records
                .first()
                .and_then(|record| record.data.get(field).cloned()),
            Err(error) => panic!("query failed: {error}"),
        }
    }

    fn mapping_for(workspace_role: &str, hierarchy: i32) -> rolebridge_domain::RoleMapping {
        match RoleMappingResolver::new().resolve_from_workspace(workspace_role, hierarchy) {
            Ok(mapping) => mapping,
            Err(error) => panic!("mapping must resolve: {error}"),
        }
    }

    #[tokio::test]
    async fn creates_assignment_with_sync_provenance() {
        let documents = Arc::new(InMemoryDocumentStore::new());
        let adapter = DirectoryRoleAdapter::new(documents.clone());
        let tenant_id = TenantId::new();
        seed(&documents, tenant_id, "u1", "g1").await;

        let applied = adapter
            .apply_role_mapping(tenant_id, "u1", "g1", &mapping_for("maintainer", 80), routine())
            .await;
        assert!(applied.is_ok());

        assert_eq!(
            assignment_field(&documents, "u1", "role").await,
            Some(json!("manager"))
        );
        assert_eq!(
            assignment_field(&documents, "u1", "sync_source").await,
            Some(json!("workspace"))
        );
    }

    #[tokio::test]
    async fn routine_write_never_lowers_hierarchy() {
        let documents = Arc::new(InMemoryDocumentStore::new());
        let adapter = DirectoryRoleAdapter::new(documents.clone());
        let tenant_id = TenantId::new();
        seed(&documents, tenant_id, "u1", "g1").await;

        let high = adapter
            .apply_role_mapping(tenant_id, "u1", "g1", &mapping_for("maintainer", 80), routine())
            .await;
        assert!(high.is_ok());

        let low = adapter
            .apply_role_mapping(tenant_id, "u1", "g1", &mapping_for("guest", 20), routine())
            .await;
        assert!(low.is_ok());

        assert_eq!(
            assignment_field(&documents, "u1", "hierarchy").await,
            Some(json!(80))
        );
        assert_eq!(
            assignment_field(&documents, "u1", "role").await,
            Some(json!("manager"))
        );
    }

    #[tokio::test]
    async fn admin_action_may_demote() {
        let documents = Arc::new(InMemoryDocumentStore::new());
        let adapter = DirectoryRoleAdapter::new(documents.clone());
        let tenant_id = TenantId::new();
        seed(&documents, tenant_id, "u1", "g1").await;

        let high = adapter
            .apply_role_mapping(tenant_id, "u1", "g1", &mapping_for("maintainer", 80), routine())
            .await;
        assert!(high.is_ok());

        let demoted = adapter
            .apply_role_mapping(tenant_id, "u1", "g1", &mapping_for("guest", 20), admin_context())
            .await;
        assert!(demoted.is_ok());

        assert_eq!(
            assignment_field(&documents, "u1", "hierarchy").await,
            Some(json!(20))
        );
    }

    #[tokio::test]
    async fn missing_user_is_a_distinguished_failure() {
        let documents = Arc::new(InMemoryDocumentStore::new());
        let adapter = DirectoryRoleAdapter::new(documents.clone());
        let tenant_id = TenantId::new();

        let applied = adapter
            .apply_role_mapping(tenant_id, "ghost", "g1", &mapping_for("member", 40), routine())
            .await;
        assert!(matches!(
            applied,
            Err(AdapterError::SubjectNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn second_admin_holder_is_rejected() {
        let documents = Arc::new(InMemoryDocumentStore::new());
        let adapter = DirectoryRoleAdapter::new(documents.clone());
        let tenant_id = TenantId::new();
        seed(&documents, tenant_id, "u1", "g1").await;
        seed(&documents, tenant_id, "u2", "g1").await;

        let first = adapter
            .apply_role_mapping(tenant_id, "u1", "g1", &mapping_for("owner", 100), routine())
            .await;
        assert!(first.is_ok());

        let second = adapter
            .apply_role_mapping(tenant_id, "u2", "g1", &mapping_for("owner", 100), routine())
            .await;
        assert!(matches!(
            second,
            Err(AdapterError::ConflictingAdminInvariant { .. })
        ));
    }

    #[tokio::test]
    async fn routine_removal_of_sole_admin_demotes_to_baseline() {
        let documents = Arc::new(InMemoryDocumentStore::new());
        let adapter = DirectoryRoleAdapter::new(documents.clone());
        let tenant_id = TenantId::new();
        seed(&documents, tenant_id, "u1", "g1").await;

        let applied = adapter
            .apply_role_mapping(tenant_id, "u1", "g1", &mapping_for("owner", 100), routine())
            .await;
        assert!(applied.is_ok());

        let removed = adapter
            .remove_role_assignment(tenant_id, "u1", "g1", routine())
            .await;
        assert!(removed.is_ok());

        assert_eq!(
            assignment_field(&documents, "u1", "role").await,
            Some(json!("member"))
        );
        assert_eq!(
            assignment_field(&documents, "u1", "hierarchy").await,
            Some(json!(40))
        );
    }

    #[tokio::test]
    async fn admin_tagged_removal_deletes_the_assignment() {
        let documents = Arc::new(InMemoryDocumentStore::new());
        let adapter = DirectoryRoleAdapter::new(documents.clone());
        let tenant_id = TenantId::new();
        seed(&documents, tenant_id, "u1", "g1").await;

        let applied = adapter
            .apply_role_mapping(tenant_id, "u1", "g1", &mapping_for("owner", 100), routine())
            .await;
        assert!(applied.is_ok());

        let removed = adapter
            .remove_role_assignment(tenant_id, "u1", "g1", admin_context())
            .await;
        assert!(removed.is_ok());

        assert_eq!(assignment_field(&documents, "u1", "role").await, None);
    }
}
