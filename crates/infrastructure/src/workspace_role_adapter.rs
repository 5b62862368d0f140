use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rolebridge_application::{ApplyContext, DocumentFilter, DocumentRecord, DocumentStore, TargetAdapter};
use rolebridge_core::{AdapterError, TenantId};
use rolebridge_domain::{ConflictResolution, RoleAssignment, RoleMapping, RoleMappingResolver, SyncSystem};
use serde_json::json;

const MEMBERS: &str = "workspace_members";
const PROJECTS: &str = "workspace_projects";
const ASSIGNMENTS: &str = "workspace_role_assignments";

/// Workspace role token that must have at most one holder per project.
const SINGLETON_ROLE: &str = "owner";

/// Applies synchronized role writes to the workspace side.
///
/// Mirrors the directory adapter over the workspace's collections: members,
/// projects, and one assignment document per member and project. Writes stamp
/// `sync_source`/`synced_at` so workspace-side change listeners do not echo a
/// synchronized change back to the directory.
pub struct WorkspaceRoleAdapter {
    documents: Arc<dyn DocumentStore>,
    resolver: RoleMappingResolver,
}

impl WorkspaceRoleAdapter {
    /// Creates an adapter over the given document store.
    #[must_use]
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self {
            documents,
            resolver: RoleMappingResolver::new(),
        }
    }

    async fn member_exists(
        &self,
        tenant_id: TenantId,
        member_id: &str,
    ) -> Result<bool, AdapterError> {
        let found = self
            .documents
            .query(
                MEMBERS,
                &[
                    DocumentFilter::eq("tenant_id", json!(tenant_id.to_string())),
                    DocumentFilter::eq("member_id", json!(member_id)),
                ],
                None,
                Some(1),
            )
            .await
            .map_err(backend)?;
        Ok(!found.is_empty())
    }

    async fn project_exists(
        &self,
        tenant_id: TenantId,
        project_id: &str,
    ) -> Result<bool, AdapterError> {
        let found = self
            .documents
            .query(
                PROJECTS,
                &[
                    DocumentFilter::eq("tenant_id", json!(tenant_id.to_string())),
                    DocumentFilter::eq("project_id", json!(project_id)),
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
        member_id: &str,
        project_id: &str,
    ) -> Result<Option<DocumentRecord>, AdapterError> {
        let mut found = self
            .documents
            .query(
                ASSIGNMENTS,
                &[
                    DocumentFilter::eq("tenant_id", json!(tenant_id.to_string())),
                    DocumentFilter::eq("subject_id", json!(member_id)),
                    DocumentFilter::eq("scope_id", json!(project_id)),
                ],
                None,
                Some(1),
            )
            .await
            .map_err(backend)?;
        Ok(found.pop())
    }

    /// Rejects a write that would give a project a second `owner`.
    async fn check_singleton_holder(
        &self,
        tenant_id: TenantId,
        member_id: &str,
        project_id: &str,
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
                    DocumentFilter::eq("scope_id", json!(project_id)),
                    DocumentFilter::eq("role", json!(SINGLETON_ROLE)),
                ],
                None,
                None,
            )
            .await
            .map_err(backend)?;

        for holder in &holders {
            let holder = parse_assignment(holder)?;
            if holder.subject_id != member_id {
                return Err(AdapterError::ConflictingAdminInvariant {
                    scope_id: project_id.to_owned(),
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
        member_id: &str,
        project_id: &str,
        existing: Option<&DocumentRecord>,
        role: &str,
        hierarchy: i32,
        permissions: &BTreeSet<String>,
    ) -> Result<(), AdapterError> {
        let now = Utc::now();
        let assignment = RoleAssignment {
            subject_id: member_id.to_owned(),
            scope_id: project_id.to_owned(),
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

    async fn touch_provenance(&self, record: &DocumentRecord) -> Result<(), AdapterError> {
        let now = Utc::now();
        self.documents
            .update(
                ASSIGNMENTS,
                record.id.as_str(),
                json!({
                    "sync_source": SyncSystem::Directory.as_str(),
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
impl TargetAdapter for WorkspaceRoleAdapter {
    fn system(&self) -> SyncSystem {
        SyncSystem::Workspace
    }

    async fn apply_role_mapping(
        &self,
        tenant_id: TenantId,
        subject_id: &str,
        scope_id: &str,
        mapping: &RoleMapping,
        context: ApplyContext,
    ) -> Result<(), AdapterError> {
        if !self.member_exists(tenant_id, subject_id).await? {
            return Err(AdapterError::SubjectNotFound {
                subject_id: subject_id.to_owned(),
            });
        }
        if !self.project_exists(tenant_id, scope_id).await? {
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
                    "holding conflicting workspace role write for operator review"
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
            // A project must not silently lose its only owner; demote instead.
            let baseline = self.resolver.baseline().map_err(backend)?;
            return self
                .write_assignment(
                    tenant_id,
                    subject_id,
                    scope_id,
                    Some(&existing),
                    baseline.target_role.as_str(),
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
                    "sync_source": SyncSystem::Directory.as_str(),
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
                    "sync_source": SyncSystem::Directory.as_str(),
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
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use rolebridge_application::{ApplyContext, DocumentFilter, DocumentStore, TargetAdapter};
    use rolebridge_core::{AdapterError, TenantId};
    use rolebridge_domain::{ConflictPolicy, RoleMappingResolver};
    use serde_json::json;

    use super::WorkspaceRoleAdapter;
    use crate::InMemoryDocumentStore;

    fn routine() -> ApplyContext {
        ApplyContext {
            conflict_policy: ConflictPolicy::HierarchyBased,
            admin_action: false,
        }
    }

    fn manual() -> ApplyContext {
        ApplyContext {
            conflict_policy: ConflictPolicy::Manual,
            admin_action: false,
        }
    }

    fn admin_context() -> ApplyContext {
        ApplyContext {
            conflict_policy: ConflictPolicy::HierarchyBased,
            admin_action: true,
        }
    }

    async fn seed(
        documents: &InMemoryDocumentStore,
        tenant_id: TenantId,
        member_id: &str,
        project_id: &str,
    ) {
        let member = documents
            .create(
                "workspace_members",
                json!({"tenant_id": tenant_id.to_string(), "member_id": member_id}),
            )
            .await;
        assert!(member.is_ok());
        let project = documents
            .create(
                "workspace_projects",
                json!({"tenant_id": tenant_id.to_string(), "project_id": project_id}),
            )
            .await;
        assert!(project.is_ok());
    }

    async fn assignment_field(
        documents: &InMemoryDocumentStore,
        member_id: &str,
        field: &str,
    ) -> Option<serde_json::Value> {
        let found = documents
            .query(
                "workspace_role_assignments",
                &[DocumentFilter::eq("subject_id", json!(member_id))],
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

    fn mapping_for(directory_role: &str) -> rolebridge_domain::RoleMapping {
        match RoleMappingResolver::new().resolve(directory_role, None, None) {
            Ok(mapping) => mapping,
            Err(error) => panic!("mapping must resolve: {error}"),
        }
    }

    #[tokio::test]
    async fn admin_maps_to_owner_with_directory_provenance() {
        let documents = Arc::new(InMemoryDocumentStore::new());
        let adapter = WorkspaceRoleAdapter::new(documents.clone());
        let tenant_id = TenantId::new();
        seed(&documents, tenant_id, "u1", "p1").await;

        let applied = adapter
            .apply_role_mapping(tenant_id, "u1", "p1", &mapping_for("admin"), routine())
            .await;
        assert!(applied.is_ok());

        assert_eq!(
            assignment_field(&documents, "u1", "role").await,
            Some(json!("owner"))
        );
        assert_eq!(
            assignment_field(&documents, "u1", "hierarchy").await,
            Some(json!(100))
        );
        assert_eq!(
            assignment_field(&documents, "u1", "sync_source").await,
            Some(json!("directory"))
        );
    }

    #[tokio::test]
    async fn reissuing_the_same_mapping_is_idempotent() {
        let documents = Arc::new(InMemoryDocumentStore::new());
        let adapter = WorkspaceRoleAdapter::new(documents.clone());
        let tenant_id = TenantId::new();
        seed(&documents, tenant_id, "u1", "p1").await;

        for _ in 0..2 {
            let applied = adapter
                .apply_role_mapping(tenant_id, "u1", "p1", &mapping_for("editor"), routine())
                .await;
            assert!(applied.is_ok());
        }

        let assignments = documents
            .query(
                "workspace_role_assignments",
                &[DocumentFilter::eq("subject_id", json!("u1"))],
                None,
                None,
            )
            .await;
        assert_eq!(assignments.map(|records| records.len()).ok(), Some(1));
        assert_eq!(
            assignment_field(&documents, "u1", "role").await,
            Some(json!("contributor"))
        );
    }

    #[tokio::test]
    async fn manual_policy_holds_disagreeing_writes() {
        let documents = Arc::new(InMemoryDocumentStore::new());
        let adapter = WorkspaceRoleAdapter::new(documents.clone());
        let tenant_id = TenantId::new();
        seed(&documents, tenant_id, "u1", "p1").await;

        let applied = adapter
            .apply_role_mapping(tenant_id, "u1", "p1", &mapping_for("manager"), manual())
            .await;
        assert!(applied.is_ok());

        let held = adapter
            .apply_role_mapping(tenant_id, "u1", "p1", &mapping_for("viewer"), manual())
            .await;
        assert!(held.is_ok());

        assert_eq!(
            assignment_field(&documents, "u1", "role").await,
            Some(json!("maintainer"))
        );
        assert_eq!(
            assignment_field(&documents, "u1", "hierarchy").await,
            Some(json!(80))
        );
    }

    #[tokio::test]
    async fn missing_project_is_a_distinguished_failure() {
        let documents = Arc::new(InMemoryDocumentStore::new());
        let adapter = WorkspaceRoleAdapter::new(documents.clone());
        let tenant_id = TenantId::new();

        let member = documents
            .create(
                "workspace_members",
                json!({"tenant_id": tenant_id.to_string(), "member_id": "u1"}),
            )
            .await;
        assert!(member.is_ok());

        let applied = adapter
            .apply_role_mapping(tenant_id, "u1", "ghost", &mapping_for("member"), routine())
            .await;
        assert!(matches!(applied, Err(AdapterError::ScopeNotFound { .. })));
    }

    #[tokio::test]
    async fn routine_removal_of_sole_owner_demotes_to_baseline() {
        let documents = Arc::new(InMemoryDocumentStore::new());
        let adapter = WorkspaceRoleAdapter::new(documents.clone());
        let tenant_id = TenantId::new();
        seed(&documents, tenant_id, "u1", "p1").await;

        let applied = adapter
            .apply_role_mapping(tenant_id, "u1", "p1", &mapping_for("admin"), routine())
            .await;
        assert!(applied.is_ok());

        let removed = adapter
            .remove_role_assignment(tenant_id, "u1", "p1", routine())
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
    async fn removing_a_missing_assignment_is_a_noop() {
        let documents = Arc::new(InMemoryDocumentStore::new());
        let adapter = WorkspaceRoleAdapter::new(documents.clone());

        let removed = adapter
            .remove_role_assignment(TenantId::new(), "u1", "p1", routine())
            .await;
        assert!(removed.is_ok());
    }

    #[tokio::test]
    async fn update_permissions_replaces_the_set() {
        let documents = Arc::new(InMemoryDocumentStore::new());
        let adapter = WorkspaceRoleAdapter::new(documents.clone());
        let tenant_id = TenantId::new();
        seed(&documents, tenant_id, "u1", "p1").await;

        let applied = adapter
            .apply_role_mapping(tenant_id, "u1", "p1", &mapping_for("viewer"), routine())
            .await;
        assert!(applied.is_ok());

        let permissions: BTreeSet<String> =
            ["content.read".to_owned(), "reports.read".to_owned()].into();
        let updated = adapter
            .update_permissions(tenant_id, "u1", "p1", &permissions, routine())
            .await;
        assert!(updated.is_ok());

        assert_eq!(
            assignment_field(&documents, "u1", "permissions").await,
            Some(json!(["content.read", "reports.read"]))
        );
    }

    #[tokio::test]
    async fn update_hierarchy_ratchets_and_admin_demotes() {
        let documents = Arc::new(InMemoryDocumentStore::new());
        let adapter = WorkspaceRoleAdapter::new(documents.clone());
        let tenant_id = TenantId::new();
        seed(&documents, tenant_id, "u1", "p1").await;

        let applied = adapter
            .apply_role_mapping(tenant_id, "u1", "p1", &mapping_for("manager"), routine())
            .await;
        assert!(applied.is_ok());

        let lowered = adapter
            .update_hierarchy(tenant_id, "u1", "p1", 20, routine())
            .await;
        assert!(lowered.is_ok());
        assert_eq!(
            assignment_field(&documents, "u1", "hierarchy").await,
            Some(json!(80))
        );

        let demoted = adapter
            .update_hierarchy(tenant_id, "u1", "p1", 20, admin_context())
            .await;
        assert!(demoted.is_ok());
        assert_eq!(
            assignment_field(&documents, "u1", "hierarchy").await,
            Some(json!(20))
        );
    }
}
