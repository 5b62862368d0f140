use rolebridge_core::{AppResult, AppError, TenantId};
use rolebridge_domain::{NewSyncEvent, SyncEvent, SyncEventPayload, SyncEventStatus, SyncSystem};
use tracing::info;

use super::{SyncService, SyncSubmission};
use crate::sync_ports::{SyncRoleToDirectoryInput, SyncRoleToWorkspaceInput};

impl SyncService {
    /// Appends a validated event and queues it for processing.
    ///
    /// When synchronization is disabled the call returns `Skipped` without
    /// appending anything, so callers can tell "nothing to sync" apart from
    /// "sync disabled".
    pub async fn submit_event(&self, event: NewSyncEvent) -> AppResult<SyncSubmission> {
        if !self.config().await.enabled {
            info!(
                subject_id = event.subject_id(),
                scope_id = event.scope_id(),
                kind = event.kind().as_str(),
                "synchronization disabled, skipping role change"
            );
            return Ok(SyncSubmission::Skipped);
        }

        let appended = self.store.append(event).await?;
        self.enqueue(appended.clone());

        Ok(SyncSubmission::Queued(appended))
    }

    /// Propagates a directory role change to the workspace.
    ///
    /// Resolver and store errors propagate synchronously; processing errors
    /// after the append are recorded on the event instead.
    pub async fn sync_role_to_workspace(
        &self,
        input: SyncRoleToWorkspaceInput,
    ) -> AppResult<SyncSubmission> {
        let mapping = self.resolver.resolve(
            input.source_role.as_str(),
            input.template.as_ref(),
            input.tier,
        )?;

        let event = NewSyncEvent::new(
            SyncSystem::Directory,
            SyncSystem::Workspace,
            input.tenant_id,
            input.subject_id,
            input.scope_id,
            SyncEventPayload::RoleAssigned {
                mapping,
                actor: input.actor,
                reason: input.reason,
                admin_action: input.admin_action,
                metadata: input.metadata,
            },
        )?;

        self.submit_event(event).await
    }

    /// Propagates a workspace role change back to the directory.
    pub async fn sync_role_to_directory(
        &self,
        input: SyncRoleToDirectoryInput,
    ) -> AppResult<SyncSubmission> {
        let mapping = self
            .resolver
            .resolve_from_workspace(input.workspace_role.as_str(), input.hierarchy)?;

        let event = NewSyncEvent::new(
            SyncSystem::Workspace,
            SyncSystem::Directory,
            input.tenant_id,
            input.subject_id,
            input.scope_id,
            SyncEventPayload::RoleAssigned {
                mapping,
                actor: input.actor,
                reason: input.reason,
                admin_action: input.admin_action,
                metadata: input.metadata,
            },
        )?;

        self.submit_event(event).await
    }

    /// Lists sync events recorded for one subject and scope, newest first.
    pub async fn get_sync_status(
        &self,
        tenant_id: TenantId,
        subject_id: &str,
        scope_id: &str,
    ) -> AppResult<Vec<SyncEvent>> {
        self.store
            .list_for_subject(tenant_id, subject_id, scope_id)
            .await
    }

    /// Re-appends a failed event's payload as a fresh pending event.
    ///
    /// Only failed events may be resubmitted, and one change may be
    /// resubmitted at most `retry_attempts` times.
    pub async fn resubmit(&self, event_id: &str) -> AppResult<SyncSubmission> {
        let event = self
            .store
            .find_event(event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("sync event '{event_id}' does not exist")))?;

        if event.status != SyncEventStatus::Failed {
            return Err(AppError::Conflict(format!(
                "sync event '{event_id}' has status '{}' and cannot be resubmitted",
                event.status.as_str()
            )));
        }

        let history = self
            .store
            .list_for_subject(event.tenant_id, event.subject_id.as_str(), event.scope_id.as_str())
            .await?;
        // Only the failed chain counts against the budget; completed syncs of
        // the same kind are unrelated history.
        let attempts = history
            .iter()
            .filter(|recorded| {
                recorded.kind == event.kind && recorded.status == SyncEventStatus::Failed
            })
            .count();
        let retry_attempts = self.config().await.retry_attempts;

        if attempts > retry_attempts as usize {
            return Err(AppError::Conflict(format!(
                "sync event '{event_id}' exhausted its {retry_attempts} resubmissions"
            )));
        }

        let fresh = NewSyncEvent::new(
            event.source_system,
            event.target_system,
            event.tenant_id,
            event.subject_id,
            event.scope_id,
            event.payload,
        )?;

        self.submit_event(fresh).await
    }
}
