use std::time::Duration;

use rolebridge_core::{AppError, AppResult};
use rolebridge_domain::{SyncEvent, SyncEventPayload, SyncEventStatus};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::SyncService;
use crate::sync_ports::ApplyContext;

impl SyncService {
    /// Places an event into the in-memory pending queue.
    pub(crate) fn enqueue(&self, event: SyncEvent) {
        if self.queue_sender.send(event).is_err() {
            warn!("sync event queue receiver dropped, event will be picked up by another instance");
        }
    }

    /// Runs the drain loop until the service is dropped.
    ///
    /// Events arrive from local appends and from the store subscription (so
    /// appends made by other running instances are picked up too). The loop
    /// pulls up to `batch_size` events, processes the batch concurrently,
    /// and waits for the whole batch before the next pull.
    pub async fn run(&self) -> AppResult<()> {
        let mut receiver = self
            .queue_receiver
            .lock()
            .await
            .take()
            .ok_or_else(|| AppError::Internal("sync processor is already running".to_owned()))?;

        let subscription = self.store.subscribe().await?;
        let forward_sender = self.queue_sender.clone();
        let forwarder = tokio::spawn(async move {
            let mut subscription = subscription;
            while let Some(event) = subscription.next().await {
                if forward_sender.send(event).is_err() {
                    break;
                }
            }
        });

        loop {
            let Some(first) = receiver.recv().await else {
                break;
            };

            let batch_size = self.config().await.batch_size;
            let mut batch = vec![first];
            while batch.len() < batch_size {
                match receiver.try_recv() {
                    Ok(event) => batch.push(event),
                    Err(_) => break,
                }
            }

            self.process_batch(batch).await;
        }

        forwarder.abort();
        Ok(())
    }

    /// Processes one batch concurrently, capped at the batch size.
    pub(crate) async fn process_batch(&self, events: Vec<SyncEvent>) {
        let mut tasks = JoinSet::new();
        for event in events {
            let service = self.clone();
            tasks.spawn(async move { service.process_event(event).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(processing_error)) => {
                    // Store-level failures such as an illegal transition are
                    // programming errors, not event failures.
                    error!(error = %processing_error, "sync event processing aborted");
                }
                Err(join_error) => {
                    error!(error = %join_error, "sync event task panicked");
                }
            }
        }
    }

    /// Processes one event end to end.
    ///
    /// The claim step makes duplicate delivery harmless: a second delivery
    /// finds the event no longer pending and skips it. Adapter failures mark
    /// the event failed and are never retried here; resubmission is an
    /// explicit operator action.
    pub(crate) async fn process_event(&self, event: SyncEvent) -> AppResult<()> {
        let Some(event) = self.store.claim(event.id.as_str()).await? else {
            debug!(event_id = event.id.as_str(), "sync event already claimed, skipping");
            return Ok(());
        };

        let config = self.config().await;
        let context = ApplyContext {
            conflict_policy: config.conflict_policy,
            admin_action: event.payload.admin_action(),
        };
        let adapter = self.adapter_for(event.target_system);

        let apply = async {
            match &event.payload {
                SyncEventPayload::RoleAssigned { mapping, .. }
                | SyncEventPayload::RoleUpdated { mapping, .. } => {
                    adapter
                        .apply_role_mapping(
                            event.tenant_id,
                            event.subject_id.as_str(),
                            event.scope_id.as_str(),
                            mapping,
                            context,
                        )
                        .await
                }
                SyncEventPayload::RoleRemoved { .. } => {
                    adapter
                        .remove_role_assignment(
                            event.tenant_id,
                            event.subject_id.as_str(),
                            event.scope_id.as_str(),
                            context,
                        )
                        .await
                }
                SyncEventPayload::HierarchyChanged { hierarchy, .. } => {
                    adapter
                        .update_hierarchy(
                            event.tenant_id,
                            event.subject_id.as_str(),
                            event.scope_id.as_str(),
                            *hierarchy,
                            context,
                        )
                        .await
                }
                SyncEventPayload::PermissionsUpdated { permissions, .. } => {
                    adapter
                        .update_permissions(
                            event.tenant_id,
                            event.subject_id.as_str(),
                            event.scope_id.as_str(),
                            permissions,
                            context,
                        )
                        .await
                }
            }
        };

        let outcome = match tokio::time::timeout(Duration::from_millis(config.timeout_ms), apply)
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(adapter_error)) => Err(adapter_error.to_string()),
            Err(_) => Err(format!(
                "processing timed out after {}ms",
                config.timeout_ms
            )),
        };

        match outcome {
            Ok(()) => {
                self.store
                    .update_status(event.id.as_str(), SyncEventStatus::Completed, None)
                    .await?;
                info!(
                    event_id = event.id.as_str(),
                    kind = event.kind.as_str(),
                    target_system = event.target_system.as_str(),
                    "sync event applied"
                );
            }
            Err(message) => {
                self.store
                    .update_status(event.id.as_str(), SyncEventStatus::Failed, Some(message.clone()))
                    .await?;
                warn!(
                    event_id = event.id.as_str(),
                    kind = event.kind.as_str(),
                    target_system = event.target_system.as_str(),
                    error = message.as_str(),
                    "sync event failed"
                );
            }
        }

        Ok(())
    }
}
