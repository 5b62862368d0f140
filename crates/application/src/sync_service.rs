use std::sync::Arc;

use rolebridge_core::{AppError, AppResult};
use rolebridge_domain::{ConflictPolicy, RoleMappingResolver, SyncEvent, SyncSystem};
use tokio::sync::{Mutex, RwLock, mpsc};

use crate::sync_ports::{SyncEventStore, TargetAdapter};

mod processor;
mod submit;

/// Runtime configuration of the sync coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Whether submitted role changes are propagated at all.
    pub enabled: bool,
    /// Policy deciding how conflicting hierarchies settle.
    pub conflict_policy: ConflictPolicy,
    /// Maximum number of events processed concurrently per batch.
    pub batch_size: usize,
    /// Maximum operator resubmissions of one failed change.
    pub retry_attempts: u32,
    /// Per-event processing timeout in milliseconds.
    pub timeout_ms: u64,
}

impl SyncConfig {
    /// Validates field bounds.
    pub fn validate(&self) -> AppResult<()> {
        if self.batch_size == 0 {
            return Err(AppError::Validation(
                "batch_size must be greater than zero".to_owned(),
            ));
        }

        if self.timeout_ms == 0 {
            return Err(AppError::Validation(
                "timeout_ms must be greater than zero".to_owned(),
            ));
        }

        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            conflict_policy: ConflictPolicy::HierarchyBased,
            batch_size: 10,
            retry_attempts: 3,
            timeout_ms: 10_000,
        }
    }
}

/// Observable outcome of submitting a role change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncSubmission {
    /// The event was appended and queued for processing.
    Queued(SyncEvent),
    /// Synchronization is disabled; nothing was appended.
    Skipped,
}

impl SyncSubmission {
    /// Returns whether the submission was skipped.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }
}

/// Coordinator facade over the role synchronization pipeline.
///
/// Constructed once at the composition root with its store and adapters
/// injected; cheap to clone and share.
#[derive(Clone)]
pub struct SyncService {
    store: Arc<dyn SyncEventStore>,
    directory_adapter: Arc<dyn TargetAdapter>,
    workspace_adapter: Arc<dyn TargetAdapter>,
    resolver: RoleMappingResolver,
    config: Arc<RwLock<SyncConfig>>,
    queue_sender: mpsc::UnboundedSender<SyncEvent>,
    queue_receiver: Arc<Mutex<Option<mpsc::UnboundedReceiver<SyncEvent>>>>,
}

impl SyncService {
    /// Creates a sync service with default configuration.
    #[must_use]
    pub fn new(
        store: Arc<dyn SyncEventStore>,
        directory_adapter: Arc<dyn TargetAdapter>,
        workspace_adapter: Arc<dyn TargetAdapter>,
    ) -> Self {
        let (queue_sender, queue_receiver) = mpsc::unbounded_channel();

        Self {
            store,
            directory_adapter,
            workspace_adapter,
            resolver: RoleMappingResolver::new(),
            config: Arc::new(RwLock::new(SyncConfig::default())),
            queue_sender,
            queue_receiver: Arc::new(Mutex::new(Some(queue_receiver))),
        }
    }

    /// Replaces the runtime configuration after validating it.
    pub async fn configure(&self, config: SyncConfig) -> AppResult<()> {
        config.validate()?;
        *self.config.write().await = config;
        Ok(())
    }

    /// Returns a snapshot of the current configuration.
    pub async fn config(&self) -> SyncConfig {
        *self.config.read().await
    }

    fn adapter_for(&self, system: SyncSystem) -> &Arc<dyn TargetAdapter> {
        match system {
            SyncSystem::Directory => &self.directory_adapter,
            SyncSystem::Workspace => &self.workspace_adapter,
        }
    }
}
