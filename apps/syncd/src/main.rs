//! Rolebridge role synchronization daemon.

#![forbid(unsafe_code)]

use std::env;
use std::str::FromStr;
use std::sync::Arc;

use rolebridge_application::{DocumentStore, SyncConfig, SyncService};
use rolebridge_core::{AppError, AppResult};
use rolebridge_domain::ConflictPolicy;
use rolebridge_infrastructure::{
    DirectoryRoleAdapter, PostgresDocumentStore, PostgresSyncEventStore, WorkspaceRoleAdapter,
};

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct SyncdConfig {
    database_url: String,
    enabled: bool,
    conflict_policy: ConflictPolicy,
    batch_size: usize,
    retry_attempts: u32,
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = SyncdConfig::load()?;
    let pool = connect_pool(config.database_url.as_str()).await?;
    let service = build_sync_service(pool, &config).await?;

    info!(
        enabled = config.enabled,
        conflict_policy = config.conflict_policy.as_str(),
        batch_size = config.batch_size,
        retry_attempts = config.retry_attempts,
        timeout_ms = config.timeout_ms,
        "rolebridge-syncd started"
    );

    let processor = service.clone();
    let processor_handle = tokio::spawn(async move { processor.run().await });

    tokio::signal::ctrl_c().await.map_err(|error| {
        AppError::Internal(format!("failed to listen for shutdown signal: {error}"))
    })?;
    info!("shutdown signal received, stopping sync processor");
    processor_handle.abort();

    match processor_handle.await {
        Ok(Err(error)) => warn!(error = %error, "sync processor ended with an error"),
        Err(error) if !error.is_cancelled() => {
            warn!(error = %error, "sync processor task ended abnormally");
        }
        _ => {}
    }

    Ok(())
}

async fn connect_pool(database_url: &str) -> AppResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))
}

async fn build_sync_service(pool: PgPool, config: &SyncdConfig) -> AppResult<SyncService> {
    let documents: Arc<dyn DocumentStore> = Arc::new(PostgresDocumentStore::new(pool.clone()));
    let store = Arc::new(PostgresSyncEventStore::new(pool));
    let directory_adapter = Arc::new(DirectoryRoleAdapter::new(documents.clone()));
    let workspace_adapter = Arc::new(WorkspaceRoleAdapter::new(documents));

    let service = SyncService::new(store, directory_adapter, workspace_adapter);
    service
        .configure(SyncConfig {
            enabled: config.enabled,
            conflict_policy: config.conflict_policy,
            batch_size: config.batch_size,
            retry_attempts: config.retry_attempts,
            timeout_ms: config.timeout_ms,
        })
        .await?;

    Ok(service)
}

impl SyncdConfig {
    fn load() -> AppResult<Self> {
        let database_url = required_env("DATABASE_URL")?;
        let enabled = parse_env_bool("SYNC_ENABLED", true)?;
        let conflict_policy = match env::var("SYNC_CONFLICT_POLICY") {
            Ok(value) => ConflictPolicy::from_str(value.as_str())?,
            Err(_) => ConflictPolicy::default(),
        };
        let batch_size = parse_env_usize("SYNC_BATCH_SIZE", 10)?;
        let retry_attempts = parse_env_u32("SYNC_RETRY_ATTEMPTS", 3)?;
        let timeout_ms = parse_env_u64("SYNC_TIMEOUT_MS", 10_000)?;

        if batch_size == 0 {
            return Err(AppError::Validation(
                "SYNC_BATCH_SIZE must be greater than zero".to_owned(),
            ));
        }

        if timeout_ms == 0 {
            return Err(AppError::Validation(
                "SYNC_TIMEOUT_MS must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            database_url,
            enabled,
            conflict_policy,
            batch_size,
            retry_attempts,
            timeout_ms,
        })
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required_env(name: &str) -> AppResult<String> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

fn parse_env_bool(name: &str, default: bool) -> AppResult<bool> {
    match env::var(name) {
        Ok(value) => value.parse::<bool>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> AppResult<usize> {
    match env::var(name) {
        Ok(value) => value.parse::<usize>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> AppResult<u32> {
    match env::var(name) {
        Ok(value) => value.parse::<u32>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u64(name: &str, default: u64) -> AppResult<u64> {
    match env::var(name) {
        Ok(value) => value.parse::<u64>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}
