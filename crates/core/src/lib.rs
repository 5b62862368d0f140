//! Shared primitives for all Rust crates in Rolebridge.

#![forbid(unsafe_code)]

/// Actor primitives shared across services.
pub mod actor;

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use actor::SyncActor;

/// Result type used across Rolebridge crates.
pub type AppResult<T> = Result<T, AppError>;

/// A validated non-empty UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NonEmptyString(String);

impl NonEmptyString {
    /// Creates a validated non-empty string.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::Validation(
                "value must not be empty or whitespace".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

/// Tenant identifier used as the partition key for every persisted resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(Uuid);

impl TenantId {
    /// Creates a random tenant identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a tenant identifier from an existing UUID value.
    #[must_use]
    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// Parses a tenant identifier from its string form.
    pub fn parse(value: &str) -> AppResult<Self> {
        let parsed = Uuid::parse_str(value)
            .map_err(|error| AppError::Validation(format!("invalid tenant id '{value}': {error}")))?;
        Ok(Self(parsed))
    }

    /// Returns the underlying UUID value.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for TenantId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Failure modes reported by a target system adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// The subject has no record in the target system.
    #[error("subject '{subject_id}' has no record in the target system")]
    SubjectNotFound {
        /// Subject that was being synchronized.
        subject_id: String,
    },

    /// The scope has no record in the target system.
    #[error("scope '{scope_id}' has no record in the target system")]
    ScopeNotFound {
        /// Scope that was being synchronized.
        scope_id: String,
    },

    /// A scope-level singleton role is already held by another subject.
    #[error("scope '{scope_id}' singleton role '{role}' is already held by '{holder}'")]
    ConflictingAdminInvariant {
        /// Scope owning the singleton role.
        scope_id: String,
        /// The singleton role token.
        role: String,
        /// Subject currently holding the role.
        holder: String,
    },

    /// The target system's backing store could not be reached.
    #[error("target system backend unavailable: {0}")]
    BackendUnavailable(String),
}

/// Common application error categories.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid input or violated invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// Requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Write operation conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Source role absent from the precedence table and any supplied template.
    #[error("unknown source role '{0}'")]
    UnknownRole(String),

    /// Attempted event status transition that is not legal.
    #[error("illegal sync event status transition from '{from}' to '{to}'")]
    IllegalStatusTransition {
        /// Status the event currently holds.
        from: String,
        /// Status the transition attempted to reach.
        to: String,
    },

    /// Durable append failed; the event was never persisted.
    #[error("sync event store write failed: {0}")]
    StoreWrite(String),

    /// Target adapter reported a distinguished failure.
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    /// Processing exceeded the configured per-event timeout.
    #[error("timed out: {0}")]
    Timeout(String),

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}
