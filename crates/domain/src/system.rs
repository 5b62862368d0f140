use std::fmt::{Display, Formatter};
use std::str::FromStr;

use rolebridge_core::AppError;
use serde::{Deserialize, Serialize};

/// One of the two sibling applications kept in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncSystem {
    /// The administrative console's user directory.
    Directory,
    /// The sibling collaboration application.
    Workspace,
}

impl SyncSystem {
    /// Returns a stable storage value for this system.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Directory => "directory",
            Self::Workspace => "workspace",
        }
    }

    /// Returns the opposite side of a sync pair.
    #[must_use]
    pub fn counterpart(&self) -> Self {
        match self {
            Self::Directory => Self::Workspace,
            Self::Workspace => Self::Directory,
        }
    }
}

impl Display for SyncSystem {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.as_str())
    }
}

impl FromStr for SyncSystem {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "directory" => Ok(Self::Directory),
            "workspace" => Ok(Self::Workspace),
            _ => Err(AppError::Validation(format!(
                "unknown sync system value '{value}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::SyncSystem;

    #[test]
    fn system_roundtrip_storage_value() {
        let restored = SyncSystem::from_str(SyncSystem::Workspace.as_str());
        assert!(restored.is_ok());
        assert_eq!(restored.unwrap_or(SyncSystem::Directory), SyncSystem::Workspace);
    }

    #[test]
    fn counterpart_is_involutive() {
        assert_eq!(
            SyncSystem::Directory.counterpart().counterpart(),
            SyncSystem::Directory
        );
    }
}
