use std::str::FromStr;

use rolebridge_core::AppError;
use serde::{Deserialize, Serialize};

/// Policy deciding how concurrent role changes for one subject/scope settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// The incoming event always wins.
    SourceWins,
    /// An existing assignment on the target always wins.
    TargetWins,
    /// Conflicting writes are held for an operator decision.
    Manual,
    /// Hierarchy only ratchets up; demotion requires an admin-tagged event.
    HierarchyBased,
}

/// Decision produced by resolving a hierarchy conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Write the assignment with this effective hierarchy.
    Apply {
        /// Hierarchy to persist.
        hierarchy: i32,
    },
    /// Leave the target untouched pending an operator decision.
    Hold,
}

impl ConflictPolicy {
    /// Returns a stable storage value for this policy.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SourceWins => "source_wins",
            Self::TargetWins => "target_wins",
            Self::Manual => "manual",
            Self::HierarchyBased => "hierarchy_based",
        }
    }

    /// Resolves an incoming hierarchy against the one stored on the target.
    ///
    /// Under `HierarchyBased` the stored hierarchy only ratchets up for
    /// routine events; an explicit administrator action may demote. The
    /// arithmetic is commutative for routine events, so the final state is
    /// the same regardless of arrival order.
    #[must_use]
    pub fn resolve(
        self,
        existing: Option<i32>,
        incoming: i32,
        admin_action: bool,
    ) -> ConflictResolution {
        if admin_action {
            return ConflictResolution::Apply {
                hierarchy: incoming,
            };
        }

        match self {
            Self::SourceWins => ConflictResolution::Apply {
                hierarchy: incoming,
            },
            Self::TargetWins => ConflictResolution::Apply {
                hierarchy: existing.unwrap_or(incoming),
            },
            Self::Manual => match existing {
                Some(existing) if existing != incoming => ConflictResolution::Hold,
                _ => ConflictResolution::Apply {
                    hierarchy: incoming,
                },
            },
            Self::HierarchyBased => ConflictResolution::Apply {
                hierarchy: existing.map_or(incoming, |existing| existing.max(incoming)),
            },
        }
    }
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        Self::HierarchyBased
    }
}

impl FromStr for ConflictPolicy {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "source_wins" => Ok(Self::SourceWins),
            "target_wins" => Ok(Self::TargetWins),
            "manual" => Ok(Self::Manual),
            "hierarchy_based" => Ok(Self::HierarchyBased),
            _ => Err(AppError::Validation(format!(
                "unknown conflict policy value '{value}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConflictPolicy, ConflictResolution};

    #[test]
    fn hierarchy_based_never_demotes_on_routine_events() {
        let resolution = ConflictPolicy::HierarchyBased.resolve(Some(5), 3, false);
        assert_eq!(resolution, ConflictResolution::Apply { hierarchy: 5 });
    }

    #[test]
    fn hierarchy_based_raises_to_incoming() {
        let resolution = ConflictPolicy::HierarchyBased.resolve(Some(5), 7, false);
        assert_eq!(resolution, ConflictResolution::Apply { hierarchy: 7 });
    }

    #[test]
    fn hierarchy_based_is_commutative_for_routine_events() {
        let policy = ConflictPolicy::HierarchyBased;

        let low_then_high = match policy.resolve(Some(20), 80, false) {
            ConflictResolution::Apply { hierarchy } => hierarchy,
            ConflictResolution::Hold => panic!("hierarchy_based never holds"),
        };
        let high_then_low = match policy.resolve(Some(80), 20, false) {
            ConflictResolution::Apply { hierarchy } => hierarchy,
            ConflictResolution::Hold => panic!("hierarchy_based never holds"),
        };

        assert_eq!(low_then_high, 80);
        assert_eq!(high_then_low, 80);
    }

    #[test]
    fn admin_action_may_demote() {
        let resolution = ConflictPolicy::HierarchyBased.resolve(Some(100), 40, true);
        assert_eq!(resolution, ConflictResolution::Apply { hierarchy: 40 });
    }

    #[test]
    fn manual_policy_holds_on_disagreement() {
        let resolution = ConflictPolicy::Manual.resolve(Some(60), 40, false);
        assert_eq!(resolution, ConflictResolution::Hold);
    }

    #[test]
    fn target_wins_keeps_existing() {
        let resolution = ConflictPolicy::TargetWins.resolve(Some(60), 90, false);
        assert_eq!(resolution, ConflictResolution::Apply { hierarchy: 60 });
    }
}
