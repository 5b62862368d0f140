use std::collections::BTreeSet;

use rolebridge_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Fixed precedence table for known directory roles.
///
/// Each row is `(directory role, workspace role, hierarchy, base permissions)`.
const ROLE_TABLE: &[(&str, &str, i32, &[&str])] = &[
    (
        "admin",
        "owner",
        100,
        &[
            "scope.manage",
            "members.manage",
            "content.write",
            "content.read",
        ],
    ),
    (
        "manager",
        "maintainer",
        80,
        &["members.manage", "content.write", "content.read"],
    ),
    ("editor", "contributor", 60, &["content.write", "content.read"]),
    ("member", "member", 40, &["content.comment", "content.read"]),
    ("viewer", "guest", 20, &["content.read"]),
];

/// Directory role every demotion falls back to.
pub(crate) const BASELINE_ROLE: &str = "member";

/// Resolved, target-system-shaped representation of a source role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMapping {
    /// Role token in the source system's vocabulary.
    pub source_role: String,
    /// Equivalent role token in the target system's vocabulary.
    pub target_role: String,
    /// Effective hierarchy; higher wins in conflicts.
    pub hierarchy: i32,
    /// Idempotent union of base and template permissions.
    pub permissions: BTreeSet<String>,
    /// Name of the template that produced the mapping, when one was supplied.
    pub template: Option<String>,
    /// Tier the mapping was resolved under, recorded as provenance.
    pub tier: Option<u32>,
}

/// Role template overriding the fixed precedence table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleTemplate {
    name: String,
    hierarchy: i32,
    permissions: BTreeSet<String>,
    target_role: Option<String>,
}

impl RoleTemplate {
    /// Creates a validated role template.
    pub fn new(
        name: impl Into<String>,
        hierarchy: i32,
        permissions: BTreeSet<String>,
        target_role: Option<String>,
    ) -> AppResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(AppError::Validation(
                "template name must not be empty".to_owned(),
            ));
        }

        if hierarchy <= 0 {
            return Err(AppError::Validation(
                "template hierarchy must be greater than zero".to_owned(),
            ));
        }

        if let Some(role) = &target_role
            && role.trim().is_empty()
        {
            return Err(AppError::Validation(
                "template target_role must not be empty when provided".to_owned(),
            ));
        }

        Ok(Self {
            name,
            hierarchy,
            permissions,
            target_role,
        })
    }

    /// Returns the template name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the hierarchy the template grants.
    #[must_use]
    pub fn hierarchy(&self) -> i32 {
        self.hierarchy
    }

    /// Returns the permissions the template grants.
    #[must_use]
    pub fn permissions(&self) -> &BTreeSet<String> {
        &self.permissions
    }

    /// Returns the target role the template defines, when it defines one.
    #[must_use]
    pub fn target_role(&self) -> Option<&str> {
        self.target_role.as_deref()
    }
}

/// Pure resolver from directory role tokens to workspace role mappings.
///
/// Deterministic, no I/O. An unknown role is rejected rather than defaulted,
/// since a wrong default could grant excess privilege.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleMappingResolver;

impl RoleMappingResolver {
    /// Creates a resolver over the fixed precedence table.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Resolves a directory role into its workspace mapping.
    ///
    /// A supplied template's hierarchy overrides the table, and its
    /// permissions are unioned with the base role's. A role absent from both
    /// the table and the template is rejected.
    pub fn resolve(
        &self,
        source_role: &str,
        template: Option<&RoleTemplate>,
        tier: Option<u32>,
    ) -> AppResult<RoleMapping> {
        let table_row = ROLE_TABLE.iter().find(|(role, _, _, _)| *role == source_role);

        let (target_role, hierarchy, mut permissions) = match (table_row, template) {
            (Some((_, target, base_hierarchy, base_permissions)), template) => {
                let target = template
                    .and_then(RoleTemplate::target_role)
                    .unwrap_or(target)
                    .to_owned();
                let hierarchy = template.map_or(*base_hierarchy, RoleTemplate::hierarchy);
                let permissions: BTreeSet<String> =
                    base_permissions.iter().map(|value| (*value).to_owned()).collect();
                (target, hierarchy, permissions)
            }
            (None, Some(template)) => {
                let Some(target) = template.target_role() else {
                    return Err(AppError::UnknownRole(source_role.to_owned()));
                };
                (target.to_owned(), template.hierarchy(), BTreeSet::new())
            }
            (None, None) => return Err(AppError::UnknownRole(source_role.to_owned())),
        };

        if let Some(template) = template {
            permissions.extend(template.permissions().iter().cloned());
        }

        Ok(RoleMapping {
            source_role: source_role.to_owned(),
            target_role,
            hierarchy,
            permissions,
            template: template.map(|value| value.name().to_owned()),
            tier,
        })
    }

    /// Resolves a workspace role back into its directory mapping.
    ///
    /// The hierarchy is caller-supplied because the workspace side reports
    /// its effective hierarchy alongside the role token.
    pub fn resolve_from_workspace(
        &self,
        workspace_role: &str,
        hierarchy: i32,
    ) -> AppResult<RoleMapping> {
        if hierarchy <= 0 {
            return Err(AppError::Validation(
                "hierarchy must be greater than zero".to_owned(),
            ));
        }

        let Some((directory_role, _, _, base_permissions)) = ROLE_TABLE
            .iter()
            .find(|(_, target, _, _)| *target == workspace_role)
        else {
            return Err(AppError::UnknownRole(workspace_role.to_owned()));
        };

        Ok(RoleMapping {
            source_role: workspace_role.to_owned(),
            target_role: (*directory_role).to_owned(),
            hierarchy,
            permissions: base_permissions.iter().map(|value| (*value).to_owned()).collect(),
            template: None,
            tier: None,
        })
    }

    /// Returns the table hierarchy for a directory role, if known.
    #[must_use]
    pub fn table_hierarchy(&self, source_role: &str) -> Option<i32> {
        ROLE_TABLE
            .iter()
            .find(|(role, _, _, _)| *role == source_role)
            .map(|(_, _, hierarchy, _)| *hierarchy)
    }

    /// Returns the baseline role a routine demotion falls back to.
    #[must_use]
    pub fn baseline(&self) -> AppResult<RoleMapping> {
        self.resolve(BASELINE_ROLE, None, None)
    }
}
