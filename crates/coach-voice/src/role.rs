//! Practice roles: the opaque identifier sent with every turn, plus the built-in catalog.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A built-in practice role offered by the role picker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleEntry {
    pub id: &'static str,
    pub label: &'static str,
}

/// Roles the coach knows how to tailor questions for.
pub const ROLE_CATALOG: &[RoleEntry] = &[
    RoleEntry { id: "software-engineer", label: "Software Engineer" },
    RoleEntry { id: "product-manager", label: "Product Manager" },
    RoleEntry { id: "marketing", label: "Marketing" },
    RoleEntry { id: "designer", label: "Designer" },
    RoleEntry { id: "sales", label: "Sales" },
    RoleEntry { id: "healthcare", label: "Healthcare" },
    RoleEntry { id: "education", label: "Education" },
    RoleEntry { id: "general", label: "General" },
];

/// Role identifier chosen before a session starts. Any string is accepted;
/// catalog ids just get a friendlier label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(String);

impl Role {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Catalog entry for this role, if it is a built-in one.
    pub fn entry(&self) -> Option<&'static RoleEntry> {
        ROLE_CATALOG.iter().find(|e| e.id == self.0)
    }

    /// Display label: catalog label, or the id itself for custom roles.
    pub fn label(&self) -> &str {
        self.entry().map(|e| e.label).unwrap_or(&self.0)
    }
}

impl Default for Role {
    fn default() -> Self {
        Self("general".to_string())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Role {
    fn from(id: &str) -> Self {
        Role::new(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_labels() {
        assert_eq!(Role::new("software-engineer").label(), "Software Engineer");
        assert_eq!(Role::new(" sales ").as_str(), "sales");
        assert_eq!(ROLE_CATALOG.len(), 8);
    }

    #[test]
    fn custom_role_labels_itself() {
        let role = Role::new("data-scientist");
        assert!(role.entry().is_none());
        assert_eq!(role.label(), "data-scientist");
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&Role::new("designer")).unwrap();
        assert_eq!(json, "\"designer\"");
    }
}
