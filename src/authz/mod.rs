//! Authorization module - role-permission resolution and request guards
//!
//! This module implements the authorization decision engine with support for:
//! - Role claims read from the session (bare names or SCIM-style objects)
//! - A read-through role-permission cache backed by an injected store
//! - Role, permission (and/or) and scope guards
//! - Configurable enforcement modes (off/advisory/strict)

pub mod claims;
pub mod guard;
mod principal;
pub mod role_map;
mod service;
pub mod store;

pub use claims::RoleClaim;
pub use guard::{Decision, Denial, GuardKind, Logic};
pub use principal::Principal;
pub use role_map::{Permission, RoleEntry, RoleMap, RoleMember};
pub use service::RolePermissionService;
pub use store::{MemoryStore, RolePermissionStore, SqliteStore};

/// Authorization enforcement mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthzMode {
    /// Authentication only, no role/permission/scope checks
    Off,
    /// Log denials but allow requests
    Advisory,
    /// Enforce 403 on denied requests
    Strict,
}

impl AuthzMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "off" => Some(AuthzMode::Off),
            "advisory" => Some(AuthzMode::Advisory),
            "strict" => Some(AuthzMode::Strict),
            _ => None,
        }
    }
}

/// How permission strings are compared. Role names are always compared
/// case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionMatch {
    #[default]
    Exact,
    CaseInsensitive,
}

impl PermissionMatch {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "exact" => Some(PermissionMatch::Exact),
            "case_insensitive" | "case-insensitive" => Some(PermissionMatch::CaseInsensitive),
            _ => None,
        }
    }

    pub fn matches(self, granted: &str, wanted: &str) -> bool {
        match self {
            PermissionMatch::Exact => granted == wanted,
            PermissionMatch::CaseInsensitive => granted.to_lowercase() == wanted.to_lowercase(),
        }
    }
}

/// Canonical form used for every role-name comparison.
pub fn role_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Well-known role names
pub mod roles {
    pub const SUPER_ADMIN: &str = "superadmin";
}

/// Well-known permission names
pub mod permissions {
    pub const ROLE_READ: &str = "role:read";
}

/// Well-known OAuth scopes
pub mod scopes {
    pub const ROLE_MGT_VIEW: &str = "internal_role_mgt_view";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modes() {
        assert_eq!(AuthzMode::parse("Strict"), Some(AuthzMode::Strict));
        assert_eq!(AuthzMode::parse("advisory"), Some(AuthzMode::Advisory));
        assert_eq!(AuthzMode::parse("off"), Some(AuthzMode::Off));
        assert_eq!(AuthzMode::parse("lenient"), None);
    }

    #[test]
    fn permission_match_policies() {
        assert!(PermissionMatch::Exact.matches("user:read", "user:read"));
        assert!(!PermissionMatch::Exact.matches("User:Read", "user:read"));
        assert!(PermissionMatch::CaseInsensitive.matches("User:Read", "user:read"));
        assert_eq!(PermissionMatch::parse("case_insensitive"), Some(PermissionMatch::CaseInsensitive));
    }
}
