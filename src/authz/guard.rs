//! Per-request authorization decisions.
//!
//! Each guard walks the same states:
//! `Unauthenticated -> Authenticated (nothing required) -> Authenticated (check) -> Allowed | Denied`.
//! Every decision point writes an audit event under the `authz::audit` target.

use super::principal::Principal;
use super::service::RolePermissionService;
use super::AuthzMode;

const AUDIT: &str = "authz::audit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardKind {
    Role,
    Permission,
    Scope,
}

impl GuardKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardKind::Role => "role",
            GuardKind::Permission => "permission",
            GuardKind::Scope => "scope",
        }
    }
}

/// How a permission guard combines its required permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Logic {
    And,
    #[default]
    Or,
}

impl Logic {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "and" => Some(Logic::And),
            "or" => Some(Logic::Or),
            _ => None,
        }
    }
}

/// Why a request was refused, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub guard: GuardKind,
    pub required: Vec<String>,
    pub held: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Unauthenticated,
    Forbidden(Denial),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    /// Apply the enforcement mode. Only denials are affected; an unauthenticated
    /// caller is always rejected.
    pub fn enforce(self, mode: AuthzMode, subject: &str, path: &str) -> Decision {
        match (self, mode) {
            (Decision::Forbidden(denial), AuthzMode::Advisory | AuthzMode::Off) => {
                tracing::warn!(
                    target: AUDIT,
                    decision = "advisory_allow",
                    guard = denial.guard.as_str(),
                    subject,
                    path,
                    required = ?denial.required,
                    held = ?denial.held,
                    "denial not enforced"
                );
                Decision::Allowed
            }
            (decision, _) => decision,
        }
    }
}

fn unauthenticated(guard: GuardKind, path: &str) -> Decision {
    tracing::info!(target: AUDIT, decision = "denied", guard = guard.as_str(), path, "unauthenticated request");
    Decision::Unauthenticated
}

fn granted(guard: GuardKind, principal: &Principal, path: &str, required: &[String]) -> Decision {
    tracing::info!(
        target: AUDIT,
        decision = "granted",
        guard = guard.as_str(),
        subject = principal.subject(),
        path,
        required = ?required,
        "access granted"
    );
    Decision::Allowed
}

fn denied(guard: GuardKind, principal: &Principal, path: &str, required: &[String], held: Vec<String>) -> Decision {
    tracing::warn!(
        target: AUDIT,
        decision = "denied",
        guard = guard.as_str(),
        subject = principal.subject(),
        path,
        required = ?required,
        held = ?held,
        "access denied"
    );
    Decision::Forbidden(Denial {
        guard,
        required: required.to_vec(),
        held,
    })
}

/// Allow when any required role is held, compared case-insensitively.
pub fn authorize_roles(principal: Option<&Principal>, required: &[String], path: &str) -> Decision {
    let Some(principal) = principal else {
        return unauthenticated(GuardKind::Role, path);
    };
    if required.is_empty() {
        return granted(GuardKind::Role, principal, path, required);
    }

    tracing::debug!(
        target: AUDIT,
        decision = "checked",
        guard = "role",
        subject = principal.subject(),
        path,
        required = ?required,
        held = ?principal.roles,
        "checking roles"
    );

    if principal.has_any_role(required) {
        granted(GuardKind::Role, principal, path, required)
    } else {
        denied(GuardKind::Role, principal, path, required, principal.roles.clone())
    }
}

/// Resolve the caller's roles to permissions and combine per `logic`.
/// Lookup failures deny.
pub async fn authorize_permissions(
    service: &RolePermissionService,
    principal: Option<&Principal>,
    required: &[String],
    logic: Logic,
    path: &str,
) -> Decision {
    let Some(principal) = principal else {
        return unauthenticated(GuardKind::Permission, path);
    };
    if required.is_empty() {
        return granted(GuardKind::Permission, principal, path, required);
    }

    tracing::debug!(
        target: AUDIT,
        decision = "checked",
        guard = "permission",
        subject = principal.subject(),
        path,
        required = ?required,
        logic = ?logic,
        held = ?principal.roles,
        "checking permissions"
    );

    let allowed = match logic {
        Logic::And => service.has_all_permissions(&principal.roles, required).await,
        Logic::Or => service.has_any_permission(&principal.roles, required).await,
    };

    if allowed {
        granted(GuardKind::Permission, principal, path, required)
    } else {
        denied(GuardKind::Permission, principal, path, required, principal.roles.clone())
    }
}

/// Every required scope must be present in the session scope string.
pub fn authorize_scopes(principal: Option<&Principal>, required: &[String], path: &str) -> Decision {
    let Some(principal) = principal else {
        return unauthenticated(GuardKind::Scope, path);
    };

    if principal.has_all_scopes(required) {
        granted(GuardKind::Scope, principal, path, required)
    } else {
        let held = principal.scopes.iter().cloned().collect();
        denied(GuardKind::Scope, principal, path, required, held)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::authz::store::MemoryStore;
    use crate::authz::{RoleEntry, RoleMap};
    use crate::config::CacheConfig;
    use crate::errors::UpstreamError;
    use crate::identity::IdentityClient;

    struct FixedClient(Option<RoleMap>);

    #[async_trait]
    impl IdentityClient for FixedClient {
        async fn fetch_role_graph(&self) -> Result<RoleMap, UpstreamError> {
            self.0
                .clone()
                .ok_or_else(|| UpstreamError::Transport("connection refused".into()))
        }
    }

    fn service(map: Option<RoleMap>) -> RolePermissionService {
        RolePermissionService::new(
            Arc::new(FixedClient(map)),
            Arc::new(MemoryStore::new()),
            &CacheConfig::default(),
        )
    }

    fn dev_map() -> RoleMap {
        [("dev".to_string(), RoleEntry::with_permissions(["user:read", "user:update"]))]
            .into_iter()
            .collect()
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn role_guard_state_machine() {
        assert_eq!(authorize_roles(None, &strings(&["dev"]), "/x"), Decision::Unauthenticated);

        let principal = Principal::new("u").with_roles(["Sales"]);
        assert!(authorize_roles(Some(&principal), &[], "/x").is_allowed());
        assert!(authorize_roles(Some(&principal), &strings(&["management", "sales"]), "/x").is_allowed());

        let decision = authorize_roles(Some(&principal), &strings(&["management"]), "/x");
        assert_eq!(
            decision,
            Decision::Forbidden(Denial {
                guard: GuardKind::Role,
                required: strings(&["management"]),
                held: strings(&["Sales"]),
            })
        );
    }

    #[tokio::test]
    async fn permission_guard_and_or() {
        let svc = service(Some(dev_map()));
        let principal = Principal::new("u").with_roles(["Dev"]);
        let required = strings(&["user:read", "user:delete"]);

        assert!(authorize_permissions(&svc, Some(&principal), &required, Logic::Or, "/x")
            .await
            .is_allowed());
        assert!(!authorize_permissions(&svc, Some(&principal), &required, Logic::And, "/x")
            .await
            .is_allowed());
        assert_eq!(
            authorize_permissions(&svc, None, &required, Logic::Or, "/x").await,
            Decision::Unauthenticated
        );
    }

    #[tokio::test]
    async fn permission_guard_denies_when_upstream_down() {
        let svc = service(None);
        let principal = Principal::new("u").with_roles(["dev"]);
        let decision = authorize_permissions(&svc, Some(&principal), &strings(&["user:read"]), Logic::Or, "/x").await;
        assert!(matches!(decision, Decision::Forbidden(_)));
    }

    #[test]
    fn scope_guard_requires_all() {
        let principal = Principal::new("u").with_scope_string("openid internal_role_mgt_view");
        assert!(authorize_scopes(Some(&principal), &strings(&["openid"]), "/x").is_allowed());
        assert!(!authorize_scopes(Some(&principal), &strings(&["openid", "email"]), "/x").is_allowed());
        assert_eq!(authorize_scopes(None, &strings(&["openid"]), "/x"), Decision::Unauthenticated);
    }

    #[test]
    fn advisory_mode_lets_denials_through() {
        let denial = Decision::Forbidden(Denial {
            guard: GuardKind::Role,
            required: strings(&["admin"]),
            held: vec![],
        });
        assert!(denial.clone().enforce(AuthzMode::Advisory, "u", "/x").is_allowed());
        assert!(!denial.enforce(AuthzMode::Strict, "u", "/x").is_allowed());
        assert_eq!(
            Decision::Unauthenticated.enforce(AuthzMode::Advisory, "u", "/x"),
            Decision::Unauthenticated
        );
        assert_eq!(Logic::parse("AND"), Some(Logic::And));
        assert_eq!(Logic::default(), Logic::Or);
    }
}
