use std::collections::BTreeSet;

use super::claims::{parse_role_claims, role_names};
use super::role_key;
use crate::jwt::SessionClaims;

/// Principal represents the authenticated caller as seen by the guards.
#[derive(Debug, Clone, Default)]
pub struct Principal {
    pub subject: Option<String>,
    /// Canonical role names from the session claim, original casing kept.
    pub roles: Vec<String>,
    pub scopes: BTreeSet<String>,
}

impl Principal {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: Some(subject.into()),
            ..Self::default()
        }
    }

    /// `None` unless the session carries an access token.
    pub fn from_session(claims: &SessionClaims) -> Option<Self> {
        if !claims.is_authenticated() {
            return None;
        }

        let roles = role_names(&parse_role_claims(&claims.user_info.roles));
        let principal = Self {
            subject: claims.sub.clone().or_else(|| claims.user_info.username.clone()),
            roles,
            scopes: BTreeSet::new(),
        };
        Some(principal.with_scope_string(claims.scope.as_deref().unwrap_or_default()))
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    /// Replace scopes from a space-delimited OAuth scope string.
    pub fn with_scope_string(mut self, scope: &str) -> Self {
        self.scopes = scope.split_whitespace().map(str::to_string).collect();
        self
    }

    pub fn subject(&self) -> &str {
        self.subject.as_deref().unwrap_or("anonymous")
    }

    /// Lower-cased role names, as used for every role comparison.
    pub fn role_keys(&self) -> BTreeSet<String> {
        self.roles.iter().map(|r| role_key(r)).collect()
    }

    pub fn has_role(&self, role: &str) -> bool {
        let wanted = role_key(role);
        self.roles.iter().any(|r| role_key(r) == wanted)
    }

    pub fn has_any_role<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        let held = self.role_keys();
        roles.iter().any(|r| held.contains(&role_key(r.as_ref())))
    }

    pub fn has_all_roles<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        let held = self.role_keys();
        roles.iter().all(|r| held.contains(&role_key(r.as_ref())))
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    pub fn has_any_scope<S: AsRef<str>>(&self, scopes: &[S]) -> bool {
        scopes.iter().any(|s| self.has_scope(s.as_ref()))
    }

    pub fn has_all_scopes<S: AsRef<str>>(&self, scopes: &[S]) -> bool {
        scopes.iter().all(|s| self.has_scope(s.as_ref()))
    }

    pub fn is_super_admin(&self) -> bool {
        self.has_role(super::roles::SUPER_ADMIN)
    }
}
