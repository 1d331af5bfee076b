use std::collections::BTreeSet;
use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::app::AppState;
use crate::authz::{Principal, RolePermissionService};
use crate::errors::AppError;

/// Permission checks for handler code.
///
/// Extracting `Access` requires an authenticated session; all permission
/// queries fail closed.
#[derive(Clone)]
pub struct Access {
    pub principal: Principal,
    service: Arc<RolePermissionService>,
}

impl Access {
    pub fn new(principal: Principal, service: Arc<RolePermissionService>) -> Self {
        Self { principal, service }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.principal.has_role(role)
    }

    pub fn has_any_role<S: AsRef<str>>(&self, roles: &[S]) -> bool {
        self.principal.has_any_role(roles)
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.principal.has_scope(scope)
    }

    pub async fn has_permission(&self, permission: &str) -> bool {
        self.service.has_permission(&self.principal.roles, permission).await
    }

    pub async fn has_any_permission<P: AsRef<str> + Sync>(&self, permissions: &[P]) -> bool {
        self.service.has_any_permission(&self.principal.roles, permissions).await
    }

    pub async fn has_all_permissions<P: AsRef<str> + Sync>(&self, permissions: &[P]) -> bool {
        self.service.has_all_permissions(&self.principal.roles, permissions).await
    }

    pub async fn user_permissions(&self) -> BTreeSet<String> {
        self.service.user_permissions(&self.principal.roles).await
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Access {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let principal = match parts.extensions.get::<Principal>() {
            Some(principal) => principal.clone(),
            None => state
                .session(&parts.headers)
                .as_ref()
                .and_then(Principal::from_session)
                .ok_or_else(|| AppError::unauthenticated("session missing or expired"))?,
        };

        Ok(Access::new(principal, Arc::clone(&state.permissions)))
    }
}
