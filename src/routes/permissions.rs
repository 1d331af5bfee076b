//! Permission and role-cache endpoints.
//!
//! Guards are attached in `app::create_app`; handlers here assume the caller
//! already passed them.

use std::collections::{BTreeMap, BTreeSet};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::access::Access;
use crate::app::AppState;
use crate::authz::RoleEntry;
use crate::errors::AppResult;

#[derive(Debug, Serialize, ToSchema)]
pub struct MyPermissionsResponse {
    pub subject: String,
    pub roles: Vec<String>,
    #[schema(value_type = Vec<String>)]
    pub scopes: BTreeSet<String>,
    #[schema(value_type = Vec<String>)]
    pub permissions: BTreeSet<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RoleListResponse {
    pub roles: BTreeMap<String, RoleEntry>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GrantingRolesResponse {
    pub permission: String,
    pub roles: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefreshResponse {
    pub roles: usize,
    pub permissions: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ScopesResponse {
    #[schema(value_type = Vec<String>)]
    pub scopes: BTreeSet<String>,
}

/// Roles, scopes and effective permissions of the current session
#[utoipa::path(
    get,
    path = "/api/me/permissions",
    tag = "Permissions",
    responses(
        (status = 200, description = "Effective permissions", body = MyPermissionsResponse),
        (status = 401, description = "No authenticated session"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn my_permissions(access: Access) -> Json<MyPermissionsResponse> {
    let permissions = access.user_permissions().await;
    let principal = access.principal;

    Json(MyPermissionsResponse {
        subject: principal.subject().to_string(),
        roles: principal.roles,
        scopes: principal.scopes,
        permissions,
    })
}

/// Cached role graph, fetched on a cold cache
#[utoipa::path(
    get,
    path = "/api/admin/roles",
    tag = "Permissions",
    responses(
        (status = 200, description = "Role graph", body = RoleListResponse),
        (status = 403, description = "Missing role:read"),
        (status = 502, description = "Identity server unavailable"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_roles(State(state): State<AppState>) -> AppResult<Json<RoleListResponse>> {
    let roles = state.permissions.role_map().await?;
    Ok(Json(RoleListResponse {
        roles: roles.roles().clone(),
    }))
}

/// Roles that grant a permission
#[utoipa::path(
    get,
    path = "/api/admin/permissions/{permission}/roles",
    tag = "Permissions",
    params(("permission" = String, Path, description = "Permission id, e.g. user:read")),
    responses(
        (status = 200, description = "Granting roles", body = GrantingRolesResponse),
        (status = 502, description = "Identity server unavailable"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn granting_roles(
    State(state): State<AppState>,
    Path(permission): Path<String>,
) -> AppResult<Json<GrantingRolesResponse>> {
    let roles = state.permissions.try_roles_granting(&permission).await?;
    Ok(Json(GrantingRolesResponse { permission, roles }))
}

/// Re-pull the role graph from the identity server
#[utoipa::path(
    post,
    path = "/api/admin/permissions/refresh",
    tag = "Permissions",
    responses(
        (status = 200, description = "Cache refreshed", body = RefreshResponse),
        (status = 403, description = "Caller is not a superadmin"),
        (status = 502, description = "Identity server unavailable; previous cache kept"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn refresh_permissions(State(state): State<AppState>, access: Access) -> AppResult<Json<RefreshResponse>> {
    let roles = state.permissions.refresh_cache().await?;
    tracing::info!(subject = access.principal.subject(), roles = roles.len(), "permission cache refreshed via api");

    Ok(Json(RefreshResponse {
        roles: roles.len(),
        permissions: roles.permission_count(),
    }))
}

/// Drop the cached role graph; the next query refetches it
#[utoipa::path(
    delete,
    path = "/api/admin/permissions/cache",
    tag = "Permissions",
    responses(
        (status = 204, description = "Cache cleared"),
        (status = 403, description = "Caller is not a superadmin"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn clear_permissions(State(state): State<AppState>, access: Access) -> AppResult<StatusCode> {
    state.permissions.clear_cache().await?;
    tracing::info!(subject = access.principal.subject(), "permission cache cleared via api");
    Ok(StatusCode::NO_CONTENT)
}

/// Scopes granted to the current session
#[utoipa::path(
    get,
    path = "/api/admin/scopes",
    tag = "Permissions",
    responses(
        (status = 200, description = "Session scopes", body = ScopesResponse),
        (status = 403, description = "Missing internal_role_mgt_view scope"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn my_scopes(access: Access) -> Json<ScopesResponse> {
    Json(ScopesResponse {
        scopes: access.principal.scopes,
    })
}
