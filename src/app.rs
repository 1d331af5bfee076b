use std::sync::Arc;

use axum::http::{HeaderMap, Method};
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::{permissions, roles, scopes, MemoryStore, RolePermissionService, RolePermissionStore, SqliteStore};
use crate::config::{AppConfig, CacheConfig, StoreKind};
use crate::errors::AppError;
use crate::identity::{IdentityClient, Wso2Client};
use crate::jwt::{session_token, JwtConfig, SessionClaims};
use crate::middleware::{require_permissions, require_roles, require_scopes, PermissionGuard, RoleGuard, ScopeGuard};
use crate::routes::{health, permissions as permission_routes};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub jwt: Arc<JwtConfig>,
    pub permissions: Arc<RolePermissionService>,
}

impl AppState {
    pub fn new(config: AppConfig, jwt: JwtConfig, permissions: RolePermissionService) -> Self {
        Self {
            config: Arc::new(config),
            jwt: Arc::new(jwt),
            permissions: Arc::new(permissions),
        }
    }

    pub async fn from_config(config: AppConfig, jwt: JwtConfig) -> Result<Self, AppError> {
        let permissions = build_permission_service(&config).await?;
        Ok(Self::new(config, jwt, permissions))
    }

    /// Decoded session envelope, if the request carries a valid one.
    pub fn session(&self, headers: &HeaderMap) -> Option<SessionClaims> {
        let token = session_token(headers)?;
        match self.jwt.decode(token) {
            Ok(claims) => Some(claims),
            Err(err) => {
                tracing::debug!(error = %err, "ignoring invalid session token");
                None
            }
        }
    }
}

/// Wire the WSO2 client and the configured cache store into a resolution service.
pub async fn build_permission_service(config: &AppConfig) -> Result<RolePermissionService, AppError> {
    let wso2 = config
        .wso2
        .clone()
        .ok_or_else(|| AppError::configuration("WSO2_BASE_URL not set"))?;
    let client: Arc<dyn IdentityClient> =
        Arc::new(Wso2Client::new(wso2).map_err(|err| AppError::configuration(err.to_string()))?);

    let store = build_cache_store(&config.cache).await?;

    Ok(RolePermissionService::new(client, store, &config.cache).with_permission_match(config.permission_match))
}

/// The configured cache store on its own, for operations that never reach the
/// identity server.
pub async fn build_cache_store(cache: &CacheConfig) -> Result<Arc<dyn RolePermissionStore>, AppError> {
    let store: Arc<dyn RolePermissionStore> = match cache.store {
        StoreKind::Memory => Arc::new(MemoryStore::new()),
        StoreKind::Database => {
            let url = cache
                .database_url
                .as_deref()
                .ok_or_else(|| AppError::configuration("DATABASE_URL not set"))?;
            Arc::new(SqliteStore::connect(url).await?)
        }
    };
    Ok(store)
}

/// Delete the cached role graph without contacting the identity server.
pub async fn clear_permission_cache(cache: &CacheConfig) -> Result<(), AppError> {
    build_cache_store(cache).await?.delete(&cache.key).await?;
    tracing::info!(key = %cache.key, "permission cache cleared");
    Ok(())
}

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let me_routes = Router::new()
        .route("/permissions", get(permission_routes::my_permissions))
        .route_layer(from_fn_with_state(RoleGuard::new(&state, Vec::<String>::new()), require_roles));

    let role_routes = Router::new()
        .route("/roles", get(permission_routes::list_roles))
        .route("/permissions/:permission/roles", get(permission_routes::granting_roles))
        .route_layer(from_fn_with_state(
            PermissionGuard::any(&state, [permissions::ROLE_READ]),
            require_permissions,
        ));

    let cache_routes = Router::new()
        .route("/permissions/refresh", post(permission_routes::refresh_permissions))
        .route("/permissions/cache", delete(permission_routes::clear_permissions))
        .route_layer(from_fn_with_state(RoleGuard::new(&state, [roles::SUPER_ADMIN]), require_roles));

    let scope_routes = Router::new()
        .route("/scopes", get(permission_routes::my_scopes))
        .route_layer(from_fn_with_state(ScopeGuard::new(&state, [scopes::ROLE_MGT_VIEW]), require_scopes));

    Router::new()
        .route("/api/health", get(health::health))
        .nest("/api/me", me_routes)
        .nest("/api/admin", role_routes.merge(cache_routes).merge(scope_routes))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
