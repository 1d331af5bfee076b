#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::Value;
use tower::util::ServiceExt; // for `oneshot`

use role_gate::authz::{MemoryStore, RoleEntry, RoleMap, RolePermissionService, RolePermissionStore};
use role_gate::config::AppConfig;
use role_gate::errors::UpstreamError;
use role_gate::identity::IdentityClient;
use role_gate::jwt::{JwtConfig, SessionClaims};
use role_gate::{create_app, AppState};

pub const SECRET: &str = "test-secret";

/// Identity client double that serves a fixed role graph and counts calls.
pub struct FakeIdentity {
    pub calls: AtomicUsize,
    pub failing: AtomicBool,
    roles: RoleMap,
}

impl FakeIdentity {
    pub fn new(roles: RoleMap) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            roles,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl IdentityClient for FakeIdentity {
    async fn fetch_role_graph(&self) -> Result<RoleMap, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(UpstreamError::Transport("connection refused".into()));
        }
        Ok(self.roles.clone())
    }
}

pub fn sample_roles() -> RoleMap {
    [
        ("dev".to_string(), RoleEntry::with_permissions(["user:read", "user:update"])),
        ("Sales".to_string(), RoleEntry::with_permissions(["lead:read"])),
        ("superadmin".to_string(), RoleEntry::with_permissions(["role:read", "user:read"])),
    ]
    .into_iter()
    .collect()
}

pub struct TestApp {
    pub router: Router,
    pub identity: Arc<FakeIdentity>,
    pub state: AppState,
}

pub fn test_app_with(config: AppConfig, store: Arc<dyn RolePermissionStore>) -> TestApp {
    let identity = FakeIdentity::new(sample_roles());
    let service = RolePermissionService::new(identity.clone(), store, &config.cache)
        .with_permission_match(config.permission_match);
    let state = AppState::new(config, JwtConfig::new(SECRET), service);

    TestApp {
        router: create_app(state.clone()),
        identity,
        state,
    }
}

pub fn test_app() -> TestApp {
    test_app_with(AppConfig::default(), Arc::new(MemoryStore::new()))
}

pub fn session_token(roles: Value, scope: &str) -> String {
    let claims = SessionClaims::new("alice")
        .with_access_token("wso2-access-token")
        .with_roles(roles)
        .with_scope(scope);
    JwtConfig::new(SECRET).encode(claims).expect("sign session")
}

pub fn api_get(uri: &str, token: Option<&str>) -> Request<Body> {
    api_request("GET", uri, token)
}

pub fn api_request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("accept", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder.body(Body::empty()).expect("request")
}

pub fn browser_get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri).header("accept", "text/html");
    if let Some(token) = token {
        builder = builder.header("cookie", format!("session={token}"));
    }
    builder.body(Body::empty()).expect("request")
}

pub async fn send(app: &TestApp, req: Request<Body>) -> Result<(StatusCode, Response)> {
    let resp: Response = app.router.clone().oneshot(req).await?;
    Ok((resp.status(), resp))
}

pub async fn body_json(resp: Response) -> Result<Value> {
    let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub async fn body_text(resp: Response) -> Result<String> {
    let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
