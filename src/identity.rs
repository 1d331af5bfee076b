//! Upstream identity provider client.
//!
//! The resolution service only needs one call: fetch the whole role graph.
//! `Wso2Client` implements it against the WSO2 Identity Server SCIM2 roles API.

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::Deserialize;

use crate::authz::{Permission, RoleEntry, RoleMap, RoleMember};
use crate::config::Wso2Config;
use crate::errors::UpstreamError;

const ROLES_PATH: &str = "/scim2/v2/Roles";
const PAGE_SIZE: usize = 100;

#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Fetch every role with its members and granted permissions.
    async fn fetch_role_graph(&self) -> Result<RoleMap, UpstreamError>;
}

#[derive(Debug, Clone)]
pub struct Wso2Client {
    http: reqwest::Client,
    config: Wso2Config,
}

impl Wso2Client {
    pub fn new(config: Wso2Config) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| UpstreamError::Configuration(err.to_string()))?;

        Ok(Self { http, config })
    }

    async fn fetch_page(&self, start_index: usize) -> Result<ScimRoleList, UpstreamError> {
        let url = format!("{}{}", self.config.base_url, ROLES_PATH);
        let start_index = start_index.to_string();
        let count = PAGE_SIZE.to_string();

        let page = self
            .http
            .get(url)
            .query(&[
                ("attributes", "displayName,users,permissions"),
                ("startIndex", start_index.as_str()),
                ("count", count.as_str()),
            ])
            .basic_auth(&self.config.username, Some(&self.config.password))
            .header(ACCEPT, "application/scim+json")
            .send()
            .await?
            .error_for_status()?
            .json::<ScimRoleList>()
            .await?;

        Ok(page)
    }
}

#[async_trait]
impl IdentityClient for Wso2Client {
    async fn fetch_role_graph(&self) -> Result<RoleMap, UpstreamError> {
        let mut resources = Vec::new();
        let mut start_index = 1;

        loop {
            let page = self.fetch_page(start_index).await?;
            let received = page.resources.len();
            resources.extend(page.resources);

            let total = page.total_results.unwrap_or(resources.len());
            if received == 0 || resources.len() >= total {
                break;
            }
            start_index += received;
        }

        tracing::debug!(roles = resources.len(), "fetched role graph from identity server");
        role_map_from_scim(resources)
    }
}

// =============================================================================
// SCIM PAYLOAD
// =============================================================================

#[derive(Debug, Deserialize)]
struct ScimRoleList {
    #[serde(rename = "totalResults", default)]
    total_results: Option<usize>,
    #[serde(rename = "Resources", default)]
    resources: Vec<ScimRole>,
}

#[derive(Debug, Deserialize)]
struct ScimRole {
    #[serde(rename = "displayName", default)]
    display_name: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    users: Vec<ScimRef>,
    #[serde(default)]
    permissions: Vec<Permission>,
}

#[derive(Debug, Deserialize)]
struct ScimRef {
    value: String,
    #[serde(default)]
    display: Option<String>,
}

fn role_map_from_scim(resources: Vec<ScimRole>) -> Result<RoleMap, UpstreamError> {
    resources
        .into_iter()
        .map(|role| {
            let name = role
                .display_name
                .filter(|name| !name.trim().is_empty())
                .ok_or_else(|| {
                    UpstreamError::Malformed(format!(
                        "role {} has no displayName",
                        role.id.as_deref().unwrap_or("<unknown>")
                    ))
                })?;

            let users = role
                .users
                .into_iter()
                .map(|user| RoleMember {
                    id: user.value,
                    name: user.display,
                })
                .collect();

            Ok((name, RoleEntry { users, permissions: role.permissions }))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use axum::extract::Query;
    use axum::http::{header, HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    use super::*;

    #[test]
    fn converts_scim_roles() {
        let payload = json!({
            "totalResults": 2,
            "Resources": [
                {
                    "id": "r1",
                    "displayName": "dev",
                    "users": [{"value": "u1", "display": "alice"}],
                    "permissions": [{"value": "user:read", "display": "Read users"}, "user:update"]
                },
                {"id": "r2", "displayName": "sales"}
            ]
        });

        let list: ScimRoleList = serde_json::from_value(payload).unwrap();
        assert_eq!(list.total_results, Some(2));

        let map = role_map_from_scim(list.resources).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.permissions_for(&["dev"]).len(), 2);

        let dev = map.lookup("dev").next().unwrap();
        assert_eq!(dev.users[0].name.as_deref(), Some("alice"));
        assert!(map.lookup("sales").next().unwrap().permissions.is_empty());
    }

    #[test]
    fn nameless_role_is_malformed() {
        let list: ScimRoleList = serde_json::from_value(json!({"Resources": [{"id": "r9"}]})).unwrap();
        let err = role_map_from_scim(list.resources).unwrap_err();
        assert!(matches!(err, UpstreamError::Malformed(msg) if msg.contains("r9")));
    }

    #[test]
    fn empty_listing_is_empty_map() {
        let list: ScimRoleList = serde_json::from_value(json!({"totalResults": 0})).unwrap();
        assert!(role_map_from_scim(list.resources).unwrap().is_empty());
    }

    // =========================================================================
    // HTTP
    // =========================================================================

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base_url: String) -> Wso2Client {
        Wso2Client::new(Wso2Config {
            base_url,
            username: "admin".into(),
            password: "secret".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    async fn paged_roles(headers: HeaderMap, Query(params): Query<HashMap<String, String>>) -> impl IntoResponse {
        let basic = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("Basic "));
        if !basic {
            return StatusCode::UNAUTHORIZED.into_response();
        }

        let page = match params.get("startIndex").map(String::as_str) {
            Some("1") => json!({
                "totalResults": 3,
                "Resources": [
                    {"id": "r1", "displayName": "dev", "permissions": ["user:read"]},
                    {"id": "r2", "displayName": "Sales", "permissions": [{"value": "lead:read"}]}
                ]
            }),
            Some("3") => json!({
                "totalResults": 3,
                "Resources": [{"id": "r3", "displayName": "superadmin", "permissions": ["role:read"]}]
            }),
            _ => json!({"totalResults": 3, "Resources": []}),
        };
        Json(page).into_response()
    }

    #[tokio::test]
    async fn follows_scim_pagination() {
        let base = serve(Router::new().route(ROLES_PATH, get(paged_roles))).await;

        let map = client(base).fetch_role_graph().await.unwrap();
        assert_eq!(map.len(), 3);
        assert!(map.permissions_for(&["SALES"]).contains("lead:read"));
        assert!(map.permissions_for(&["superadmin"]).contains("role:read"));
    }

    #[tokio::test]
    async fn error_status_maps_to_status() {
        let router = Router::new().route(ROLES_PATH, get(|| async { StatusCode::SERVICE_UNAVAILABLE }));
        let base = serve(router).await;

        let err = client(base).fetch_role_graph().await.unwrap_err();
        assert!(matches!(err, UpstreamError::Status(503)), "got {err:?}");
    }

    #[tokio::test]
    async fn non_json_body_is_malformed() {
        let router = Router::new().route(ROLES_PATH, get(|| async { "<html>maintenance</html>" }));
        let base = serve(router).await;

        let err = client(base).fetch_role_graph().await.unwrap_err();
        assert!(matches!(err, UpstreamError::Malformed(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn unreachable_server_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(format!("http://{addr}")).fetch_role_graph().await.unwrap_err();
        assert!(matches!(err, UpstreamError::Transport(_)), "got {err:?}");
    }
}
