mod common;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::StatusCode;
use serde_json::json;
use tempfile::tempdir;

use role_gate::app::{build_permission_service, clear_permission_cache};
use role_gate::authz::{RolePermissionService, RolePermissionStore, SqliteStore};
use role_gate::config::{AppConfig, CacheConfig, StoreKind};

use common::*;

#[tokio::test]
async fn operator_refresh_is_visible_to_server() -> Result<()> {
    let dir = tempdir().context("failed to create tempdir")?;
    let url = format!("sqlite://{}", dir.path().join("cache.db").display());

    let config = AppConfig {
        cache: CacheConfig {
            store: StoreKind::Database,
            database_url: Some(url.clone()),
            ..CacheConfig::default()
        },
        ..AppConfig::default()
    };

    // server process
    let server_store = SqliteStore::connect(&url).await?;
    let app = test_app_with(config.clone(), Arc::new(server_store));

    // operator process sharing the database
    let operator_identity = FakeIdentity::new(sample_roles());
    let operator = RolePermissionService::new(
        operator_identity.clone(),
        Arc::new(SqliteStore::connect(&url).await?),
        &config.cache,
    );
    let refreshed = operator.refresh_cache().await?;
    assert_eq!(refreshed.len(), 3);

    let token = session_token(json!(["Dev"]), "");
    let (status, resp) = send(&app, api_get("/api/me/permissions", Some(&token))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body_json(resp).await?["permissions"], json!(["user:read", "user:update"]));
    assert_eq!(app.identity.calls(), 0, "server should read the operator's snapshot");

    // operator clear forces the server to refetch
    operator.clear_cache().await?;
    let (status, _) = send(&app, api_get("/api/me/permissions", Some(&token))).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.identity.calls(), 1);
    assert_eq!(operator_identity.calls(), 1);

    Ok(())
}

#[tokio::test]
async fn undecodable_snapshot_is_refetched_once() -> Result<()> {
    let dir = tempdir().context("failed to create tempdir")?;
    let url = format!("sqlite://{}", dir.path().join("cache.db").display());
    let store = SqliteStore::connect(&url).await?;

    let cache = CacheConfig {
        store: StoreKind::Database,
        database_url: Some(url.clone()),
        ..CacheConfig::default()
    };
    sqlx::query("INSERT INTO cache (key, value, expires_at) VALUES (?, ?, ?)")
        .bind(&cache.key)
        .bind(r#"{"dev": 5}"#)
        .bind(chrono::Utc::now().timestamp() + 86_400)
        .execute(store.pool())
        .await?;

    let identity = FakeIdentity::new(sample_roles());
    let service = RolePermissionService::new(identity.clone(), Arc::new(store), &cache);

    for _ in 0..3 {
        assert!(service.has_permission(&["dev"], "user:read").await);
    }
    assert_eq!(identity.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn clear_needs_no_identity_server() -> Result<()> {
    let dir = tempdir().context("failed to create tempdir")?;
    let url = format!("sqlite://{}", dir.path().join("cache.db").display());

    let config = AppConfig {
        cache: CacheConfig {
            store: StoreKind::Database,
            database_url: Some(url.clone()),
            ..CacheConfig::default()
        },
        wso2: None,
        ..AppConfig::default()
    };

    let store = SqliteStore::connect(&url).await?;
    store
        .put(&config.cache.key, Arc::new(sample_roles()), std::time::Duration::from_secs(60))
        .await?;

    assert!(build_permission_service(&config).await.is_err());
    clear_permission_cache(&config.cache).await?;
    assert!(store.get(&config.cache.key).await?.is_none());
    Ok(())
}
