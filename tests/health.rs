mod common;

use anyhow::Result;
use axum::http::StatusCode;

use common::*;

#[tokio::test]
async fn health_endpoint_reports_cache_state() -> Result<()> {
    let app = test_app();

    let (status, resp) = send(&app, api_get("/api/health", None)).await?;
    assert_eq!(status, StatusCode::OK, "health endpoint did not return 200");
    let v = body_json(resp).await?;
    assert_eq!(v["status"], "ok");
    assert_eq!(v["cache_warm"], false, "cold cache expected, got: {}", v);

    app.state.permissions.refresh_cache().await?;

    let (_, resp) = send(&app, api_get("/api/health", None)).await?;
    let v = body_json(resp).await?;
    assert_eq!(v["cache_warm"], true, "warm cache expected, got: {}", v);

    // health never fetches on its own
    assert_eq!(app.identity.calls(), 1);
    Ok(())
}
