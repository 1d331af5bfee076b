use role_gate::app::{create_app, AppState};
use role_gate::config::{init_tracing, load_env, AppConfig};
use role_gate::docs;
use role_gate::jwt::JwtConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let config = AppConfig::from_env()?;
    let jwt = JwtConfig::from_env()?;
    let port = config.port;

    let state = AppState::from_config(config, jwt).await?;
    let app = create_app(state).merge(docs::swagger_routes(docs::build_openapi(port)));

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
