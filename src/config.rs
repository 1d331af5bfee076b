use std::time::Duration;

use crate::authz::{AuthzMode, PermissionMatch};
use crate::errors::AppError;

pub const DEFAULT_CACHE_KEY: &str = "wso2_role_permissions";
pub const DEFAULT_CACHE_TTL_SECS: u64 = 86_400;
/// Ten years. Use `0` for a snapshot that never expires.
pub const MAX_CACHE_TTL_SECS: u64 = 10 * 365 * 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Database,
}

#[derive(Debug, Clone)]
pub struct Wso2Config {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub key: String,
    pub ttl: Duration,
    pub store: StoreKind,
    pub database_url: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key: DEFAULT_CACHE_KEY.to_string(),
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            store: StoreKind::Memory,
            database_url: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub production: bool,
    pub login_path: String,
    pub authz_mode: AuthzMode,
    pub permission_match: PermissionMatch,
    pub cache: CacheConfig,
    pub wso2: Option<Wso2Config>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            production: false,
            login_path: "/login".to_string(),
            authz_mode: AuthzMode::Strict,
            permission_match: PermissionMatch::Exact,
            cache: CacheConfig::default(),
            wso2: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let port = parse_var("APP_PORT", 8000u16)?;
        let production = env_or("APP_ENV", "local").eq_ignore_ascii_case("production");
        let login_path = env_or("LOGIN_PATH", "/login");

        let authz_mode = AuthzMode::parse(&env_or("AUTHZ_MODE", "strict"))
            .ok_or_else(|| AppError::configuration("AUTHZ_MODE must be one of off, advisory, strict"))?;
        let permission_match = PermissionMatch::parse(&env_or("PERMISSION_MATCH", "exact"))
            .ok_or_else(|| AppError::configuration("PERMISSION_MATCH must be exact or case_insensitive"))?;

        let store = match env_or("PERMISSION_CACHE_STORE", "memory").to_lowercase().as_str() {
            "memory" => StoreKind::Memory,
            "database" => StoreKind::Database,
            _ => return Err(AppError::configuration("PERMISSION_CACHE_STORE must be memory or database")),
        };
        let database_url = std::env::var("DATABASE_URL").ok();
        if store == StoreKind::Database && database_url.is_none() {
            return Err(AppError::configuration("DATABASE_URL not set for database cache store"));
        }

        let cache = CacheConfig {
            key: env_or("PERMISSION_CACHE_KEY", DEFAULT_CACHE_KEY),
            ttl: cache_ttl(parse_var("PERMISSION_CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS)?)?,
            store,
            database_url,
        };

        Ok(Self {
            port,
            production,
            login_path,
            authz_mode,
            permission_match,
            cache,
            wso2: Wso2Config::from_env()?,
        })
    }
}

impl Wso2Config {
    /// Returns `None` when no identity server is configured.
    pub fn from_env() -> Result<Option<Self>, AppError> {
        let Ok(base_url) = std::env::var("WSO2_BASE_URL") else {
            return Ok(None);
        };
        let username = std::env::var("WSO2_USERNAME").map_err(|_| AppError::configuration("WSO2_USERNAME not set"))?;
        let password = std::env::var("WSO2_PASSWORD").map_err(|_| AppError::configuration("WSO2_PASSWORD not set"))?;
        let timeout = Duration::from_secs(parse_var("WSO2_TIMEOUT_SECS", 10u64)?);

        Ok(Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            username,
            password,
            timeout,
        }))
    }
}

fn cache_ttl(secs: u64) -> Result<Duration, AppError> {
    if secs > MAX_CACHE_TTL_SECS {
        return Err(AppError::configuration(format!(
            "PERMISSION_CACHE_TTL_SECS must be at most {MAX_CACHE_TTL_SECS} (0 disables expiry)"
        )));
    }
    Ok(Duration::from_secs(secs))
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, AppError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| AppError::configuration(format!("{name} must be a valid number"))),
        Err(_) => Ok(default),
    }
}

/// Load `.env` from the working directory, falling back to the crate-local file.
pub fn load_env() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    let _ = dotenvy::from_path(crate_env);
}

pub fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
