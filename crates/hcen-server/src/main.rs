use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use hcen_auth::audit::TracingAuditSink;
use hcen_auth::identity::InMemoryIdentityDirectory;
use hcen_auth::{AuthBroker, StoreHandles, crypto};
use hcen_server::config::loader::load_config;
use hcen_server::{AppState, build_router, init_tracing};
use tokio::net::TcpListener;

const MEMORY_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// How the configuration path was determined.
#[derive(Debug, Clone, Copy)]
enum ConfigSource {
    /// From --config CLI argument
    CliArgument,
    /// From HCEN_CONFIG environment variable
    EnvironmentVariable,
    /// Default path (hcen.toml)
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CliArgument => write!(f, "CLI argument (--config)"),
            Self::EnvironmentVariable => write!(f, "environment variable (HCEN_CONFIG)"),
            Self::Default => write!(f, "default"),
        }
    }
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("Warning: Failed to load .env file: {e}");
        }
    }

    let (config_path, source) = resolve_config_path();
    let cfg = match load_config(Some(&config_path)) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    init_tracing(&cfg.logging);
    tracing::info!(path = %config_path, source = %source, "Configuration loaded");

    if let Err(err) = run(cfg).await {
        tracing::error!(error = %format!("{err:#}"), "Server error");
        std::process::exit(1);
    }
}

async fn run(cfg: hcen_server::AppConfig) -> anyhow::Result<()> {
    crypto::self_test().context("crypto self-test failed")?;

    let stores = if cfg.redis.enabled {
        hcen_auth_redis::connect(&cfg.redis.pools)
            .await
            .context("failed to connect Redis store pools")?
    } else {
        tracing::warn!("Redis disabled; using in-memory stores (single instance only)");
        StoreHandles::in_memory_with_purge(MEMORY_PURGE_INTERVAL)
    };

    let broker = AuthBroker::new(
        cfg.auth.clone(),
        stores,
        Arc::new(InMemoryIdentityDirectory::new()),
        Arc::new(TracingAuditSink),
    )
    .context("failed to initialize broker")?;

    let addr = cfg.server.addr();
    let app = build_router(AppState::new(broker, cfg.server));
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "HCEN auth server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server terminated")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Resolve the configuration file path.
///
/// Priority order:
/// 1. CLI argument: --config <path>
/// 2. Environment variable: HCEN_CONFIG
/// 3. Default: hcen.toml
fn resolve_config_path() -> (String, ConfigSource) {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return (path, ConfigSource::CliArgument);
            }
        }
    }

    if let Ok(path) = env::var("HCEN_CONFIG") {
        if !path.is_empty() {
            return (path, ConfigSource::EnvironmentVariable);
        }
    }

    ("hcen.toml".to_string(), ConfigSource::Default)
}
