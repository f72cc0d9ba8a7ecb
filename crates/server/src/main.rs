//! tarn server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::sync::Arc;
use tarn_core::config::AppConfig;
use tarn_server::{AppState, HtpasswdStore, create_router};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// tarn - an npm registry caching proxy
#[derive(Parser, Debug)]
#[command(name = "tarnd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "TARN_CONFIG", default_value = "config/server.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("tarn v{}", env!("CARGO_PKG_VERSION"));

    // Config file is optional; TARN_ env vars can provide or override everything.
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    let has_config_file = config_path.exists();

    if has_config_file {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}", args.config);
    }

    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with("TARN_") && key != "TARN_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: tarnd --config /path/to/config.toml\n  \
             2. Environment variables: TARN_SERVER__BIND=0.0.0.0:4873 \
             TARN_AUTH__JWT_SECRET=change-me tarnd\n\n\
             See config/server.example.toml for example configuration.\n\
             Set TARN_CONFIG env var to specify a default config file path."
        );
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("TARN_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;

    tarn_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let storage = tarn_storage::from_config(&config.cache)
        .await
        .context("failed to initialize cache storage")?;
    storage
        .health_check()
        .await
        .context("cache storage health check failed")?;
    tracing::info!(
        backend = storage.backend_name(),
        root = %config.cache.root.display(),
        "Cache storage ready"
    );

    let credentials = Arc::new(HtpasswdStore::new(&config.auth.htpasswd_path));
    if !config.auth.htpasswd_path.exists() {
        tracing::warn!(
            path = %config.auth.htpasswd_path.display(),
            "htpasswd file not found; logins will fail until it is created"
        );
    }

    let state = AppState::new(config.clone(), storage, credentials)
        .context("failed to create upstream client")?;
    tracing::info!(
        upstream = %config.upstream.base_url(),
        mount = %config.server.normalized_mount_path(),
        "Proxying npm registry"
    );

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
