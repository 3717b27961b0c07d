use anyhow::{Context, Result};
use axum::Router;
use snapshot_store::{
    config::{AppConfig, BackendKind},
    handlers::object_handlers::AppState,
    routes,
    services::{
        backend::StorageBackend,
        local_backend::{self, LocalBackend},
        memory_backend::MemoryBackend,
        options::StorageOptions,
        repository::Repository,
    },
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting snapshot-store with config: {:?}", cfg);

    let endpoint = cfg
        .account
        .endpoint()
        .context("resolving blob service endpoint")?;

    let backend: Arc<dyn StorageBackend> = match cfg.backend {
        BackendKind::Memory => {
            if migrate {
                anyhow::bail!("--migrate requires the local backend");
            }
            Arc::new(MemoryBackend::new(endpoint))
        }
        BackendKind::Local => {
            let db = connect_sqlite(&cfg).await?;

            // --- Handle migration mode ---
            if migrate {
                local_backend::migrate(&db).await?;
                tracing::info!("Database migration complete.");
                return Ok(()); // exit after migration
            }

            let mut local = LocalBackend::new(db, cfg.storage_dir.clone(), endpoint);
            match cfg.account.credential() {
                Ok(credential) => local = local.with_credential(credential),
                Err(err) => tracing::warn!("signed copy sources disabled: {}", err),
            }
            Arc::new(local)
        }
    };

    // --- Initialize repository ---
    let options: Arc<dyn StorageOptions> = Arc::new(cfg.account.clone());
    let repository = Repository::open(backend, options, cfg.repository.clone()).await?;
    let state = AppState::new(repository);
    let shutdown = state.shutdown.clone();

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for shutdown signal: {}", err);
            }
            tracing::info!("Shutting down, cancelling in-flight operations");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}

/// Open the metadata pool, creating the storage and database directories.
async fn connect_sqlite(cfg: &AppConfig) -> Result<Arc<sqlx::SqlitePool>> {
    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("parsing database url `{}`", db_url))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(Arc::new(pool))
}
