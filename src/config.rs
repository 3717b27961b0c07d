use crate::services::options::{CloudInstance, RepositoryOptions, StorageAccountOptions};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::env;

/// Where blob payloads and metadata live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// In-process maps, lost on exit.
    Memory,
    /// SQLite metadata plus payload files on disk.
    Local,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: BackendKind,
    pub storage_dir: String,
    pub database_url: String,
    pub account: StorageAccountOptions,
    pub repository: RepositoryOptions,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Blob snapshot repository with virtual directories")]
pub struct Args {
    /// Host to bind to (overrides SNAPSHOT_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides SNAPSHOT_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Storage backend (overrides SNAPSHOT_STORE_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Directory where blob payloads are stored (overrides SNAPSHOT_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides SNAPSHOT_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Account connection string (overrides SNAPSHOT_STORE_CONNECTION_STRING)
    #[arg(long)]
    pub connection_string: Option<String>,

    /// Account name (overrides SNAPSHOT_STORE_ACCOUNT_NAME)
    #[arg(long)]
    pub account_name: Option<String>,

    /// Base64 account key (overrides SNAPSHOT_STORE_ACCOUNT_KEY)
    #[arg(long)]
    pub account_key: Option<String>,

    /// Use the storage emulator account
    #[arg(long)]
    pub use_development_storage: bool,

    /// Cloud the account lives in (overrides SNAPSHOT_STORE_CLOUD_INSTANCE)
    #[arg(long, value_enum)]
    pub cloud_instance: Option<CloudInstance>,

    /// Public blob endpoint (overrides SNAPSHOT_STORE_BLOB_ENDPOINT)
    #[arg(long)]
    pub blob_endpoint: Option<String>,

    /// Container activated at startup (overrides SNAPSHOT_STORE_CONTAINER)
    #[arg(long)]
    pub container: Option<String>,

    /// Virtual root prefixed to blob names (overrides SNAPSHOT_STORE_VIRTUAL_PATH)
    #[arg(long)]
    pub virtual_path: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_flag(name: &str) -> Result<bool> {
    match env::var(name) {
        Ok(value) => value
            .parse::<bool>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(false),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

fn env_enum<T: ValueEnum>(name: &str) -> Result<Option<T>> {
    env_opt(name)
        .map(|value| {
            T::from_str(&value, true)
                .map_err(|err| anyhow::anyhow!("parsing {} value `{}`: {}", name, value, err))
        })
        .transpose()
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        Self::merge(Args::parse())
    }

    fn merge(args: Args) -> Result<(Self, bool)> {
        // --- Environment fallback ---
        let env_host = env::var("SNAPSHOT_STORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("SNAPSHOT_STORE_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing SNAPSHOT_STORE_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading SNAPSHOT_STORE_PORT"),
        };
        let env_backend = env_enum::<BackendKind>("SNAPSHOT_STORE_BACKEND")?;
        let env_storage =
            env::var("SNAPSHOT_STORE_STORAGE_DIR").unwrap_or_else(|_| "./data/blobs".into());
        let env_db = env::var("SNAPSHOT_STORE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/snapshot_store.db".into());
        let env_cloud = env_enum::<CloudInstance>("SNAPSHOT_STORE_CLOUD_INSTANCE")?;

        let account = StorageAccountOptions {
            connection_string: args
                .connection_string
                .or_else(|| env_opt("SNAPSHOT_STORE_CONNECTION_STRING")),
            account_name: args
                .account_name
                .or_else(|| env_opt("SNAPSHOT_STORE_ACCOUNT_NAME")),
            account_key: args
                .account_key
                .or_else(|| env_opt("SNAPSHOT_STORE_ACCOUNT_KEY")),
            use_development_storage: args.use_development_storage
                || env_flag("SNAPSHOT_STORE_USE_DEVELOPMENT_STORAGE")?,
            cloud_instance: args.cloud_instance.or(env_cloud).unwrap_or_default(),
            blob_endpoint: args
                .blob_endpoint
                .or_else(|| env_opt("SNAPSHOT_STORE_BLOB_ENDPOINT")),
        };
        let repository = RepositoryOptions {
            initial_container: args
                .container
                .or_else(|| env_opt("SNAPSHOT_STORE_CONTAINER")),
            virtual_path: args
                .virtual_path
                .or_else(|| env_opt("SNAPSHOT_STORE_VIRTUAL_PATH")),
        };

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            backend: args.backend.or(env_backend).unwrap_or(BackendKind::Local),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            account,
            repository,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
