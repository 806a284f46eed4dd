use anyhow::Result;
use axum::Router;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod fault;
mod handlers;
mod models;
mod routes;
mod services;

use config::RunMode;
use services::{
    bucket_store::BucketStore,
    file_data_service::{FileDataService, ReplicationPolicy, now_micros},
    reconciler,
    url_signer::UrlSigner,
};

const INIT_SCHEMA: &str = include_str!("../migrations/0001_init.sql");

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + run mode ---
    let (cfg, mode) = config::AppConfig::from_env_and_args()?;

    tracing::info!(
        addr = %cfg.addr(),
        hot_bucket = %cfg.hot_bucket,
        buckets = ?cfg.replica_buckets,
        replica_count = cfg.replica_count,
        "starting file-data store"
    );

    // --- Ensure bucket directories exist ---
    for bucket in &cfg.replica_buckets {
        let dir = Path::new(&cfg.storage_dir).join(bucket);
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
            tracing::info!("Created bucket directory at {}", dir.display());
        }
    }

    // --- Initialize SQLite connection ---
    let db_path = cfg
        .database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let db_url = if cfg.database_url.contains('?') || cfg.database_url.contains(":memory:") {
        cfg.database_url.clone()
    } else {
        format!("{}?mode=rwc", cfg.database_url)
    };
    tracing::debug!("Connecting using URL => {}", db_url);
    let db: Arc<SqlitePool> = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?,
    );

    // --- Handle migration mode ---
    if mode == RunMode::Migrate {
        run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize core service ---
    let service = FileDataService::new(
        db,
        BucketStore::new(&cfg.storage_dir, cfg.replica_buckets.iter().cloned()),
        UrlSigner::new(
            cfg.url_secret.as_bytes(),
            cfg.public_url.clone(),
            chrono::Duration::seconds(cfg.url_ttl_secs),
        ),
        ReplicationPolicy {
            hot_bucket: cfg.hot_bucket.clone(),
            replica_buckets: cfg.replica_buckets.clone(),
            replica_count: cfg.replica_count,
            lease_duration: chrono::Duration::seconds(cfg.lease_secs),
        },
    );

    // --- Handle one-shot reconciliation ---
    if mode == RunMode::Reconcile {
        let stats = reconciler::run_pass(&service, now_micros(), cfg.reconcile_batch).await?;
        tracing::info!(?stats, "Reconciliation pass complete.");
        return Ok(());
    }

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(service);

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
    axum::serve(listener, app).await?;

    Ok(())
}

/// Apply the embedded schema, one statement at a time.
pub(crate) async fn run_migrations(db: &SqlitePool) -> Result<()> {
    let statements = INIT_SCHEMA
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(())
}
