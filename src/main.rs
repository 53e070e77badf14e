use anyhow::{Context, Result};
use axum::Router;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use config::{AppConfig, BatchConfig, Mode, ServeConfig};
use handlers::thumbnail_handlers::AppState;
use services::{
    batch_runner::{BatchOptions, BatchRunner},
    event_processor::EventProcessor,
    object_store::ObjectStore,
    path_namer::PathNamer,
    storage_service::StorageService,
    thumbnailer::Thumbnailer,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + mode ---
    let (cfg, mode) = AppConfig::from_env_and_args()?;
    tracing::info!("Starting image-thumbnailer with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    let storage = open_storage(&cfg).await?;
    storage.migrate().await.context("applying metadata schema")?;

    let store: Arc<dyn ObjectStore> = Arc::new(storage);
    let thumbnailer = Thumbnailer::new(cfg.max_width, cfg.max_height);
    let namer = PathNamer::new(cfg.time_precision);

    match mode {
        Mode::Migrate => {
            tracing::info!("Database migration complete.");
            Ok(())
        }
        Mode::Batch(batch) => run_batch(&cfg, batch, store, thumbnailer, namer).await,
        Mode::Serve(serve) => serve_http(&cfg, serve, store, thumbnailer, namer).await,
    }
}

/// Connect to SQLite, creating the database file and its directory if needed.
async fn open_storage(cfg: &AppConfig) -> Result<StorageService> {
    let db_url = &cfg.database_url;
    tracing::debug!("Connecting using raw URL => {}", db_url);

    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() && !db_path.contains(":memory:") {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("parsing database url `{}`", db_url))?
        .create_if_missing(true);
    let db = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to {}", db_url))?;

    Ok(StorageService::new(Arc::new(db), cfg.storage_dir.clone()))
}

/// Exits non-zero only when the run cannot start or cannot list its input;
/// per-item failures are reported in the summary.
async fn run_batch(
    cfg: &AppConfig,
    batch: BatchConfig,
    store: Arc<dyn ObjectStore>,
    thumbnailer: Thumbnailer,
    namer: PathNamer,
) -> Result<()> {
    let runner = BatchRunner::new(store, thumbnailer, namer);
    let options = BatchOptions {
        task_index: batch.task_index,
        task_count: batch.task_count,
        preserve_subpath: batch.preserve_subpath,
        output_bucket: cfg.output_bucket.clone(),
        concurrency: batch.concurrency,
    };

    let summary = runner.run(&batch.input, &options).await?;
    tracing::info!(
        listed = summary.listed,
        images = summary.images,
        assigned = summary.assigned,
        processed = summary.processed,
        failed = summary.failed,
        skipped = summary.skipped,
        "batch task {} finished",
        batch.task_index
    );
    Ok(())
}

async fn serve_http(
    cfg: &AppConfig,
    serve: ServeConfig,
    store: Arc<dyn ObjectStore>,
    thumbnailer: Thumbnailer,
    namer: PathNamer,
) -> Result<()> {
    let processor = EventProcessor::new(store, thumbnailer, namer, cfg.output_bucket.clone());
    let state = AppState {
        processor: Arc::new(processor),
        upload_bucket: serve.upload_bucket.clone(),
    };

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = serve.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(serve.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", serve.port);
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
