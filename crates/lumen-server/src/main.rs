// lumen-server: process wiring only.
// Reads configuration, builds the storage pool, registers providers and
// handlers, starts the job queue's worker pool, and exposes exactly the
// three job-boundary endpoints plus the WebSocket upgrade route. No auth,
// no session handling, no other REST surface — the rest of the HTTP
// router is an out-of-scope external collaborator.

mod jobs;
mod runners;
mod ws;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::{Json, Router};
use lumen_bus::ProgressBus;
use lumen_core::config::{BudgetConfig, HandlerConfig, QueueConfig, TaskModelTable};
use lumen_handlers::{BuildMaterialHandler, IngestDocumentsHandler, PublishMaterialHandler, TranscribeMediaHandler};
use lumen_providers::{Aggregator, ChatProvider, LocalServer, ProviderRouter};
use lumen_queue::JobQueue;
use lumen_storage::Database;
use runners::{FfmpegMediaSplitter, GhostscriptRasterizer, LibreOfficeConverter, PandocTectonicPipeline};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Builds the Provider Router from whichever provider env vars are
/// set. At least one of the aggregator (cloud) or local-server backends
/// must be configured; the first one registered also becomes the default.
fn build_provider_router() -> Result<ProviderRouter> {
    let mut registered_any = false;
    let default_tag = std::env::var("LUMEN_DEFAULT_PROVIDER_TAG").unwrap_or_else(|_| "openrouter".to_string());
    let mut router = ProviderRouter::new(&default_tag);

    if let Ok(api_key) = std::env::var("LUMEN_OPENROUTER_API_KEY") {
        let api_url = std::env::var("LUMEN_OPENROUTER_API_URL")
            .unwrap_or_else(|_| "https://openrouter.ai/api/v1/chat/completions".to_string());
        router.register("openrouter", Arc::new(Aggregator::new(api_url, api_key)));
        registered_any = true;
    }

    if let Ok(generate_url) = std::env::var("LUMEN_OLLAMA_GENERATE_URL") {
        router.register("ollama", Arc::new(LocalServer::new(generate_url)));
        registered_any = true;
    }

    if !registered_any {
        anyhow::bail!(
            "no LLM provider configured: set LUMEN_OPENROUTER_API_KEY and/or LUMEN_OLLAMA_GENERATE_URL"
        );
    }

    Ok(router)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lumen_server=debug,lumen_queue=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("lumen-server starting...");

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL environment variable required")?;
    let db = Database::from_url(&database_url)
        .await
        .context("failed to connect to database")?;
    tracing::info!("database connection established");

    let bus = ProgressBus::new();
    let queue_config = QueueConfig::from_env().context("invalid queue configuration")?;
    let worker_count = queue_config.worker_count;
    let queue = JobQueue::new(db.clone(), bus.clone(), queue_config);

    let router: Arc<dyn ChatProvider> = Arc::new(build_provider_router()?);
    let task_models = TaskModelTable::from_env().context("invalid task-model configuration")?;
    let handler_config = HandlerConfig::from_env().context("invalid handler configuration")?;
    let budget_config = BudgetConfig::from_env().context("invalid budget configuration")?;

    let scratch_root = PathBuf::from(std::env::var("LUMEN_SCRATCH_DIR").unwrap_or_else(|_| "./scratch".to_string()));
    let exports_dir = PathBuf::from(std::env::var("LUMEN_EXPORTS_DIR").unwrap_or_else(|_| "./exports".to_string()));
    let language_code = std::env::var("LUMEN_INGEST_LANGUAGE").unwrap_or_else(|_| "en".to_string());

    queue
        .register_handler(Arc::new(TranscribeMediaHandler::new(
            db.clone(),
            router.clone(),
            Arc::new(FfmpegMediaSplitter::new()),
            handler_config,
            task_models.clone(),
            scratch_root.clone(),
        )))
        .await;
    queue
        .register_handler(Arc::new(IngestDocumentsHandler::new(
            db.clone(),
            router.clone(),
            Arc::new(LibreOfficeConverter::new()),
            Arc::new(GhostscriptRasterizer::new()),
            handler_config,
            task_models.clone(),
            scratch_root.clone(),
            language_code,
        )))
        .await;
    queue
        .register_handler(Arc::new(BuildMaterialHandler::new(
            db.clone(),
            router.clone(),
            task_models.clone(),
            budget_config,
        )))
        .await;
    queue
        .register_handler(Arc::new(PublishMaterialHandler::new(
            db.clone(),
            Arc::new(PandocTectonicPipeline::new(exports_dir)),
        )))
        .await;
    tracing::info!("job handlers registered");

    queue.recover_crashed_jobs().await.context("crash recovery failed")?;
    let _workers = queue.start();
    tracing::info!(workers = worker_count, "worker pool started");

    let jobs_state = jobs::AppState { queue: queue.clone() };
    let ws_state = ws::AppState { bus: bus.clone() };

    let app = Router::new()
        .route("/health", get(health))
        .merge(jobs::routes(jobs_state))
        .merge(ws::routes(ws_state))
        .layer(TraceLayer::new_for_http());

    let addr = std::env::var("LUMEN_LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("failed to bind listen address")?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(queue))
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal(queue: Arc<JobQueue>) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received, stopping worker pool");
    queue.shutdown();
}
