use anyhow::Result;
use axum::{
    routing::{get, post},
    Extension, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::info;

mod config;
mod database;
mod handlers;
mod models;
mod services;
mod utils;

use config::Settings;
use database::{DbPool, Repository};
use services::{
    ChatOrchestrator, EmbeddingService, LlmBackend, QdrantRetriever, ResilientInvoker, RetryPolicy,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,chat_api_server=debug".to_string()),
        )
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .init();

    info!("🚀 Starting Chat API Server...");

    // Load configuration
    let settings = Settings::load()?;
    info!("✅ Configuration loaded");

    // Initialize database pool
    let db_pool = DbPool::new(&settings.database).await?;
    info!("✅ Database connection established");

    // Initialize repository (table bootstrap is dev/demo convenience)
    let repository = Arc::new(Repository::new(db_pool.clone()));
    repository.ensure_schema().await?;

    // Initialize services
    let embedding_service = Arc::new(EmbeddingService::new(settings.embedding.clone()));

    let retriever = Arc::new(QdrantRetriever::new(
        settings.vector_index.clone(),
        embedding_service.clone(),
    ));

    let primary = Arc::new(LlmBackend::new(
        &settings.llm,
        settings.llm.primary_model.clone(),
        settings.chat.system_prompt.clone(),
    ));
    let fallback = Arc::new(LlmBackend::new(
        &settings.llm,
        settings.llm.fallback_model.clone(),
        settings.chat.system_prompt.clone(),
    ));

    let invoker = ResilientInvoker::new(RetryPolicy::from_config(&settings.llm));

    let orchestrator = Arc::new(ChatOrchestrator::new(
        repository,
        retriever,
        primary,
        fallback,
        invoker,
        settings.chat.clone(),
    ));

    // Build router
    let app = build_router(orchestrator, db_pool);

    // Server address
    let host = settings
        .server
        .host
        .parse::<std::net::IpAddr>()
        .map_err(|e| {
            utils::error::ApiError::InternalError(format!(
                "Invalid server host '{}': {}",
                settings.server.host, e
            ))
        })?;
    let addr = SocketAddr::from((host, settings.server.port));

    info!("🎯 Server listening on {}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(orchestrator: Arc<ChatOrchestrator>, db_pool: DbPool) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check))
        .route("/api/chat", post(handlers::chat::chat_handler))
        .layer(Extension(orchestrator))
        .layer(Extension(db_pool))
        // CORS
        .layer(
            CorsLayer::permissive()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        // Tracing
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
}
