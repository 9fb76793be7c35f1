use anyhow::Context;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use query::RetrievalResult;
use serde::{Deserialize, Serialize};
use session::{AppConfig, CourseSession, EmbedderKind, EngineError, IngestionSummary, RetrievalEngine};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[derive(Clone)]
struct AppState {
    session: Arc<CourseSession>,
    config: Arc<AppConfig>,
}

#[derive(Deserialize)]
struct IngestRequest {
    source_id: String,
    /// Extracted document text; pages separated by form feeds
    text: String,
}

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default = "default_top_k")]
    top_k: usize,
}

fn default_top_k() -> usize {
    5
}

#[derive(Serialize)]
struct SearchResponse {
    #[serde(flatten)]
    result: RetrievalResult,
    /// Prompt-ready rendering of both result sets
    context: String,
}

#[derive(Serialize)]
struct RemoveResponse {
    removed: bool,
}

#[derive(Serialize)]
struct RestoreResponse {
    documents: Vec<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    backend: String,
    documents: usize,
}

#[derive(Serialize)]
struct StatsResponse {
    session: session::SessionInfo,
    engine: session::EngineStats,
}

/// Maps engine errors onto HTTP status codes
struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::BackendUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::IngestInProgress(_) | EngineError::Cancelled(_) => StatusCode::CONFLICT,
            EngineError::InvalidTopK | EngineError::Snapshot(_) => StatusCode::BAD_REQUEST,
            EngineError::Index(_) | EngineError::Config(_) | EngineError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = serde_json::json!({
            "error": self.0.to_string(),
            "grounding_unavailable": self.0.is_backend_unavailable(),
        });
        (status, Json(body)).into_response()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config_path = std::env::var("GRAPHRAG_CONFIG").unwrap_or_else(|_| "graphrag.toml".to_string());
    let config = AppConfig::load(&PathBuf::from(&config_path)).context("Failed to load configuration")?;
    let course_id = std::env::var("GRAPHRAG_COURSE").unwrap_or_else(|_| "default".to_string());
    let bind_addr = std::env::var("GRAPHRAG_BIND").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    let engine = Arc::new(RetrievalEngine::from_config(&config));
    let cache_path = config.course_cache_path(&course_id);
    let session = Arc::new(
        CourseSession::start(engine, &course_id, cache_path)
            .await
            .context("Failed to start course session")?,
    );

    let state = AppState {
        session: session.clone(),
        config: Arc::new(config),
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/documents", post(ingest_document))
        .route("/documents/:source_id", delete(remove_document))
        .route("/search", post(search))
        .route("/snapshot", get(snapshot))
        .route("/restore", post(restore))
        .route("/stats", get(get_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;

    tracing::info!(addr = %bind_addr, course = %course_id, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    match Arc::try_unwrap(session) {
        Ok(session) => {
            let report = session.end().await.context("Failed to save session")?;
            tracing::info!(queries = report.queries, path = %report.saved_to.display(), "Session saved");
        }
        Err(session) => session.save().await.context("Failed to save session")?,
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("GRAPHRAG_LOG_JSON").is_ok() {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutting down");
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let backend = &state.config.backend;
    let backend_status = match backend.embedder {
        EmbedderKind::Hashing => "offline embedder".to_string(),
        EmbedderKind::Ollama => match reqwest::get(format!("{}/api/tags", backend.ollama_url)).await {
            Ok(resp) if resp.status().is_success() => "ok".to_string(),
            Ok(resp) => format!("error: status {}", resp.status()),
            Err(e) => format!("error: {}", e),
        },
    };

    let documents = state.session.engine().documents().await.len();
    Json(HealthResponse {
        status: "ok",
        backend: backend_status,
        documents,
    })
}

async fn ingest_document(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestionSummary>, ApiError> {
    let summary = state.session.ingest(&req.text, &req.source_id).await?;
    Ok(Json(summary))
}

async fn remove_document(State(state): State<AppState>, Path(source_id): Path<String>) -> Json<RemoveResponse> {
    let removed = state.session.engine().remove_document(&source_id).await;
    Json(RemoveResponse { removed })
}

async fn search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let result = state.session.query(&req.query, req.top_k).await?;
    let context = result.to_context();
    Ok(Json(SearchResponse { result, context }))
}

async fn snapshot(State(state): State<AppState>) -> Result<Response, ApiError> {
    let blob = state.session.engine().snapshot().await?;
    Ok(([(header::CONTENT_TYPE, "application/json")], blob).into_response())
}

async fn restore(State(state): State<AppState>, body: Bytes) -> Result<Json<RestoreResponse>, ApiError> {
    let documents = state.session.engine().restore(&body).await?;
    Ok(Json(RestoreResponse { documents }))
}

async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        session: state.session.info().await,
        engine: state.session.engine().stats().await,
    })
}
