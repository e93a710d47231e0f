//! Receipt Extractor - transaction extraction server for chat text and receipt photos.

mod config;
mod extractor;
mod llm;
mod ocr;
mod parser;
mod preprocess;
mod prompt;
mod result_store;
mod retry;
mod sanity;
mod schema;
mod taxonomy;

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use config::AppConfig;
use extractor::{ExtractionError, Extractor, FailureClass, Stage};
use llm::OpenRouterClient;
use ocr::tesseract::TesseractCli;
use ocr::OcrEngine;
use result_store::ResultStore;
use sanity::SanityChecker;
use schema::{ExtractionResult, Modality};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    extractor: Arc<Extractor>,
    results: ResultStore,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "receipt_extractor=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load()?;

    // Fail fast when tesseract or its language data is missing
    let backend = TesseractCli::new(&config.ocr)?;
    let ocr = Arc::new(OcrEngine::new(Arc::new(backend), config.ocr.clone()));

    let llm = OpenRouterClient::from_config(&config.llm)?;
    info!("LLM client initialized: {}", config.llm.model);

    let extractor = Extractor::new(ocr, Arc::new(llm))
        .with_preprocess(config.preprocess.clone())
        .with_retry(config.retry.clone())
        .with_sanity(SanityChecker::new(config.sanity.clone()));

    let state = AppState {
        extractor: Arc::new(extractor),
        results: ResultStore::new(config.server.max_stored_results),
    };

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    info!("Server listening on http://{}", config.server.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/extract", post(extract))
        .route("/extractions/:id", get(get_extraction))
        .route("/reviews", get(list_reviews))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct ExtractRequest {
    user_id: i64,
    #[serde(default)]
    text: Option<String>,
    /// Path of an already-downloaded receipt image.
    #[serde(default)]
    image_path: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    class: Option<FailureClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    raw_output: Option<String>,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn bad_request(message: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: message.to_string(),
            stage: None,
            class: None,
            raw_output: None,
        }),
    )
}

fn extraction_failure(err: ExtractionError) -> ApiError {
    let status = match err.class() {
        FailureClass::Unreadable => StatusCode::UNPROCESSABLE_ENTITY,
        FailureClass::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
    };
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
            stage: Some(err.stage()),
            class: Some(err.class()),
            raw_output: err.raw_output().map(str::to_string),
        }),
    )
}

/// Run one message through the pipeline.
async fn extract(
    State(state): State<AppState>,
    Json(request): Json<ExtractRequest>,
) -> Result<Json<ExtractionResult>, ApiError> {
    let modality = match (request.text, request.image_path) {
        (Some(text), None) => Modality::Text(text),
        (None, Some(path)) => Modality::Image(path),
        _ => return Err(bad_request("provide exactly one of 'text' or 'image_path'")),
    };

    let result = state
        .extractor
        .run(request.user_id, modality)
        .await
        .map_err(|e| {
            error!("Extraction failed at {}: {}", e.stage(), e);
            extraction_failure(e)
        })?;

    state.results.insert(result.clone());
    info!(
        "Extraction complete: {} ({:?}), {} results stored",
        result.id,
        result.routing,
        state.results.len()
    );
    Ok(Json(result))
}

/// Get an extraction by ID.
async fn get_extraction(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExtractionResult>, StatusCode> {
    state.results.get(&id).map(Json).ok_or(StatusCode::NOT_FOUND)
}

/// Results waiting for human review, newest first.
async fn list_reviews(State(state): State<AppState>) -> Json<Vec<ExtractionResult>> {
    Json(state.results.pending_review())
}
