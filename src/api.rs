use crate::asset_placement::content_type_for;
use crate::config::ServerConfig;
use crate::model_store::{ModelRecord, ModelStore};
use crate::upload::{SpooledUpload, UploadError, UploadIntake, UploadOrchestrator};
use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderName, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::path::{Path as StdPath, PathBuf};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ModelStore>,
    pub orchestrator: Arc<UploadOrchestrator>,
    pub uploads_dir: PathBuf,
    pub qr_codes_dir: PathBuf,
    pub spool_dir: PathBuf,
    pub service_name: String,
}

/// Error response
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Envelope for record listings
#[derive(Debug, serde::Serialize)]
pub struct ModelsResponse {
    pub models: Vec<ModelRecord>,
}

/// Envelope for a single record
#[derive(Debug, serde::Serialize)]
pub struct ModelResponse {
    pub model: ModelRecord,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ErrorResponse>)>;

fn error_response(status: StatusCode, error: &str, code: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            code: code.to_string(),
        }),
    )
}

/// Create the API router
pub fn create_router(state: AppState, config: &ServerConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/models", get(list_models))
        .route("/api/models/:id", get(get_model))
        .route("/api/upload-model", post(upload_model))
        .route("/uploads/*file", get(serve_upload))
        .route("/qr-codes/*file", get(serve_qr_code))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": state.service_name,
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let data_dir = state
        .store
        .path()
        .parent()
        .map(StdPath::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    match tokio::fs::create_dir_all(&data_dir).await {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "registry": "writable"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "registry": "unavailable",
                "error": e.to_string()
            })),
        ),
    }
}

/// List all records, newest first
async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        models: state.store.list_all().await,
    })
}

/// Get a single record by id
#[instrument(skip(state))]
async fn get_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ModelResponse>> {
    if id.trim().is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "Invalid model ID",
            "INVALID_ID",
        ));
    }

    match state.store.get(&id).await {
        Some(model) => Ok(Json(ModelResponse { model })),
        None => Err(error_response(
            StatusCode::NOT_FOUND,
            "Model not found",
            "NOT_FOUND",
        )),
    }
}

/// Accept a multipart model upload and run the full intake sequence
#[instrument(skip(state, multipart))]
async fn upload_model(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<ModelResponse>> {
    let mut intake = UploadIntake::default();

    if let Err(response) = collect_multipart(&state, &mut multipart, &mut intake).await {
        // A half-read form may already have spooled the file field
        if let Some(file) = intake.file.take() {
            let _ = tokio::fs::remove_file(&file.path).await;
        }
        return Err(response);
    }

    match state.orchestrator.process(intake).await {
        Ok(model) => Ok(Json(ModelResponse { model })),
        Err(e @ UploadError::MissingField(_)) => Err(error_response(
            StatusCode::BAD_REQUEST,
            &e.to_string(),
            "MISSING_FIELD",
        )),
        Err(UploadError::Internal(e)) => {
            error!(error = %e, "Upload failed");
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Upload failed",
                "UPLOAD_ERROR",
            ))
        }
    }
}

/// Walk the multipart fields into an intake, spooling the file field to disk
async fn collect_multipart(
    state: &AppState,
    multipart: &mut Multipart,
    intake: &mut UploadIntake,
) -> Result<(), (StatusCode, Json<ErrorResponse>)> {
    let invalid_body =
        || error_response(StatusCode::BAD_REQUEST, "Invalid multipart body", "INVALID_MULTIPART");

    while let Some(field) = multipart.next_field().await.map_err(|_| invalid_body())? {
        let field_name = field.name().map(str::to_string);

        match field_name.as_deref() {
            Some("name") => {
                intake.name = Some(field.text().await.map_err(|_| invalid_body())?);
            }
            Some("description") => {
                intake.description = Some(field.text().await.map_err(|_| invalid_body())?);
            }
            Some("file") => {
                let original_name = field.file_name().unwrap_or("model.glb").to_string();
                let data = field.bytes().await.map_err(|_| invalid_body())?;

                let path = state.spool_dir.join(format!("{}.upload", Uuid::new_v4()));
                let spooled = async {
                    tokio::fs::create_dir_all(&state.spool_dir).await?;
                    tokio::fs::write(&path, &data).await
                }
                .await;

                if let Err(e) = spooled {
                    error!(error = %e, "Failed to spool upload");
                    return Err(error_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Upload failed",
                        "SPOOL_ERROR",
                    ));
                }

                intake.file = Some(SpooledUpload { path, original_name });
            }
            // Unknown fields are ignored, matching lenient form parsers
            _ => {}
        }
    }

    Ok(())
}

/// Serve raw model bytes from the local uploads directory
async fn serve_upload(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> ApiResult<([(HeaderName, String); 2], Vec<u8>)> {
    serve_bytes(&state.uploads_dir, &file, None).await
}

/// Serve raw QR image bytes from the local qr-codes directory
async fn serve_qr_code(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> ApiResult<([(HeaderName, String); 2], Vec<u8>)> {
    serve_bytes(&state.qr_codes_dir, &file, Some("image/png")).await
}

async fn serve_bytes(
    dir: &StdPath,
    file: &str,
    content_type: Option<&'static str>,
) -> ApiResult<([(HeaderName, String); 2], Vec<u8>)> {
    if !is_safe_relative_path(file) {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "Invalid file path",
            "INVALID_PATH",
        ));
    }

    let path = dir.join(file);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(error_response(
                StatusCode::NOT_FOUND,
                "File not found",
                "NOT_FOUND",
            ));
        }
        Err(e) => {
            error!(error = %e, path = %path.display(), "Failed to read stored file");
            return Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read file",
                "READ_ERROR",
            ));
        }
    };

    let content_type = content_type.unwrap_or_else(|| content_type_for(file));

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            // Placed files never change once written, cache for a year
            (header::CACHE_CONTROL, "public, max-age=31536000".to_string()),
        ],
        bytes,
    ))
}

/// Reject path traversal and absolute paths in user-supplied file paths
fn is_safe_relative_path(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && path.split('/').all(|c| !c.is_empty() && c != "." && c != "..")
}

/// Start the API server
pub async fn start_api_server(state: AppState, config: &ServerConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting model registry API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
