use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use base64::{engine::general_purpose, Engine as _};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tracing::{error, info};

use crate::config::Config;
use crate::core::{
    is_valid_serial_port, require_field, CompileRequest, CompileResponse, ErrorBody,
    UploadRequest, UploadResponse,
};
use crate::toolchain::{self, ArduinoCli, Toolchain};
use crate::workspace::{SketchDir, Workspace};

type ApiError = (StatusCode, Json<ErrorBody>);

struct AppState {
    toolchain: Arc<dyn Toolchain>,
    workspace: Workspace,
    /// Bounds the number of simultaneously running toolchain processes.
    build_permits: Semaphore,
    export_binaries: bool,
}

pub async fn create_app(config: &Config) -> Result<Router> {
    let workspace = Workspace::ensure(&config.temp_root).await?;
    let toolchain = Arc::new(ArduinoCli::from_config(config));
    Ok(build_router(config, workspace, toolchain))
}

/// Router construction with an injectable toolchain, used directly by tests.
pub fn build_router(config: &Config, workspace: Workspace, toolchain: Arc<dyn Toolchain>) -> Router {
    let state = Arc::new(AppState {
        toolchain,
        workspace,
        build_permits: Semaphore::new(config.max_concurrent_builds),
        export_binaries: config.export_binaries,
    });

    Router::new()
        .route("/compile", post(compile_handler))
        .route("/upload", post(upload_handler))
        .route("/health", get(health_handler))
        .fallback_service(static_site(&config.static_dir))
        .layer(
            ServiceBuilder::new()
                .layer(CorsLayer::permissive())
                .into_inner(),
        )
        .with_state(state)
}

/// The frontend: every unmatched route serves the static site, with
/// index.html as the catch-all document.
fn static_site(dir: &Path) -> ServeDir<ServeFile> {
    ServeDir::new(dir).fallback(ServeFile::new(dir.join("index.html")))
}

async fn compile_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CompileRequest>,
) -> Result<Json<CompileResponse>, ApiError> {
    let (Some(code), Some(board)) = (require_field(&req.code), require_field(&req.board)) else {
        return Err(bad_request(ErrorBody::new("Code and board are required")));
    };

    info!("Compile request for board {}", board);

    let _permit = acquire_permit(&state, "Compilation failed").await?;
    let sketch = materialize(&state, code, "Compilation failed").await?;
    let result = compile_sketch(&state, &sketch, board).await;
    sketch.remove().await;
    result.map(Json)
}

async fn upload_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UploadRequest>,
) -> Result<Json<UploadResponse>, ApiError> {
    let (Some(code), Some(board), Some(port)) = (
        require_field(&req.code),
        require_field(&req.board),
        require_field(&req.port),
    ) else {
        return Err(bad_request(ErrorBody::new(
            "Code, board, and port are required",
        )));
    };

    if !is_valid_serial_port(port) {
        return Err(bad_request(ErrorBody::with_details(
            "Invalid port format",
            format!("Port {port} is not valid. Use format COM7 or /dev/ttyUSB0."),
        )));
    }

    info!("Upload request for board {} on port {}", board, port);

    let _permit = acquire_permit(&state, "Upload failed").await?;
    let sketch = materialize(&state, code, "Compilation failed").await?;
    let result = upload_sketch(&state, &sketch, board, port).await;
    sketch.remove().await;
    result.map(Json)
}

async fn compile_sketch(
    state: &AppState,
    sketch: &SketchDir,
    board: &str,
) -> Result<CompileResponse, ApiError> {
    let output = state
        .toolchain
        .compile(sketch.path(), board)
        .await
        .map_err(|e| {
            error!("Compile failed for board {}: {}", board, e);
            internal(ErrorBody::with_details("Compilation failed", e.details()))
        })?;

    let binary = if state.export_binaries {
        let bytes = toolchain::read_exported_binary(sketch.path())
            .await
            .map_err(|e| {
                error!("Artifact missing after successful compile: {}", e);
                internal(ErrorBody::with_details("Compilation failed", e.details()))
            })?;
        Some(general_purpose::STANDARD.encode(bytes))
    } else {
        None
    };

    let warnings = output.warnings();
    Ok(CompileResponse {
        message: "Compilation successful".to_string(),
        output: output.stdout,
        warnings,
        binary,
    })
}

async fn upload_sketch(
    state: &AppState,
    sketch: &SketchDir,
    board: &str,
    port: &str,
) -> Result<UploadResponse, ApiError> {
    // A compile failure short-circuits; the uploader is never attempted.
    state
        .toolchain
        .compile(sketch.path(), board)
        .await
        .map_err(|e| {
            error!("Compile failed for board {}: {}", board, e);
            internal(ErrorBody::with_details("Compilation failed", e.details()))
        })?;

    let output = state
        .toolchain
        .upload(sketch.path(), board, port)
        .await
        .map_err(|e| {
            error!("Upload failed on port {}: {}", port, e);
            internal(ErrorBody::with_details("Upload failed", e.details()))
        })?;

    let warnings = output.warnings();
    Ok(UploadResponse {
        message: "Upload successful".to_string(),
        output: output.stdout,
        warnings,
    })
}

async fn acquire_permit<'a>(
    state: &'a AppState,
    error: &str,
) -> Result<tokio::sync::SemaphorePermit<'a>, ApiError> {
    state
        .build_permits
        .acquire()
        .await
        .map_err(|e| internal(ErrorBody::with_details(error, e.to_string())))
}

async fn materialize(state: &AppState, code: &str, error: &str) -> Result<SketchDir, ApiError> {
    state.workspace.create_sketch(code).await.map_err(|e| {
        error!("Failed to materialize sketch: {:#}", e);
        internal(ErrorBody::with_details(error, e.to_string()))
    })
}

fn bad_request(body: ErrorBody) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(body))
}

fn internal(body: ErrorBody) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "sketch-runner",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub async fn run_server(config: Config) -> Result<()> {
    let app = create_app(&config).await?;

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server running on http://0.0.0.0:{}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
