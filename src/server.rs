//! HTTP surface: analysis, sequence lookup, health and rendered artifacts.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    analysis::{AnalysisReport, Analyzer},
    artifacts::MoveArtifacts,
    board,
    error::VisionError,
};

/// Largest accepted upload.
pub const UPLOAD_LIMIT: usize = 20 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    analyzer: Arc<Analyzer>,
}

pub fn router(analyzer: Arc<Analyzer>) -> Router {
    let artifacts = ServeDir::new(analyzer.artifacts().root());
    let state = AppState { analyzer };

    Router::new()
        .route("/api/analyze", post(analyze))
        .route("/api/sequence/{move_id}", get(latest_sequence))
        .route("/api/sequence/{request_id}/{move_id}", get(sequence))
        .route("/api/health", get(health))
        .nest_service("/artifacts", artifacts)
        .layer(DefaultBodyLimit::max(UPLOAD_LIMIT))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

impl IntoResponse for VisionError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = if status.is_server_error() {
            error!(error = ?self, "analysis failed");
            format!("Analysis failed: {self}")
        } else {
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

async fn analyze(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<AnalysisReport>, VisionError> {
    let mut image = None;
    let mut turn = None;
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => image = Some(field.bytes().await?),
            Some("turn") => turn = Some(field.text().await?),
            _ => {}
        }
    }

    let image = image
        .filter(|bytes| !bytes.is_empty())
        .ok_or(VisionError::MissingImage)?;
    let side = board::parse_side(turn.as_deref());
    info!(bytes = image.len(), ?side, "analysis requested");

    let report = state.analyzer.analyze(&image, side).await?;
    Ok(Json(report))
}

async fn sequence(
    State(state): State<AppState>,
    Path((request_id, move_id)): Path<(Uuid, u32)>,
) -> Result<Json<MoveArtifacts>, VisionError> {
    let artifacts = state
        .analyzer
        .artifacts()
        .sequence(Some(request_id), move_id)
        .await?;
    Ok(Json(artifacts))
}

async fn latest_sequence(
    State(state): State<AppState>,
    Path(move_id): Path<u32>,
) -> Result<Json<MoveArtifacts>, VisionError> {
    let artifacts = state.analyzer.artifacts().sequence(None, move_id).await?;
    Ok(Json(artifacts))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "message": "Chess Vision API is running",
    }))
}
