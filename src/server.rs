use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::DetectError;
use crate::inference::{family_name, InferenceContext};
use crate::infer::lffd::{LffdBranch, LffdVariant};
use crate::infer::{Detector, DetectorConfig, DetectorFamily, RawOutputs};
use crate::models::{self, ModelCatalogEntry, SelectedCatalog};
use crate::protocol::{DetectResponse, ErrorBody, LffdDetectRequest, RawDetectRequest};

/// Raw tensors for a VGA input run to a few megabytes of JSON.
const MAX_BODY_BYTES: usize = 64 << 20;

#[derive(Clone)]
pub struct AppState {
    pub inference: Arc<InferenceContext>,
    pub models_dir: PathBuf,
    pub started_at: String,
}

impl AppState {
    pub fn new(inference: InferenceContext, models_dir: impl Into<PathBuf>) -> Self {
        let started_at = time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default();
        Self { inference: Arc::new(inference), models_dir: models_dir.into(), started_at }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    started_at: String,
    family: &'static str,
    selected: SelectedCatalog,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigResponse {
    execution_providers: Vec<&'static str>,
    active: DetectorConfig,
    presets: BTreeMap<&'static str, DetectorConfig>,
    models: Vec<ModelCatalogEntry>,
    selected: SelectedCatalog,
}

/// Detection errors rendered as `{ error, message }` with a matching status.
pub struct ApiError(DetectError);

impl From<DetectError> for ApiError {
    fn from(err: DetectError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DetectError::ShapeMismatch { .. }
            | DetectError::InvalidDimensions { .. }
            | DetectError::InvalidConfig(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DetectError::ImageDecode(_) => StatusCode::BAD_REQUEST,
            DetectError::ModelLoad { .. } => StatusCode::SERVICE_UNAVAILABLE,
            DetectError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        warn!("event" = "detect.rejected", code = self.0.code(), err = %self.0);
        let body = ErrorBody { error: self.0.code().to_string(), message: self.0.to_string() };
        (status, Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .route("/config", get(config))
        .route("/detect/raw", post(detect_raw))
        .route("/detect/lffd", post(detect_lffd));
    #[cfg(feature = "onnx")]
    let router = router.route("/detect", post(detect_image));
    router
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(
            CorsLayer::new()
                .allow_methods(Any)
                .allow_origin(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let body = HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        started_at: state.started_at.clone(),
        family: family_name(&state.inference.detector.config().family),
        selected: state.inference.selected_models.clone(),
    };
    (StatusCode::OK, Json(body))
}

async fn config(State(state): State<AppState>) -> impl IntoResponse {
    let presets = BTreeMap::from([
        ("retinaface", DetectorConfig::retinaface()),
        ("retinaface-mobile", DetectorConfig::retinaface_mobile()),
        ("lffd-five-scale", DetectorConfig::lffd(LffdVariant::FiveScale)),
        ("lffd-eight-scale", DetectorConfig::lffd(LffdVariant::EightScale)),
    ]);
    let execution_providers = if cfg!(feature = "onnx") {
        vec!["CUDAExecutionProvider", "CPUExecutionProvider"]
    } else {
        Vec::new()
    };
    let body = ConfigResponse {
        execution_providers,
        active: state.inference.detector.config().clone(),
        presets,
        models: models::inspect_models_dir(&state.models_dir),
        selected: state.inference.selected_models.clone(),
    };
    (StatusCode::OK, Json(body))
}

/// Uses the request's own configuration when given, the shared detector otherwise.
fn with_detector<T>(
    shared: &Detector,
    config: Option<DetectorConfig>,
    run: impl FnOnce(&Detector) -> Result<T, DetectError>,
) -> Result<T, DetectError> {
    match config {
        Some(config) => run(&Detector::new(config)?),
        None => run(shared),
    }
}

async fn detect_raw(
    State(state): State<AppState>,
    Json(req): Json<RawDetectRequest>,
) -> Result<Json<DetectResponse>, ApiError> {
    let started = Instant::now();
    let request_id = Uuid::new_v4();
    let raw = RawOutputs { scores: &req.scores, boxes: &req.boxes, landmarks: &req.landmarks };
    let (positions, detections) = with_detector(&state.inference.detector, req.config.clone(), |det| {
        let detections = det.detect_raw(&raw, req.width, req.height)?;
        Ok((det.anchor_count(req.width, req.height)?, detections))
    })?;
    info!(
        "event" = "detect.raw",
        request_id = %request_id,
        width = req.width,
        height = req.height,
        faces = detections.len(),
        elapsed_ms = started.elapsed().as_millis() as u64
    );
    Ok(Json(DetectResponse { request_id, positions: Some(positions), detections }))
}

async fn detect_lffd(
    State(state): State<AppState>,
    Json(req): Json<LffdDetectRequest>,
) -> Result<Json<DetectResponse>, ApiError> {
    let started = Instant::now();
    let request_id = Uuid::new_v4();
    let branches: Vec<LffdBranch<'_>> = req
        .branches
        .iter()
        .map(|b| LffdBranch {
            feature_width: b.feature_width,
            feature_height: b.feature_height,
            scores: &b.scores,
            boxes: &b.boxes,
        })
        .collect();
    let original_w = req.original_width.unwrap_or(req.input_width);
    let original_h = req.original_height.unwrap_or(req.input_height);

    let config = match (&req.config, &state.inference.detector.config().family) {
        (Some(config), _) => Some(config.clone()),
        (None, DetectorFamily::Lffd { .. }) => None,
        (None, DetectorFamily::RetinaFace { .. }) => Some(DetectorConfig::lffd(LffdVariant::default())),
    };
    let detections = with_detector(&state.inference.detector, config, |det| {
        det.detect_lffd(&branches, req.input_width, req.input_height, original_w, original_h)
    })?;
    // Every branch passed its shape check, so the cell counts are backed by data.
    let positions: usize = branches.iter().filter_map(LffdBranch::cells).sum();
    info!(
        "event" = "detect.lffd",
        request_id = %request_id,
        branches = branches.len(),
        faces = detections.len(),
        elapsed_ms = started.elapsed().as_millis() as u64
    );
    Ok(Json(DetectResponse { request_id, positions: Some(positions), detections }))
}

#[cfg(feature = "onnx")]
async fn detect_image(
    State(state): State<AppState>,
    Json(req): Json<crate::protocol::ImageDetectRequest>,
) -> Result<Json<DetectResponse>, ApiError> {
    use base64::Engine;

    let started = Instant::now();
    let request_id = Uuid::new_v4();
    let Some(det) = state.inference.onnx.as_ref() else {
        return Err(DetectError::ModelLoad {
            path: state.models_dir.display().to_string(),
            reason: "no detector model loaded".into(),
        }
        .into());
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(req.image.as_bytes())
        .map_err(|e| DetectError::ImageDecode(e.to_string()))?;
    let img = image::load_from_memory(&bytes)
        .map_err(|e| DetectError::ImageDecode(e.to_string()))?
        .to_rgb8();
    let detections = det.detect(&img)?;
    info!(
        "event" = "detect.image",
        request_id = %request_id,
        width = img.width(),
        height = img.height(),
        faces = detections.len(),
        elapsed_ms = started.elapsed().as_millis() as u64
    );
    Ok(Json(DetectResponse { request_id, positions: None, detections }))
}
