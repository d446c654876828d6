use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::infer::{Detection, DetectorConfig};

/// Anchor-aligned raw outputs of a RetinaFace-style network.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDetectRequest {
    pub width: u32,
    pub height: u32,
    pub scores: Vec<f32>,
    pub boxes: Vec<f32>,
    pub landmarks: Vec<f32>,
    #[serde(default)]
    pub config: Option<DetectorConfig>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LffdBranchPayload {
    pub feature_width: usize,
    pub feature_height: usize,
    pub scores: Vec<f32>,
    pub boxes: Vec<f32>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LffdDetectRequest {
    pub input_width: u32,
    pub input_height: u32,
    /// Defaults to the network input size.
    #[serde(default)]
    pub original_width: Option<u32>,
    #[serde(default)]
    pub original_height: Option<u32>,
    pub branches: Vec<LffdBranchPayload>,
    #[serde(default)]
    pub config: Option<DetectorConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDetectRequest {
    /// Base64-encoded JPEG or PNG.
    pub image: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectResponse {
    pub request_id: Uuid,
    /// Anchors or feature cells the pipeline evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub positions: Option<usize>,
    pub detections: Vec<Detection>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}
