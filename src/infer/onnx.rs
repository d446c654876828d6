use std::sync::Mutex;

use image::RgbImage;
use ort::execution_providers::{CUDAExecutionProvider, ExecutionProviderDispatch};
use ort::session::Session;
use ort::value::Tensor;
use tracing::debug;

use super::lffd::LffdBranch;
use super::pipeline::{Detector, DetectorFamily, RawOutputs};
use super::preprocess::{resize, to_chw_tensor};
use super::Detection;
use crate::error::{DetectError, Result};
use crate::models::ModelSelection;

const DEFAULT_INPUT_NAME: &str = "input";

/// Runs a face detection model with onnxruntime and feeds its outputs to the pipeline.
pub struct OnnxDetector {
    session: Mutex<Session>,
    pipeline: Detector,
    input_name: String,
    output_names: Vec<String>,
    /// Fixed network input size; `None` runs at the image's own size.
    input_size: Option<(u32, u32)>,
}

fn inference_err(err: impl std::fmt::Display) -> DetectError {
    DetectError::Inference(err.to_string())
}

impl OnnxDetector {
    pub fn load(selection: &ModelSelection, pipeline: Detector) -> Result<Self> {
        let load = || -> std::result::Result<Session, String> {
            let builder = Session::builder().map_err(|e| e.to_string())?;
            let builder = builder.with_intra_threads(1).map_err(|e| e.to_string())?;
            let cuda = CUDAExecutionProvider::default();
            let providers: [ExecutionProviderDispatch; 1] = [cuda.into()];
            let mut builder = builder.with_execution_providers(providers).map_err(|e| e.to_string())?;
            builder.commit_from_file(&selection.path).map_err(|e| e.to_string())
        };
        let session = load().map_err(|reason| DetectError::ModelLoad {
            path: selection.path.clone(),
            reason,
        })?;

        let spec = selection.metadata.inputs.first();
        let expected_outputs = match &pipeline.config().family {
            DetectorFamily::RetinaFace { .. } => 3,
            DetectorFamily::Lffd { variant, .. } => variant.scales().len() * 2,
        };
        if selection.metadata.outputs.len() != expected_outputs {
            return Err(DetectError::ModelLoad {
                path: selection.path.clone(),
                reason: format!(
                    "metadata lists {} outputs, expected {expected_outputs}",
                    selection.metadata.outputs.len()
                ),
            });
        }

        Ok(Self {
            session: Mutex::new(session),
            pipeline,
            input_name: spec.map(|s| s.name.clone()).unwrap_or_else(|| DEFAULT_INPUT_NAME.to_string()),
            output_names: selection.metadata.outputs.clone(),
            input_size: spec.and_then(|s| s.spatial_size()),
        })
    }

    pub fn pipeline(&self) -> &Detector {
        &self.pipeline
    }

    /// Detects faces in an RGB image, returning boxes in the image's pixel space.
    pub fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>> {
        let (orig_w, orig_h) = image.dimensions();
        if orig_w == 0 || orig_h == 0 {
            return Err(DetectError::InvalidDimensions { width: orig_w, height: orig_h });
        }
        let (in_w, in_h) = self.input_size.unwrap_or((orig_w, orig_h));
        let resized = resize(image, in_w, in_h);
        let chw = to_chw_tensor(&resized, &self.pipeline.config().normalization);
        let input = Tensor::from_array(([1usize, 3, in_h as usize, in_w as usize], chw.into_raw_vec()))
            .map_err(inference_err)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| DetectError::Inference("session lock poisoned".into()))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(inference_err)?;

        // Outputs are copied out so the session lock is released before decoding.
        let extract = |name: &str| -> Result<(Vec<i64>, Vec<f32>)> {
            let value = outputs
                .get(name)
                .ok_or_else(|| DetectError::Inference(format!("model has no output {name}")))?;
            let (shape, data) = value.try_extract_tensor::<f32>().map_err(inference_err)?;
            Ok((shape.to_vec(), data.to_vec()))
        };
        let tensors = self
            .output_names
            .iter()
            .map(|name| extract(name))
            .collect::<Result<Vec<_>>>()?;
        drop(outputs);
        drop(session);

        let faces = match &self.pipeline.config().family {
            DetectorFamily::RetinaFace { .. } => {
                let raw = RawOutputs {
                    boxes: &tensors[0].1,
                    scores: &tensors[1].1,
                    landmarks: &tensors[2].1,
                };
                let sx = orig_w as f32 / in_w as f32;
                let sy = orig_h as f32 / in_h as f32;
                self.pipeline
                    .detect_raw(&raw, in_w, in_h)?
                    .into_iter()
                    .map(|d| d.scaled(sx, sy))
                    .collect()
            }
            DetectorFamily::Lffd { .. } => {
                let mut branches = Vec::with_capacity(tensors.len() / 2);
                for (pair, names) in tensors.chunks_exact(2).zip(self.output_names.chunks_exact(2)) {
                    let [.., fh, fw] = pair[0].0.as_slice() else {
                        return Err(DetectError::Inference(format!("output {} has no spatial dims", names[0])));
                    };
                    branches.push(LffdBranch {
                        feature_width: *fw as usize,
                        feature_height: *fh as usize,
                        scores: &pair[0].1,
                        boxes: &pair[1].1,
                    });
                }
                self.pipeline.detect_lffd(&branches, in_w, in_h, orig_w, orig_h)?
            }
        };
        debug!("event" = "onnx.detect", width = orig_w, height = orig_h, faces = faces.len());
        Ok(faces)
    }
}
