use std::path::Path;

use tracing::{info, warn};

use crate::infer::lffd::LffdVariant;
use crate::infer::preprocess::Normalization;
use crate::infer::{Detector, DetectorConfig, DetectorFamily};
use crate::models::{select_best_models, ModelSelection, SelectedCatalog};
#[cfg(feature = "onnx")]
use crate::infer::onnx::OnnxDetector;

pub struct InferenceContext {
    pub selected_models: SelectedCatalog,
    /// Pipeline applied to raw tensors submitted by clients.
    pub detector: Detector,
    #[cfg(feature = "onnx")]
    pub onnx: Option<OnnxDetector>,
}

/// Detector configuration for a model: its embedded `detector` block or the
/// family default, with normalization taken from the input's mean/std when given.
pub fn detector_config(selection: &ModelSelection) -> DetectorConfig {
    let mut config = selection.metadata.detector.clone().unwrap_or_else(|| match selection.kind.as_str() {
        "lffd" => DetectorConfig::lffd(LffdVariant::default()),
        _ => DetectorConfig::retinaface(),
    });
    if let Some(spec) = selection.metadata.inputs.first() {
        let bgr = config.normalization.bgr;
        let mean = spec.mean.as_deref().and_then(|m| <[f32; 3]>::try_from(m).ok());
        let std = spec.std.as_deref().and_then(|s| <[f32; 3]>::try_from(s).ok());
        match (mean, std) {
            (Some(mean), Some(std)) => config.normalization = Normalization::from_mean_std(mean, std, bgr),
            (Some(mean), None) => config.normalization.mean = mean,
            (None, Some(std)) => {
                config.normalization = Normalization::from_mean_std(config.normalization.mean, std, bgr)
            }
            (None, None) => {}
        }
    }
    config
}

impl InferenceContext {
    pub fn new(models_dir: impl AsRef<Path>) -> Self {
        let selected = select_best_models(models_dir);
        if selected.detector().is_none() {
            warn!("event" = "models.missing", "message" = "no detector models found in models directory");
        }
        info!(
            "event" = "models.selected",
            has_retinaface = selected.retinaface.is_some(),
            has_lffd = selected.lffd.is_some()
        );

        let config = selected.detector().map(detector_config).unwrap_or_default();
        let detector = Detector::new(config).unwrap_or_else(|err| {
            warn!("event" = "detector.config_invalid", %err, "message" = "falling back to defaults");
            Detector::default()
        });
        info!("event" = "detector.ready", family = family_name(&detector.config().family));

        #[cfg(feature = "onnx")]
        let onnx = selected.detector().and_then(|sel| {
            let pipeline = Detector::new(detector.config().clone()).ok()?;
            match OnnxDetector::load(sel, pipeline) {
                Ok(det) => {
                    info!("event" = "onnx.session.ok", model = %sel.kind, version = %sel.version);
                    Some(det)
                }
                Err(err) => {
                    warn!("event" = "onnx.session.fail", model = %sel.kind, %err);
                    None
                }
            }
        });

        InferenceContext {
            selected_models: selected,
            detector,
            #[cfg(feature = "onnx")]
            onnx,
        }
    }

    /// Context with no model catalog, running the given pipeline.
    pub fn with_detector(detector: Detector) -> Self {
        InferenceContext {
            selected_models: SelectedCatalog::default(),
            detector,
            #[cfg(feature = "onnx")]
            onnx: None,
        }
    }
}

pub fn family_name(family: &DetectorFamily) -> &'static str {
    match family {
        DetectorFamily::RetinaFace { .. } => "retinaface",
        DetectorFamily::Lffd { .. } => "lffd",
    }
}
