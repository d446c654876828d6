use thiserror::Error;

pub type Result<T> = std::result::Result<T, DetectError>;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("failed to load model {path}: {reason}")]
    ModelLoad { path: String, reason: String },

    #[error("{tensor} tensor has {actual} values, expected {expected}")]
    ShapeMismatch {
        tensor: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("input dimensions must be non-zero, got {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("invalid detector configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to decode image: {0}")]
    ImageDecode(String),

    #[error("inference failed: {0}")]
    Inference(String),
}

impl DetectError {
    /// Short machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            DetectError::ModelLoad { .. } => "model-load",
            DetectError::ShapeMismatch { .. } => "shape-mismatch",
            DetectError::InvalidDimensions { .. } => "invalid-dimensions",
            DetectError::InvalidConfig(_) => "invalid-config",
            DetectError::ImageDecode(_) => "image-decode",
            DetectError::Inference(_) => "inference",
        }
    }
}

/// Checks a flat tensor against the record count it must carry.
pub(crate) fn expect_len(
    tensor: &'static str,
    values: &[f32],
    records: usize,
    stride: usize,
) -> Result<()> {
    match records.checked_mul(stride) {
        Some(expected) if expected == values.len() => Ok(()),
        expected => Err(DetectError::ShapeMismatch {
            tensor,
            expected: expected.unwrap_or(usize::MAX),
            actual: values.len(),
        }),
    }
}
