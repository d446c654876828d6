//! Anchor-based face detection post-processing: anchor grids, SSD box decoding,
//! score filtering and non-maximum suppression, with an LFFD receptive-field
//! decoder and an HTTP service around the pipeline.

pub mod error;
pub mod infer;
pub mod inference;
pub mod models;
pub mod protocol;
pub mod server;

pub use error::{DetectError, Result};
pub use infer::{Detection, Detector, DetectorConfig, OverlapMetric, Point};
