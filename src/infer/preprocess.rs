use image::{imageops::FilterType, RgbImage};
use ndarray::Array3;
use serde::{Deserialize, Serialize};

/// Per-channel input normalization: `(pixel - mean[c]) * scale[c]`.
///
/// Channel indices refer to the tensor's channel order, which is BGR when
/// `bgr` is set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Normalization {
    pub mean: [f32; 3],
    pub scale: [f32; 3],
    pub bgr: bool,
}

impl Normalization {
    /// Mean subtraction only, BGR order.
    pub const fn retinaface() -> Self {
        Self { mean: [104.0, 117.0, 123.0], scale: [1.0; 3], bgr: true }
    }

    /// Maps `[0, 255]` to roughly `[-1, 1]`.
    pub const fn lffd() -> Self {
        Self { mean: [127.5; 3], scale: [0.0078125; 3], bgr: false }
    }

    /// Builds a normalization from a model's `mean`/`std` metadata, where
    /// `std` divides instead of multiplying.
    pub fn from_mean_std(mean: [f32; 3], std: [f32; 3], bgr: bool) -> Self {
        Self { mean, scale: std.map(|s| if s == 0.0 { 1.0 } else { 1.0 / s }), bgr }
    }
}

impl Default for Normalization {
    fn default() -> Self {
        Self::retinaface()
    }
}

/// Converts an RGB image into a normalized `[3, H, W]` tensor.
pub fn to_chw_tensor(image: &RgbImage, norm: &Normalization) -> Array3<f32> {
    let (w, h) = image.dimensions();
    Array3::from_shape_fn((3, h as usize, w as usize), |(c, y, x)| {
        let px = image.get_pixel(x as u32, y as u32);
        let src = if norm.bgr { 2 - c } else { c };
        (px[src] as f32 - norm.mean[c]) * norm.scale[c]
    })
}

pub fn resize(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    image::imageops::resize(image, width, height, FilterType::Triangle)
}
