//! Model-specific preprocessing
//!
//! Each classifier fixes one transform: resize, then either ImageNet
//! normalization into an NCHW tensor, plain [0,1] scaling into an NCHW tensor,
//! or a flat HWC row vector for non-convolutional models.

use image::imageops::{self, FilterType};
use ndarray::{Array2, Array4};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::image_input::DecodedImage;

/// ImageNet normalization mean (RGB order)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet normalization standard deviation (RGB order)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Preprocessing {
    /// Resize, scale to [0,1], then `(v - mean) / std` per channel
    Normalized {
        width: u32,
        height: u32,
        mean: [f32; 3],
        std: [f32; 3],
    },
    /// Resize and scale to [0,1]
    Scaled { width: u32, height: u32 },
    /// Resize, scale to [0,1] and flatten in HWC order into a single row
    Flattened { width: u32, height: u32 },
}

impl Preprocessing {
    pub fn imagenet(size: u32) -> Self {
        Preprocessing::Normalized {
            width: size,
            height: size,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match *self {
            Preprocessing::Normalized { width, height, .. }
            | Preprocessing::Scaled { width, height }
            | Preprocessing::Flattened { width, height } => (width, height),
        }
    }

    pub fn apply(&self, image: &DecodedImage) -> Result<ModelInput> {
        let (width, height) = self.dimensions();
        if width == 0 || height == 0 {
            return Err(EngineError::Config(format!(
                "invalid preprocessing size {}x{}",
                width, height
            )));
        }
        if image.width() == 0 || image.height() == 0 {
            return Err(EngineError::Decode("image has no pixels".into()));
        }

        let resized = imageops::resize(image.pixels(), width, height, FilterType::Triangle);
        let (w, h) = (width as usize, height as usize);

        match *self {
            Preprocessing::Flattened { .. } => {
                let data: Vec<f32> = resized
                    .as_raw()
                    .iter()
                    .map(|&v| v as f32 / 255.0)
                    .collect();
                let flat = Array2::from_shape_vec((1, h * w * 3), data)
                    .map_err(|e| EngineError::Internal(e.to_string()))?;
                Ok(ModelInput::Flat(flat))
            }
            Preprocessing::Scaled { .. } => {
                let tensor = Array4::from_shape_fn((1, 3, h, w), |(_, c, y, x)| {
                    resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
                });
                Ok(ModelInput::Tensor(tensor))
            }
            Preprocessing::Normalized { mean, std, .. } => {
                let tensor = Array4::from_shape_fn((1, 3, h, w), |(_, c, y, x)| {
                    let v = resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
                    (v - mean[c]) / std[c]
                });
                Ok(ModelInput::Tensor(tensor))
            }
        }
    }
}

/// Model-ready input produced by a [`Preprocessing`] transform
#[derive(Debug, Clone)]
pub enum ModelInput {
    /// `[1, 3, H, W]`
    Tensor(Array4<f32>),
    /// `[1, H * W * 3]`
    Flat(Array2<f32>),
}

impl ModelInput {
    pub fn shape(&self) -> Vec<usize> {
        match self {
            ModelInput::Tensor(t) => t.shape().to_vec(),
            ModelInput::Flat(f) => f.shape().to_vec(),
        }
    }
}

/// Softmax function for converting logits to probabilities.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max_val = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exp_vals: Vec<f32> = logits.iter().map(|x| (x - max_val).exp()).collect();
    let sum: f32 = exp_vals.iter().sum();
    exp_vals.iter().map(|x| x / sum).collect()
}
