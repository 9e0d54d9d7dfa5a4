//! Vegetation Index Calculator
//!
//! Normalized-difference indices over spectral band grids, their summary
//! statistics and histogram, and the rule tables that turn a mean index value
//! into a vegetation or moisture category. Undefined pixels are `NaN`
//! throughout and never enter a statistic.

use image::{Rgb, RgbImage};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// A derived index grid with values in [-1, 1]; `NaN` marks undefined pixels
#[derive(Debug, Clone, PartialEq)]
pub struct IndexArray(Array2<f64>);

impl IndexArray {
    /// Wrap raw values, clipping defined ones into [-1, 1]
    pub fn new(values: Array2<f64>) -> Self {
        Self(values.mapv(|v| if v.is_nan() { v } else { v.clamp(-1.0, 1.0) }))
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.0
    }

    pub fn dim(&self) -> (usize, usize) {
        self.0.dim()
    }

    /// Defined pixels in row-major order
    pub fn valid(&self) -> Vec<f64> {
        self.0.iter().copied().filter(|v| !v.is_nan()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Ndvi,
    Ndmi,
}

/// `(a - b) / (a + b)` per pixel, undefined where the denominator is zero
fn normalized_difference(a: &Array2<f64>, b: &Array2<f64>, names: (&str, &str)) -> Result<IndexArray> {
    if a.dim() != b.dim() {
        return Err(EngineError::InvalidBands(format!(
            "{} band is {:?} but {} band is {:?}",
            names.0,
            a.dim(),
            names.1,
            b.dim()
        )));
    }

    let values = Zip::from(a).and(b).map_collect(|&x, &y| {
        let denominator = x + y;
        if denominator == 0.0 {
            f64::NAN
        } else {
            (x - y) / denominator
        }
    });
    Ok(IndexArray::new(values))
}

/// NDVI = (NIR - RED) / (NIR + RED)
pub fn compute_ndvi(nir: &Array2<f64>, red: &Array2<f64>) -> Result<IndexArray> {
    normalized_difference(nir, red, ("NIR", "RED"))
}

/// NDMI = (NIR - SWIR) / (NIR + SWIR)
pub fn compute_ndmi(nir: &Array2<f64>, swir: &Array2<f64>) -> Result<IndexArray> {
    normalized_difference(nir, swir, ("NIR", "SWIR"))
}

// ============================================================================
// Statistics
// ============================================================================

/// Summary over defined pixels. Every field is `None` when `count` is 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStatistics {
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Population standard deviation
    pub std: Option<f64>,
    pub percentile_25: Option<f64>,
    pub percentile_50: Option<f64>,
    pub percentile_75: Option<f64>,
    pub count: usize,
}

pub fn statistics(index: &IndexArray) -> IndexStatistics {
    let mut valid = index.valid();
    if valid.is_empty() {
        return IndexStatistics::default();
    }
    valid.sort_by(f64::total_cmp);

    let n = valid.len() as f64;
    let mean = valid.iter().sum::<f64>() / n;
    let variance = valid.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    IndexStatistics {
        mean: Some(mean),
        min: valid.first().copied(),
        max: valid.last().copied(),
        std: Some(variance.sqrt()),
        percentile_25: Some(percentile(&valid, 25.0)),
        percentile_50: Some(percentile(&valid, 50.0)),
        percentile_75: Some(percentile(&valid, 75.0)),
        count: valid.len(),
    }
}

/// Linear interpolation between order statistics; `sorted` must be non-empty
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

// ============================================================================
// Histogram
// ============================================================================

/// `bins` holds the `counts.len() + 1` bin edges
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub bins: Vec<f64>,
    pub counts: Vec<u64>,
}

/// Equal-width bins over [-1, 1]. Bin `i` covers `[bins[i], bins[i + 1])`;
/// the last bin is closed on the right.
pub fn histogram(index: &IndexArray, bin_count: usize) -> Histogram {
    let valid = index.valid();
    if valid.is_empty() || bin_count == 0 {
        return Histogram::default();
    }

    let (lo, hi) = (-1.0f64, 1.0f64);
    let width = (hi - lo) / bin_count as f64;
    let bins: Vec<f64> = (0..=bin_count)
        .map(|i| if i == bin_count { hi } else { lo + width * i as f64 })
        .collect();

    let mut counts = vec![0u64; bin_count];
    for v in valid {
        if !(lo..=hi).contains(&v) {
            continue;
        }
        // The division can round across an edge; the stored edges decide
        let mut slot = (((v - lo) / width) as usize).min(bin_count - 1);
        while slot > 0 && v < bins[slot] {
            slot -= 1;
        }
        while slot + 1 < bin_count && v >= bins[slot + 1] {
            slot += 1;
        }
        counts[slot] += 1;
    }

    Histogram { bins, counts }
}

// ============================================================================
// Classification
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VegetationClass {
    pub category: String,
    pub health: String,
    pub color: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoistureClass {
    pub category: String,
    pub moisture_level: String,
    pub color: String,
    pub description: String,
}

pub fn classify_vegetation(mean_ndvi: f64) -> VegetationClass {
    let (category, health, color, description) = if mean_ndvi < 0.0 {
        ("Water/Bare Soil", "N/A", "#8B4513", "Non-vegetated area")
    } else if mean_ndvi < 0.2 {
        ("Sparse Vegetation", "Poor", "#FFD700", "Very low vegetation density")
    } else if mean_ndvi < 0.4 {
        ("Moderate Vegetation", "Fair", "#ADFF2F", "Moderate vegetation health")
    } else if mean_ndvi < 0.6 {
        ("Healthy Vegetation", "Good", "#32CD32", "Good vegetation health")
    } else {
        ("Very Healthy Vegetation", "Excellent", "#006400", "Excellent vegetation health")
    };

    VegetationClass {
        category: category.to_string(),
        health: health.to_string(),
        color: color.to_string(),
        description: description.to_string(),
    }
}

pub fn classify_moisture(mean_ndmi: f64) -> MoistureClass {
    let (category, moisture_level, color, description) = if mean_ndmi < -0.2 {
        ("Very Dry", "Critical", "#8B0000", "Severe water stress")
    } else if mean_ndmi < 0.0 {
        ("Dry", "Low", "#FF4500", "Water stress present")
    } else if mean_ndmi < 0.2 {
        ("Moderate Moisture", "Moderate", "#FFD700", "Adequate moisture")
    } else if mean_ndmi < 0.4 {
        ("Moist", "Good", "#00CED1", "Good moisture content")
    } else {
        ("Very Moist", "High", "#0000CD", "High moisture content")
    };

    MoistureClass {
        category: category.to_string(),
        moisture_level: moisture_level.to_string(),
        color: color.to_string(),
        description: description.to_string(),
    }
}

/// Render an index grid for display: NDVI on a red-to-green scale, NDMI on a
/// red-to-blue scale. Undefined pixels are black.
pub fn render_color_map(index: &IndexArray, kind: IndexKind) -> RgbImage {
    let (rows, cols) = index.dim();
    let values = index.values();

    RgbImage::from_fn(cols as u32, rows as u32, |x, y| {
        let v = values[[y as usize, x as usize]];
        if v.is_nan() {
            return Rgb([0, 0, 0]);
        }
        let n = ((v + 1.0) / 2.0 * 255.0) as u8;
        match kind {
            IndexKind::Ndvi => Rgb([255 - n, n, 0]),
            IndexKind::Ndmi => Rgb([255 - n, 0, n]),
        }
    })
}
