//! Analytics Orchestrator
//!
//! Sequences one farm analysis: bounding box from the boundary ring, date
//! window, band retrieval from the provider, index statistics and
//! classification, moisture and irrigation advice, and the weighted overall
//! health score. Produces an immutable [`AnalyticsRecord`].

use chrono::{DateTime, Duration, NaiveDate, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::AnalyticsConfig;
use crate::error::{EngineError, Result};
use crate::metrics::{Timer, ANALYSES, ANALYSIS_FAILURES, ANALYSIS_LATENCY};
use crate::moisture::{
    estimate_moisture, irrigation_recommendation, round2, IrrigationRecommendation,
    MoistureEstimate,
};
use crate::vegetation::{
    classify_moisture, classify_vegetation, compute_ndmi, compute_ndvi, histogram, statistics,
    Histogram, IndexStatistics, MoistureClass, VegetationClass,
};

/// Allowed range for `lookback_days` and `interval_days`
pub const DAY_RANGE: std::ops::RangeInclusive<u32> = 1..=30;

/// History points carry an NDMI derived from NDVI by this factor
pub const NDMI_FROM_NDVI: f64 = 0.7;

// ============================================================================
// Geometry and time window
// ============================================================================

/// GeoJSON-style polygon; the first ring is the outer boundary of `[lon, lat]` pairs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FarmBoundary {
    pub coordinates: Vec<Vec<[f64; 2]>>,
}

impl FarmBoundary {
    pub fn from_ring(ring: Vec<[f64; 2]>) -> Self {
        Self {
            coordinates: vec![ring],
        }
    }

    pub fn outer_ring(&self) -> Result<&[[f64; 2]]> {
        match self.coordinates.first() {
            Some(ring) if !ring.is_empty() => Ok(ring),
            _ => Err(EngineError::InvalidRequest(
                "farm boundary has no coordinates".into(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn from_ring(ring: &[[f64; 2]]) -> Result<Self> {
        let first = ring.first().ok_or_else(|| {
            EngineError::InvalidRequest("cannot bound an empty coordinate ring".into())
        })?;

        let init = Self {
            min_lon: first[0],
            min_lat: first[1],
            max_lon: first[0],
            max_lat: first[1],
        };
        Ok(ring.iter().skip(1).fold(init, |b, &[lon, lat]| Self {
            min_lon: b.min_lon.min(lon),
            min_lat: b.min_lat.min(lat),
            max_lon: b.max_lon.max(lon),
            max_lat: b.max_lat.max(lat),
        }))
    }

    /// `[min_lon, min_lat, max_lon, max_lat]`
    pub fn to_array(&self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    /// `[target - lookback_days, target]`, with `target` defaulting to today (UTC)
    pub fn resolve(target: Option<NaiveDate>, lookback_days: u32) -> Self {
        let end = target.unwrap_or_else(|| Utc::now().date_naive());
        Self {
            start: end - Duration::days(i64::from(lookback_days)),
            end,
        }
    }
}

fn check_days(name: &str, days: u32) -> Result<()> {
    if DAY_RANGE.contains(&days) {
        Ok(())
    } else {
        Err(EngineError::InvalidRequest(format!(
            "{} must be within {}..={}, got {}",
            name,
            DAY_RANGE.start(),
            DAY_RANGE.end(),
            days
        )))
    }
}

// ============================================================================
// Band data provider contract
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BandRequest {
    pub bbox: BoundingBox,
    pub window: DateWindow,
    pub max_cloud_coverage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesRequest {
    pub bbox: BoundingBox,
    pub window: DateWindow,
    pub interval_days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionMetadata {
    pub provider: String,
    pub acquisition_date: Option<DateTime<Utc>>,
    /// Percentage, 0-100
    pub cloud_coverage: f64,
}

/// Spatially aligned reflectance grids; `NaN` marks cloud-masked pixels
#[derive(Debug, Clone)]
pub struct BandSet {
    pub nir: Array2<f64>,
    pub red: Array2<f64>,
    pub swir: Array2<f64>,
    pub metadata: AcquisitionMetadata,
}

/// NDVI aggregate for one interval of a time series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NdviSample {
    pub date: NaiveDate,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub std: Option<f64>,
}

/// Remote-sensing data source. Implementations report an empty window as
/// [`EngineError::NoData`] and transport failures as [`EngineError::Provider`].
pub trait BandDataProvider: Send + Sync {
    fn fetch_bands(&self, request: &BandRequest) -> impl Future<Output = Result<BandSet>> + Send;

    fn fetch_ndvi_timeseries(
        &self,
        request: &TimeSeriesRequest,
    ) -> impl Future<Output = Result<Vec<NdviSample>>> + Send;
}

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatelliteSource {
    pub provider: String,
    pub acquisition_date: Option<DateTime<Utc>>,
    pub cloud_coverage: f64,
    /// `[min_lon, min_lat, max_lon, max_lat]`
    pub bbox: [f64; 4],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NdviSummary {
    #[serde(flatten)]
    pub stats: IndexStatistics,
    pub histogram: Histogram,
    pub classification: VegetationClass,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NdmiSummary {
    #[serde(flatten)]
    pub stats: IndexStatistics,
    pub classification: MoistureClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Critical,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl HealthStatus {
    fn from_score(score: f64) -> Self {
        if score < 20.0 {
            HealthStatus::Critical
        } else if score < 40.0 {
            HealthStatus::Poor
        } else if score < 60.0 {
            HealthStatus::Fair
        } else if score < 80.0 {
            HealthStatus::Good
        } else {
            HealthStatus::Excellent
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            HealthStatus::Critical => "#DC143C",
            HealthStatus::Poor => "#FF8C00",
            HealthStatus::Fair => "#FFD700",
            HealthStatus::Good => "#32CD32",
            HealthStatus::Excellent => "#006400",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Critical => "Critical",
            HealthStatus::Poor => "Poor",
            HealthStatus::Fair => "Fair",
            HealthStatus::Good => "Good",
            HealthStatus::Excellent => "Excellent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallHealth {
    pub score: f64,
    pub status: HealthStatus,
    pub color: String,
    pub description: String,
}

/// Weighted score `(ndvi * 0.7 + ndmi * 0.3) * 100`, bucketed at 20/40/60/80
pub fn overall_health(ndvi_mean: f64, ndmi_mean: f64) -> OverallHealth {
    let score = (ndvi_mean * 0.7 + ndmi_mean * 0.3) * 100.0;
    let status = HealthStatus::from_score(score);
    OverallHealth {
        score: round2(score),
        status,
        color: status.color().to_string(),
        description: format!(
            "Farm health is {} based on vegetation and moisture indices",
            status.as_str().to_lowercase()
        ),
    }
}

/// One complete analysis. Never mutated; a new run yields a new record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub analysis_date: NaiveDate,
    pub satellite_data: SatelliteSource,
    pub ndvi: NdviSummary,
    pub ndmi: NdmiSummary,
    pub soil_moisture: MoistureEstimate,
    pub irrigation: IrrigationRecommendation,
    pub overall_health: OverallHealth,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub date: NaiveDate,
    pub ndvi: NdviSample,
    /// Derived from NDVI, not measured
    pub ndmi_mean_estimated: f64,
    pub health_status: String,
}

// ============================================================================
// Processor
// ============================================================================

pub struct AnalyticsProcessor<P> {
    provider: P,
    config: AnalyticsConfig,
}

impl<P: BandDataProvider> AnalyticsProcessor<P> {
    pub fn new(provider: P, config: AnalyticsConfig) -> Self {
        Self { provider, config }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Run one farm analysis. `lookback_days` defaults to the configured window.
    pub async fn analyze(
        &self,
        boundary: &FarmBoundary,
        target_date: Option<NaiveDate>,
        lookback_days: Option<u32>,
    ) -> Result<AnalyticsRecord> {
        ANALYSES.inc();
        let timer = Timer::new();

        let result = self.run_analysis(boundary, target_date, lookback_days).await;
        timer.observe_duration_seconds(&ANALYSIS_LATENCY);

        match &result {
            Ok(record) => info!(
                analysis_id = %record.id,
                score = record.overall_health.score,
                status = record.overall_health.status.as_str(),
                latency_ms = timer.elapsed_ms(),
                "Farm analysis complete"
            ),
            Err(e) => {
                ANALYSIS_FAILURES.inc();
                error!(
                    error = %e,
                    orchestration = e.is_orchestration_failure(),
                    "Farm analysis failed"
                );
            }
        }
        result
    }

    async fn run_analysis(
        &self,
        boundary: &FarmBoundary,
        target_date: Option<NaiveDate>,
        lookback_days: Option<u32>,
    ) -> Result<AnalyticsRecord> {
        let lookback_days = lookback_days.unwrap_or(self.config.default_lookback_days);
        check_days("lookback_days", lookback_days)?;

        let bbox = BoundingBox::from_ring(boundary.outer_ring()?)?;
        let window = DateWindow::resolve(target_date, lookback_days);
        info!(
            bbox = ?bbox.to_array(),
            start = %window.start,
            end = %window.end,
            "Retrieving satellite bands"
        );

        let request = BandRequest {
            bbox,
            window,
            max_cloud_coverage: self.config.max_cloud_coverage,
        };
        let bands = self.provider.fetch_bands(&request).await?;

        let ndvi = compute_ndvi(&bands.nir, &bands.red)?;
        let ndmi = compute_ndmi(&bands.nir, &bands.swir)?;
        let ndvi_stats = statistics(&ndvi);
        let ndmi_stats = statistics(&ndmi);

        let (Some(ndvi_mean), Some(ndmi_mean)) = (ndvi_stats.mean, ndmi_stats.mean) else {
            return Err(EngineError::NoData(format!(
                "no valid pixels between {} and {} (ndvi: {}, ndmi: {})",
                window.start, window.end, ndvi_stats.count, ndmi_stats.count
            )));
        };

        Ok(AnalyticsRecord {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            analysis_date: window.end,
            satellite_data: SatelliteSource {
                provider: bands.metadata.provider,
                acquisition_date: bands.metadata.acquisition_date,
                cloud_coverage: bands.metadata.cloud_coverage,
                bbox: bbox.to_array(),
            },
            ndvi: NdviSummary {
                histogram: histogram(&ndvi, self.config.histogram_bins),
                classification: classify_vegetation(ndvi_mean),
                stats: ndvi_stats,
            },
            ndmi: NdmiSummary {
                classification: classify_moisture(ndmi_mean),
                stats: ndmi_stats,
            },
            soil_moisture: estimate_moisture(ndmi_mean),
            irrigation: irrigation_recommendation(ndmi_mean, ndvi_mean),
            overall_health: overall_health(ndvi_mean, ndmi_mean),
        })
    }

    /// NDVI history between two dates. Intervals without valid NDVI are skipped.
    pub async fn history(
        &self,
        boundary: &FarmBoundary,
        start: NaiveDate,
        end: NaiveDate,
        interval_days: Option<u32>,
    ) -> Result<Vec<HistoryPoint>> {
        let interval_days = interval_days.unwrap_or(self.config.history_interval_days);
        check_days("interval_days", interval_days)?;
        if end < start {
            return Err(EngineError::InvalidRequest(format!(
                "end date {} is before start date {}",
                end, start
            )));
        }

        let bbox = BoundingBox::from_ring(boundary.outer_ring()?)?;
        let request = TimeSeriesRequest {
            bbox,
            window: DateWindow { start, end },
            interval_days,
        };

        let samples = self
            .provider
            .fetch_ndvi_timeseries(&request)
            .await
            .inspect_err(|e| warn!(error = %e, "NDVI time series retrieval failed"))?;

        let points: Vec<HistoryPoint> = samples
            .into_iter()
            .filter_map(|sample| {
                let mean = sample.mean?;
                Some(HistoryPoint {
                    date: sample.date,
                    ndmi_mean_estimated: mean * NDMI_FROM_NDVI,
                    health_status: classify_vegetation(mean).health,
                    ndvi: sample,
                })
            })
            .collect();

        info!(points = points.len(), start = %start, end = %end, "NDVI history assembled");
        Ok(points)
    }
}
