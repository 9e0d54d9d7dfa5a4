use std::sync::Mutex;

use chrono::{NaiveDate, TimeZone, Utc};
use ndarray::Array2;

use crop_health_engine::analytics::{AcquisitionMetadata, HealthStatus, NdviSample};
use crop_health_engine::config::AnalyticsConfig;
use crop_health_engine::moisture::Priority;
use crop_health_engine::{
    AnalyticsProcessor, BandDataProvider, BandRequest, BandSet, EngineError, FarmBoundary, Result,
    TimeSeriesRequest,
};

enum Scenario {
    Bands(BandSet),
    ProviderDown,
    Empty,
}

/// Band provider serving canned data and recording requests
struct InMemoryProvider {
    scenario: Scenario,
    samples: Vec<NdviSample>,
    requests: Mutex<Vec<BandRequest>>,
    series_requests: Mutex<Vec<TimeSeriesRequest>>,
}

impl InMemoryProvider {
    fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            samples: Vec::new(),
            requests: Mutex::new(Vec::new()),
            series_requests: Mutex::new(Vec::new()),
        }
    }

    fn with_samples(mut self, samples: Vec<NdviSample>) -> Self {
        self.samples = samples;
        self
    }
}

impl BandDataProvider for InMemoryProvider {
    async fn fetch_bands(&self, request: &BandRequest) -> Result<BandSet> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.scenario {
            Scenario::Bands(bands) => Ok(bands.clone()),
            Scenario::ProviderDown => Err(EngineError::Provider("upstream returned 503".into())),
            Scenario::Empty => Err(EngineError::NoData("no scenes in window".into())),
        }
    }

    async fn fetch_ndvi_timeseries(&self, request: &TimeSeriesRequest) -> Result<Vec<NdviSample>> {
        self.series_requests.lock().unwrap().push(request.clone());
        Ok(self.samples.clone())
    }
}

fn metadata() -> AcquisitionMetadata {
    AcquisitionMetadata {
        provider: "SentinelHub".to_string(),
        acquisition_date: Some(Utc.with_ymd_and_hms(2024, 6, 12, 8, 30, 0).unwrap()),
        cloud_coverage: 7.5,
    }
}

/// NDVI = 0.5 / 0.7 and NDMI = 0.4 / 0.8 on every defined pixel; one cloud pixel
fn healthy_bands() -> BandSet {
    let mut nir = Array2::from_elem((4, 4), 0.6);
    nir[[2, 3]] = f64::NAN;
    BandSet {
        nir,
        red: Array2::from_elem((4, 4), 0.1),
        swir: Array2::from_elem((4, 4), 0.2),
        metadata: metadata(),
    }
}

fn boundary() -> FarmBoundary {
    FarmBoundary::from_ring(vec![
        [36.80, -1.30],
        [36.83, -1.30],
        [36.83, -1.27],
        [36.80, -1.27],
        [36.80, -1.30],
    ])
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn processor(scenario: Scenario) -> AnalyticsProcessor<InMemoryProvider> {
    AnalyticsProcessor::new(InMemoryProvider::new(scenario), AnalyticsConfig::default())
}

#[tokio::test]
async fn test_full_analysis_record() {
    let processor = processor(Scenario::Bands(healthy_bands()));

    let record = processor
        .analyze(&boundary(), Some(date(2024, 6, 15)), None)
        .await
        .unwrap();

    assert_eq!(record.analysis_date, date(2024, 6, 15));
    assert_eq!(record.satellite_data.provider, "SentinelHub");
    assert_eq!(record.satellite_data.cloud_coverage, 7.5);
    assert_eq!(record.satellite_data.bbox, [36.80, -1.30, 36.83, -1.27]);

    assert_eq!(record.ndvi.stats.count, 15);
    assert!((record.ndvi.stats.mean.unwrap() - 0.5 / 0.7).abs() < 1e-9);
    assert!(record.ndvi.stats.std.unwrap() < 1e-12);
    assert_eq!(record.ndvi.histogram.counts.len(), 20);
    assert_eq!(record.ndvi.histogram.counts.iter().sum::<u64>(), 15);
    assert_eq!(record.ndvi.classification.category, "Very Healthy Vegetation");

    assert_eq!(record.ndmi.stats.count, 15);
    assert_eq!(record.ndmi.classification.category, "Very Moist");
    assert_eq!(record.soil_moisture.moisture_percentage, 80.0);
    assert_eq!(record.irrigation.priority, Priority::Low);
    assert_eq!(record.irrigation.recommendation, "No irrigation needed");

    assert_eq!(record.overall_health.status, HealthStatus::Good);
    assert_eq!(record.overall_health.score, 65.0);

    let requests = processor.provider().requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].window.start, date(2024, 6, 5));
    assert_eq!(requests[0].window.end, date(2024, 6, 15));
    assert_eq!(requests[0].max_cloud_coverage, 20.0);
}

#[tokio::test]
async fn test_each_analysis_is_a_new_record() {
    let processor = processor(Scenario::Bands(healthy_bands()));

    let first = processor.analyze(&boundary(), None, Some(3)).await.unwrap();
    let second = processor.analyze(&boundary(), None, Some(3)).await.unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(first.ndvi, second.ndvi);
}

#[tokio::test]
async fn test_record_serializes_flat_statistics() {
    let record = processor(Scenario::Bands(healthy_bands()))
        .analyze(&boundary(), Some(date(2024, 6, 15)), None)
        .await
        .unwrap();

    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["ndvi"]["count"], 15);
    assert!(json["ndvi"]["percentile_75"].is_number());
    assert_eq!(json["ndmi"]["classification"]["moisture_level"], "High");
    assert_eq!(json["overall_health"]["status"], "Good");
    assert_eq!(json["analysis_date"], "2024-06-15");
}

#[tokio::test]
async fn test_provider_failure_aborts_analysis() {
    let processor = processor(Scenario::ProviderDown);

    let err = processor.analyze(&boundary(), None, None).await.unwrap_err();

    assert!(matches!(err, EngineError::Provider(_)));
    assert!(err.is_orchestration_failure());
}

#[tokio::test]
async fn test_missing_scenes_are_reported() {
    let err = processor(Scenario::Empty)
        .analyze(&boundary(), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NoData(_)));
}

#[tokio::test]
async fn test_fully_masked_bands_are_no_data() {
    let bands = BandSet {
        nir: Array2::from_elem((3, 3), f64::NAN),
        red: Array2::from_elem((3, 3), 0.1),
        swir: Array2::from_elem((3, 3), 0.2),
        metadata: metadata(),
    };

    let err = processor(Scenario::Bands(bands))
        .analyze(&boundary(), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NoData(_)));
}

#[tokio::test]
async fn test_misaligned_bands_are_rejected() {
    let mut bands = healthy_bands();
    bands.swir = Array2::from_elem((2, 2), 0.2);

    let err = processor(Scenario::Bands(bands))
        .analyze(&boundary(), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidBands(_)));
}

#[tokio::test]
async fn test_request_validation() {
    let processor = processor(Scenario::Bands(healthy_bands()));

    let err = processor.analyze(&boundary(), None, Some(0)).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));
    let err = processor.analyze(&boundary(), None, Some(31)).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));

    let empty = FarmBoundary {
        coordinates: Vec::new(),
    };
    let err = processor.analyze(&empty, None, None).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));

    assert!(processor.provider().requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_history_skips_empty_intervals() {
    let samples = vec![
        NdviSample {
            date: date(2024, 5, 1),
            mean: Some(0.5),
            min: Some(0.2),
            max: Some(0.8),
            std: Some(0.1),
        },
        NdviSample {
            date: date(2024, 5, 6),
            mean: None,
            min: None,
            max: None,
            std: None,
        },
        NdviSample {
            date: date(2024, 5, 11),
            mean: Some(0.1),
            min: Some(0.0),
            max: Some(0.3),
            std: Some(0.05),
        },
    ];
    let processor = AnalyticsProcessor::new(
        InMemoryProvider::new(Scenario::Empty).with_samples(samples),
        AnalyticsConfig::default(),
    );

    let points = processor
        .history(&boundary(), date(2024, 5, 1), date(2024, 5, 15), None)
        .await
        .unwrap();

    assert_eq!(points.len(), 2);
    assert_eq!(points[0].health_status, "Good");
    assert!((points[0].ndmi_mean_estimated - 0.35).abs() < 1e-12);
    assert_eq!(points[1].date, date(2024, 5, 11));
    assert_eq!(points[1].health_status, "Poor");

    let requests = processor.provider().series_requests.lock().unwrap();
    assert_eq!(requests[0].interval_days, 5);
}

#[tokio::test]
async fn test_history_rejects_inverted_range() {
    let processor = processor(Scenario::Empty);

    let err = processor
        .history(&boundary(), date(2024, 5, 15), date(2024, 5, 1), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));

    let err = processor
        .history(&boundary(), date(2024, 5, 1), date(2024, 5, 15), Some(45))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidRequest(_)));
}
