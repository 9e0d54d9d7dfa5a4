use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::classifier::ClassifierId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,
    pub model_config: ModelConfig,
    pub analytics_config: AnalyticsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_dir: PathBuf,
    pub plantdoc_path: PathBuf,
    pub maize_path: PathBuf,
    pub rice_path: PathBuf,
    pub legacy_path: PathBuf,
    pub legacy_labels_path: PathBuf,
    pub auto_download: bool,
    pub preload: bool,
    pub intra_threads: usize,
    pub sources: Vec<ModelSource>,
}

/// Where a classifier's weights can be fetched from and how to verify them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSource {
    pub classifier: ClassifierId,
    pub url: Option<String>,
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    pub default_lookback_days: u32,
    pub max_cloud_coverage: f64,
    pub histogram_bins: usize,
    pub history_interval_days: u32,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            default_lookback_days: 10,
            max_cloud_coverage: 20.0,
            histogram_bins: 20,
            history_interval_days: 5,
        }
    }
}

impl AnalyticsConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=30).contains(&self.default_lookback_days) {
            return Err(anyhow::anyhow!(
                "ANALYTICS_LOOKBACK_DAYS must be within 1..=30, got {}",
                self.default_lookback_days
            ));
        }
        if !(1..=30).contains(&self.history_interval_days) {
            return Err(anyhow::anyhow!(
                "HISTORY_INTERVAL_DAYS must be within 1..=30, got {}",
                self.history_interval_days
            ));
        }
        if !(0.0..=100.0).contains(&self.max_cloud_coverage) {
            return Err(anyhow::anyhow!(
                "MAX_CLOUD_COVERAGE must be a percentage, got {}",
                self.max_cloud_coverage
            ));
        }
        if self.histogram_bins == 0 {
            return Err(anyhow::anyhow!("NDVI_HISTOGRAM_BINS must be positive"));
        }
        Ok(())
    }
}

impl ModelConfig {
    /// Default layout: every weight file lives directly under `model_dir`
    pub fn with_model_dir(model_dir: impl Into<PathBuf>) -> Self {
        let model_dir = model_dir.into();
        Self {
            plantdoc_path: model_dir.join("plantdoc_resnet50.onnx"),
            maize_path: model_dir.join("maize_resnet50.onnx"),
            rice_path: model_dir.join("rice_resnet50.onnx"),
            legacy_path: model_dir.join("pest_model.onnx"),
            legacy_labels_path: model_dir.join("pest_model.labels.txt"),
            model_dir,
            auto_download: false,
            preload: false,
            intra_threads: 4,
            sources: Vec::new(),
        }
    }

    pub fn weights_path(&self, id: ClassifierId) -> &PathBuf {
        match id {
            ClassifierId::PlantDoc => &self.plantdoc_path,
            ClassifierId::Maize => &self.maize_path,
            ClassifierId::Rice => &self.rice_path,
            ClassifierId::LegacyPest => &self.legacy_path,
        }
    }

    pub fn source(&self, id: ClassifierId) -> Option<&ModelSource> {
        self.sources.iter().find(|s| s.classifier == id)
    }
}

fn env_path(key: &str, default: PathBuf) -> PathBuf {
    env::var(key).map(PathBuf::from).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn load() -> Result<Self> {
        let api_host = env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let api_port = env_parse("API_PORT", 8090u16);

        // Model weights
        let model_dir = env_path("MODEL_DIR", PathBuf::from("models"));
        let defaults = ModelConfig::with_model_dir(&model_dir);

        let sources = ClassifierId::ALL
            .iter()
            .filter_map(|&id| {
                let prefix = id.env_prefix();
                let url = env::var(format!("{}_MODEL_URL", prefix)).ok();
                let sha256 = env::var(format!("{}_MODEL_SHA256", prefix)).ok();
                if url.is_none() && sha256.is_none() {
                    None
                } else {
                    Some(ModelSource {
                        classifier: id,
                        url,
                        sha256,
                    })
                }
            })
            .collect();

        let model_config = ModelConfig {
            plantdoc_path: env_path("PLANTDOC_MODEL_PATH", defaults.plantdoc_path),
            maize_path: env_path("MAIZE_MODEL_PATH", defaults.maize_path),
            rice_path: env_path("RICE_MODEL_PATH", defaults.rice_path),
            legacy_path: env_path("LEGACY_MODEL_PATH", defaults.legacy_path),
            legacy_labels_path: env_path("LEGACY_LABELS_PATH", defaults.legacy_labels_path),
            model_dir,
            auto_download: env_parse("MODEL_AUTO_DOWNLOAD", false),
            preload: env_parse("MODEL_PRELOAD", false),
            intra_threads: env_parse("ORT_INTRA_THREADS", 4usize).max(1),
            sources,
        };

        // Satellite analytics
        let fallback = AnalyticsConfig::default();
        let analytics_config = AnalyticsConfig {
            default_lookback_days: env_parse("ANALYTICS_LOOKBACK_DAYS", fallback.default_lookback_days),
            max_cloud_coverage: env_parse("MAX_CLOUD_COVERAGE", fallback.max_cloud_coverage),
            histogram_bins: env_parse("NDVI_HISTOGRAM_BINS", fallback.histogram_bins),
            history_interval_days: env_parse("HISTORY_INTERVAL_DAYS", fallback.history_interval_days),
        };
        analytics_config.validate()?;

        Ok(Self {
            api_host,
            api_port,
            model_config,
            analytics_config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "API_PORT",
        "MODEL_DIR",
        "MAIZE_MODEL_PATH",
        "RICE_MODEL_URL",
        "RICE_MODEL_SHA256",
        "MODEL_PRELOAD",
        "ANALYTICS_LOOKBACK_DAYS",
        "NDVI_HISTOGRAM_BINS",
    ];

    fn clear_env() {
        for key in KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = Config::load().unwrap();

        assert_eq!(config.api_port, 8090);
        assert_eq!(config.model_config.model_dir, PathBuf::from("models"));
        assert_eq!(
            config.model_config.rice_path,
            PathBuf::from("models/rice_resnet50.onnx")
        );
        assert!(!config.model_config.preload);
        assert!(config.model_config.sources.is_empty());
        assert_eq!(config.analytics_config.default_lookback_days, 10);
        assert_eq!(config.analytics_config.histogram_bins, 20);
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear_env();
        env::set_var("MODEL_DIR", "/opt/weights");
        env::set_var("MAIZE_MODEL_PATH", "/srv/maize.onnx");
        env::set_var("RICE_MODEL_URL", "https://example.org/rice.onnx");
        env::set_var("MODEL_PRELOAD", "true");
        env::set_var("API_PORT", "not-a-port");

        let config = Config::load().unwrap();
        clear_env();

        assert_eq!(config.api_port, 8090);
        assert!(config.model_config.preload);
        assert_eq!(
            config.model_config.plantdoc_path,
            PathBuf::from("/opt/weights/plantdoc_resnet50.onnx")
        );
        assert_eq!(
            config.model_config.weights_path(ClassifierId::Maize),
            &PathBuf::from("/srv/maize.onnx")
        );
        let rice = config.model_config.source(ClassifierId::Rice).unwrap();
        assert_eq!(rice.url.as_deref(), Some("https://example.org/rice.onnx"));
        assert!(rice.sha256.is_none());
    }

    #[test]
    #[serial]
    fn test_rejects_out_of_range_lookback() {
        clear_env();
        env::set_var("ANALYTICS_LOOKBACK_DAYS", "45");
        let result = Config::load();
        clear_env();
        assert!(result.is_err());
    }
}
