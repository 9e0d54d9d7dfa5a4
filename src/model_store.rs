//! Model weights store
//!
//! Resolves where each classifier's weights live, fetches missing files from
//! their configured URL at startup, and verifies SHA-256 digests so corrupt
//! weights fail only the classifier they belong to.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{error, info, warn};

use crate::classifier::ClassifierId;
use crate::config::ModelConfig;
use crate::error::{EngineError, Result};

/// Maximum model size to auto-download (ResNet-50 exports are ~100MB)
pub const MAX_AUTO_DOWNLOAD_SIZE: u64 = 256 * 1024 * 1024;

/// Outcome of one startup download attempt
#[derive(Debug, Clone, Serialize)]
pub struct DownloadOutcome {
    pub model: ClassifierId,
    pub success: bool,
    pub message: String,
}

/// Download configured weights that are not present yet.
/// Classifiers without a source URL are skipped.
pub async fn ensure_models_downloaded(config: &ModelConfig) -> Vec<DownloadOutcome> {
    let mut results = Vec::new();

    if let Err(e) = tokio::fs::create_dir_all(&config.model_dir).await {
        warn!(dir = ?config.model_dir, error = %e, "Could not create model directory");
    }

    for id in ClassifierId::ALL {
        let Some(source) = config.source(id) else {
            continue;
        };
        let Some(url) = source.url.as_deref() else {
            continue;
        };
        let model_path = config.weights_path(id);

        if model_path.exists() {
            info!(model = %id, path = ?model_path, "Model weights already present");
            results.push(DownloadOutcome {
                model: id,
                success: true,
                message: "Already exists".to_string(),
            });
            continue;
        }

        info!(model = %id, url = %url, "Downloading model weights");

        let outcome = match download_model(url, model_path).await {
            Ok(size) => match source.sha256.as_deref() {
                Some(expected) => match verify_checksum(model_path, expected) {
                    Ok(()) => Ok(size),
                    Err(e) => {
                        let _ = tokio::fs::remove_file(model_path).await;
                        Err(e.to_string())
                    }
                },
                None => Ok(size),
            },
            Err(e) => Err(e.to_string()),
        };

        match outcome {
            Ok(size) => {
                info!(model = %id, bytes = size, path = ?model_path, "Model weights downloaded");
                results.push(DownloadOutcome {
                    model: id,
                    success: true,
                    message: format!("Downloaded {} bytes", size),
                });
            }
            Err(message) => {
                error!(model = %id, error = %message, "Model download failed");
                results.push(DownloadOutcome {
                    model: id,
                    success: false,
                    message,
                });
            }
        }
    }

    results
}

/// Download a model from URL to the specified path.
/// The body is staged next to the target and renamed once complete.
async fn download_model(url: &str, path: &Path) -> anyhow::Result<u64> {
    use tokio::io::AsyncWriteExt;

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        anyhow::bail!("HTTP error: {}", response.status());
    }

    if let Some(length) = response.content_length() {
        if length > MAX_AUTO_DOWNLOAD_SIZE {
            anyhow::bail!("Model exceeds max auto-download size ({} bytes)", length);
        }
    }

    let bytes = response.bytes().await?;
    let size = bytes.len() as u64;

    if size > MAX_AUTO_DOWNLOAD_SIZE {
        anyhow::bail!("Downloaded file too large: {} bytes", size);
    }

    let staging = path.with_extension("part");
    let mut file = tokio::fs::File::create(&staging).await?;
    file.write_all(&bytes).await?;
    file.flush().await?;
    drop(file);
    tokio::fs::rename(&staging, path).await?;

    Ok(size)
}

/// Hex SHA-256 of a file
pub fn file_sha256(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Compare a file's digest with the expected hex string (case-insensitive)
pub fn verify_checksum(path: &Path, expected: &str) -> Result<()> {
    let actual = file_sha256(path).map_err(|e| EngineError::ModelUnavailable {
        model: path.display().to_string(),
        reason: format!("cannot read weights: {}", e),
    })?;

    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(EngineError::ModelUnavailable {
            model: path.display().to_string(),
            reason: format!("checksum mismatch: expected {}, got {}", expected.trim(), actual),
        })
    }
}

/// Check that a classifier's weights exist and match the configured digest
pub fn check_weights(config: &ModelConfig, id: ClassifierId, path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(EngineError::ModelUnavailable {
            model: id.to_string(),
            reason: format!("weights not found at {}", path.display()),
        });
    }

    if let Some(expected) = config.source(id).and_then(|s| s.sha256.as_deref()) {
        verify_checksum(path, expected).map_err(|e| match e {
            EngineError::ModelUnavailable { reason, .. } => EngineError::ModelUnavailable {
                model: id.to_string(),
                reason,
            },
            other => other,
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelSource;
    use tempfile::TempDir;

    const WRONG_SHA256: &str = "0000000000000000000000000000000000000000000000000000000000000000";

    fn store_with_rice(dir: &TempDir, sha256: Option<String>) -> ModelConfig {
        let mut config = ModelConfig::with_model_dir(dir.path());
        config.sources.push(ModelSource {
            classifier: ClassifierId::Rice,
            url: None,
            sha256,
        });
        config
    }

    #[test]
    fn test_missing_weights_are_unavailable() {
        let dir = TempDir::new().unwrap();
        let config = ModelConfig::with_model_dir(dir.path());

        let err = check_weights(&config, ClassifierId::Maize, config.weights_path(ClassifierId::Maize))
            .unwrap_err();
        assert!(matches!(err, EngineError::ModelUnavailable { ref model, .. } if model == "Maize"));
    }

    #[test]
    fn test_checksum_verification() {
        let dir = TempDir::new().unwrap();
        let sample = dir.path().join("sample.bin");
        std::fs::write(&sample, b"weights").unwrap();
        let digest = file_sha256(&sample).unwrap();
        assert_eq!(digest.len(), 64);
        assert_ne!(digest, WRONG_SHA256);

        let config = store_with_rice(&dir, Some(digest.to_uppercase()));
        std::fs::write(config.weights_path(ClassifierId::Rice), b"weights").unwrap();
        let rice = config.weights_path(ClassifierId::Rice).clone();
        assert!(check_weights(&config, ClassifierId::Rice, &rice).is_ok());

        let corrupt = store_with_rice(&dir, Some(WRONG_SHA256.to_string()));
        let err = check_weights(&corrupt, ClassifierId::Rice, &rice).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
        assert!(matches!(err, EngineError::ModelUnavailable { ref model, .. } if model == "Rice"));
    }

    #[tokio::test]
    async fn test_existing_weights_are_not_downloaded() {
        let dir = TempDir::new().unwrap();
        let mut config = ModelConfig::with_model_dir(dir.path());
        config.sources.push(ModelSource {
            classifier: ClassifierId::PlantDoc,
            url: Some("http://127.0.0.1:9/plantdoc.onnx".into()),
            sha256: None,
        });
        std::fs::write(config.weights_path(ClassifierId::PlantDoc), b"onnx").unwrap();

        let results = ensure_models_downloaded(&config).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        assert_eq!(results[0].message, "Already exists");
    }

    #[tokio::test]
    async fn test_unreachable_source_reports_failure() {
        let dir = TempDir::new().unwrap();
        let mut config = ModelConfig::with_model_dir(dir.path());
        config.sources.push(ModelSource {
            classifier: ClassifierId::Maize,
            url: Some("http://127.0.0.1:9/maize.onnx".into()),
            sha256: None,
        });

        let results = ensure_models_downloaded(&config).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].model, ClassifierId::Maize);
        assert!(!results[0].success);
        assert!(!config.weights_path(ClassifierId::Maize).exists());
    }
}
