//! Ensemble Arbitrator
//!
//! Runs the PlantDoc, Maize and Rice classifiers on the same image and keeps
//! the most confident verdict. Members that fail are left out; the result
//! is a failure only when none of them succeed.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::classifier::ClassifierId;
use crate::image_input::DecodedImage;
use crate::metrics::{ENSEMBLE_NO_CONSENSUS, ENSEMBLE_SELECTIONS};
use crate::prediction::{EnsembleResult, ModelPrediction, ModelVerdict, PredictionResult};
use crate::registry::ModelRegistry;

/// Ensemble output together with the legacy classifier's independent verdict
#[derive(Debug, Clone, Serialize)]
pub struct CombinedDetection {
    pub ensemble: EnsembleResult,
    pub legacy: PredictionResult,
}

#[derive(Clone)]
pub struct EnsembleArbitrator {
    registry: ModelRegistry,
    members: Vec<ClassifierId>,
}

impl EnsembleArbitrator {
    pub fn new(registry: ModelRegistry) -> Self {
        Self {
            registry,
            members: ClassifierId::ENSEMBLE.to_vec(),
        }
    }

    pub fn members(&self) -> &[ClassifierId] {
        &self.members
    }

    /// Run every member concurrently, then arbitrate once all have finished
    pub async fn predict(&self, image: Arc<DecodedImage>) -> EnsembleResult {
        let runs = self
            .members
            .iter()
            .map(|&id| self.registry.predict(id, image.clone()));
        let results = futures::future::join_all(runs).await;

        let outcome = arbitrate(results);
        match &outcome {
            EnsembleResult::Selected {
                prediction,
                selected_model,
                all_model_results,
            } => {
                ENSEMBLE_SELECTIONS
                    .with_label_values(&[selected_model.as_str()])
                    .inc();
                info!(
                    selected_model = %selected_model,
                    label = %prediction.label,
                    confidence = prediction.confidence,
                    members = all_model_results.len(),
                    "Ensemble selected prediction"
                );
            }
            EnsembleResult::NoConsensus { failures, .. } => {
                ENSEMBLE_NO_CONSENSUS.inc();
                warn!(failures = ?failures, "No ensemble member produced a prediction");
            }
        }
        outcome
    }

    /// Ensemble and legacy classifier on the same image
    pub async fn detect_with_legacy(&self, image: Arc<DecodedImage>) -> CombinedDetection {
        let (ensemble, legacy) = tokio::join!(
            self.predict(image.clone()),
            self.registry.predict(ClassifierId::LegacyPest, image)
        );
        CombinedDetection { ensemble, legacy }
    }
}

/// Pick the most confident successful result.
///
/// Selection depends only on the (model, confidence) pairs: the highest
/// confidence wins and exact ties go to the model earliest in
/// [`ClassifierId::ENSEMBLE`] order, regardless of input order.
pub fn arbitrate(results: Vec<PredictionResult>) -> EnsembleResult {
    let mut successes: Vec<ModelPrediction> = Vec::new();
    let mut failures = BTreeMap::new();

    for result in results {
        match result {
            PredictionResult::Success(prediction) => successes.push(prediction),
            PredictionResult::Failure { model, error } => {
                failures.insert(model, error);
            }
        }
    }
    successes.sort_by_key(|p| p.model);

    let all_model_results: BTreeMap<ClassifierId, ModelVerdict> = successes
        .iter()
        .map(|p| {
            (
                p.model,
                ModelVerdict {
                    prediction: p.label.clone(),
                    confidence: p.confidence,
                },
            )
        })
        .collect();

    let mut best: Option<ModelPrediction> = None;
    for prediction in successes {
        let better = match &best {
            Some(current) => prediction.confidence > current.confidence,
            None => true,
        };
        if better {
            best = Some(prediction);
        }
    }

    match best {
        Some(prediction) => EnsembleResult::Selected {
            selected_model: prediction.model,
            prediction,
            all_model_results,
        },
        None => EnsembleResult::NoConsensus {
            error: "No models produced valid predictions".to_string(),
            failures,
        },
    }
}
