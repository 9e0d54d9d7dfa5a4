//! Prediction and ensemble result types
//!
//! Results are explicit success/failure variants rather than loosely keyed
//! maps, so a missing label or confidence is unrepresentable on success.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::classifier::ClassifierId;

/// One label and its probability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub confidence: f32,
}

/// A successful single-model prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPrediction {
    pub model: ClassifierId,
    pub label: String,
    /// Arg-max probability, in [0, 1]
    pub confidence: f32,
    /// Top labels by probability, highest first (at most 5)
    pub all_predictions: Vec<LabelScore>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PredictionResult {
    Success(ModelPrediction),
    Failure { model: ClassifierId, error: String },
}

impl PredictionResult {
    pub fn failure(model: ClassifierId, error: impl ToString) -> Self {
        PredictionResult::Failure {
            model,
            error: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PredictionResult::Success(_))
    }

    pub fn model(&self) -> ClassifierId {
        match self {
            PredictionResult::Success(p) => p.model,
            PredictionResult::Failure { model, .. } => *model,
        }
    }

    pub fn confidence(&self) -> Option<f32> {
        match self {
            PredictionResult::Success(p) => Some(p.confidence),
            PredictionResult::Failure { .. } => None,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            PredictionResult::Success(p) => Some(&p.label),
            PredictionResult::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            PredictionResult::Success(_) => None,
            PredictionResult::Failure { error, .. } => Some(error),
        }
    }
}

/// A constituent model's verdict as retained by the ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVerdict {
    pub prediction: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EnsembleResult {
    Selected {
        #[serde(flatten)]
        prediction: ModelPrediction,
        selected_model: ClassifierId,
        /// Every member that succeeded, keyed by model
        all_model_results: BTreeMap<ClassifierId, ModelVerdict>,
    },
    NoConsensus {
        error: String,
        /// Why each member failed
        failures: BTreeMap<ClassifierId, String>,
    },
}

impl EnsembleResult {
    pub fn is_success(&self) -> bool {
        matches!(self, EnsembleResult::Selected { .. })
    }

    pub fn selected_model(&self) -> Option<ClassifierId> {
        match self {
            EnsembleResult::Selected { selected_model, .. } => Some(*selected_model),
            EnsembleResult::NoConsensus { .. } => None,
        }
    }

    pub fn confidence(&self) -> Option<f32> {
        match self {
            EnsembleResult::Selected { prediction, .. } => Some(prediction.confidence),
            EnsembleResult::NoConsensus { .. } => None,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            EnsembleResult::Selected { prediction, .. } => Some(&prediction.label),
            EnsembleResult::NoConsensus { .. } => None,
        }
    }

    pub fn all_model_results(&self) -> Option<&BTreeMap<ClassifierId, ModelVerdict>> {
        match self {
            EnsembleResult::Selected {
                all_model_results, ..
            } => Some(all_model_results),
            EnsembleResult::NoConsensus { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ModelPrediction {
        ModelPrediction {
            model: ClassifierId::Maize,
            label: "healthy".into(),
            confidence: 0.9,
            all_predictions: vec![LabelScore {
                label: "healthy".into(),
                confidence: 0.9,
            }],
        }
    }

    #[test]
    fn test_prediction_accessors() {
        let ok = PredictionResult::Success(sample());
        assert!(ok.is_success());
        assert_eq!(ok.label(), Some("healthy"));
        assert_eq!(ok.model(), ClassifierId::Maize);

        let failed = PredictionResult::failure(ClassifierId::Rice, "weights missing");
        assert!(!failed.is_success());
        assert_eq!(failed.confidence(), None);
        assert_eq!(failed.error(), Some("weights missing"));
    }

    #[test]
    fn test_ensemble_serialization_shape() {
        let mut all = BTreeMap::new();
        all.insert(
            ClassifierId::Maize,
            ModelVerdict {
                prediction: "healthy".into(),
                confidence: 0.9,
            },
        );
        let result = EnsembleResult::Selected {
            prediction: sample(),
            selected_model: ClassifierId::Maize,
            all_model_results: all,
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "selected");
        assert_eq!(json["selected_model"], "Maize");
        assert_eq!(json["label"], "healthy");
        assert_eq!(json["all_model_results"]["Maize"]["prediction"], "healthy");
    }

    #[test]
    fn test_no_consensus_has_no_verdict() {
        let result = EnsembleResult::NoConsensus {
            error: "No models produced valid predictions".into(),
            failures: BTreeMap::new(),
        };
        assert!(!result.is_success());
        assert!(result.selected_model().is_none());
        assert!(result.label().is_none());
        assert!(result.all_model_results().is_none());

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "no_consensus");
    }
}
