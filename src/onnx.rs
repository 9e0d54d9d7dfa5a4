//! ONNX Runtime model loader
//!
//! Builds one [`Session`] per classifier and tags it with a capability.
//! Ensemble members always produce scores. The legacy export is probabilistic
//! when it carries a float probability output next to its label output, and
//! label-only otherwise.

use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::tensor::TensorElementType;
use ort::value::{Tensor, ValueType};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::classifier::{
    ClassifierId, ClassifierSpec, LabelOnlyModel, LabelVocabulary, LoadedModel, ModelLoader,
    OutputKind, ProbabilisticModel,
};
use crate::config::ModelConfig;
use crate::error::{EngineError, Result};
use crate::model_store::check_weights;
use crate::preprocess::ModelInput;

pub struct OnnxModelLoader {
    config: ModelConfig,
}

impl OnnxModelLoader {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }

    fn legacy_labels_path(&self) -> &PathBuf {
        &self.config.legacy_labels_path
    }
}

impl ModelLoader for OnnxModelLoader {
    fn load(&self, spec: &ClassifierSpec, weights: &Path) -> Result<LoadedModel> {
        check_weights(&self.config, spec.id, weights)?;

        let session = build_session(weights, self.config.intra_threads)?;
        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "input".to_string());

        debug!(
            model = %spec.id,
            input = %input_name,
            outputs = session.outputs.len(),
            "ONNX session ready"
        );

        if spec.id != ClassifierId::LegacyPest {
            return Ok(LoadedModel::probabilistic(OnnxScores {
                session: Mutex::new(session),
                input_name,
                output_index: 0,
            }));
        }

        let labels = LabelVocabulary::from_file(self.legacy_labels_path())?;
        let probability_output = session
            .outputs
            .iter()
            .skip(1)
            .position(|o| {
                matches!(
                    o.output_type,
                    ValueType::Tensor {
                        ty: TensorElementType::Float32,
                        ..
                    }
                )
            })
            .map(|p| p + 1);

        let loaded = match probability_output {
            Some(output_index) => {
                info!(model = %spec.id, output_index, "Legacy model exposes probabilities");
                LoadedModel::probabilistic(OnnxScores {
                    session: Mutex::new(session),
                    input_name,
                    output_index,
                })
                .with_output(OutputKind::Probabilities)
            }
            None => {
                info!(model = %spec.id, "Legacy model is label-only");
                LoadedModel::label_only(OnnxLabel {
                    session: Mutex::new(session),
                    input_name,
                    labels: labels.clone(),
                })
            }
        };
        Ok(loaded.with_labels(labels))
    }
}

fn build_session(path: &Path, intra_threads: usize) -> Result<Session> {
    Ok(Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads)?
        .commit_from_file(path)?)
}

fn input_tensor(input: &ModelInput) -> Result<Tensor<f32>> {
    let tensor = match input {
        ModelInput::Tensor(array) => Tensor::from_array(array.clone())?,
        ModelInput::Flat(array) => Tensor::from_array(array.clone())?,
    };
    Ok(tensor)
}

fn lock_poisoned<T>(_: T) -> EngineError {
    EngineError::Inference("session lock poisoned".into())
}

/// Session whose chosen output is one float score per label
struct OnnxScores {
    session: Mutex<Session>,
    input_name: String,
    output_index: usize,
}

impl ProbabilisticModel for OnnxScores {
    fn scores(&self, input: &ModelInput) -> Result<Vec<f32>> {
        let tensor = input_tensor(input)?;
        let mut session = self.session.lock().map_err(lock_poisoned)?;
        let outputs = session.run(ort::inputs![self.input_name.clone() => tensor])?;

        let output = outputs.values().nth(self.output_index).ok_or_else(|| {
            EngineError::Inference(format!("no output tensor at index {}", self.output_index))
        })?;

        // [1, num_classes] or [num_classes]; either way the flat slice is the row
        let (_shape, scores) = output.try_extract_tensor::<f32>()?;
        Ok(scores.to_vec())
    }
}

/// Session whose first output is the predicted class index
struct OnnxLabel {
    session: Mutex<Session>,
    input_name: String,
    labels: LabelVocabulary,
}

impl LabelOnlyModel for OnnxLabel {
    fn label(&self, input: &ModelInput) -> Result<String> {
        let tensor = input_tensor(input)?;
        let mut session = self.session.lock().map_err(lock_poisoned)?;
        let outputs = session.run(ort::inputs![self.input_name.clone() => tensor])?;

        let output = outputs
            .values()
            .next()
            .ok_or_else(|| EngineError::Inference("no output tensor found".into()))?;
        let (_shape, values) = output.try_extract_tensor::<i64>()?;
        let index = *values
            .first()
            .ok_or_else(|| EngineError::Inference("empty label output".into()))?;

        usize::try_from(index)
            .ok()
            .and_then(|i| self.labels.get(i))
            .map(str::to_string)
            .ok_or_else(|| {
                EngineError::Inference(format!(
                    "label index {} outside vocabulary of {}",
                    index,
                    self.labels.len()
                ))
            })
    }
}
