//! Per-model classifiers
//!
//! A [`Classifier`] couples a label vocabulary and a preprocessing transform
//! with loaded model weights. Weights come in two capabilities: models that
//! produce a probability distribution and models that only emit a label.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::image_input::DecodedImage;
use crate::metrics::{Timer, INFERENCE_FAILURES, INFERENCE_LATENCY, INFERENCE_REQUESTS};
use crate::prediction::{LabelScore, ModelPrediction, PredictionResult};
use crate::preprocess::{softmax, ModelInput, Preprocessing};

/// Confidence reported when a model yields a label but no probabilities.
/// Carried over from the deployed legacy classifier; not calibrated.
pub const LEGACY_FALLBACK_CONFIDENCE: f32 = 0.85;

/// Size of the `all_predictions` breakdown
pub const TOP_K: usize = 5;

// ============================================================================
// Classifier identity
// ============================================================================

/// Declaration order is the ensemble's tie-break priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ClassifierId {
    PlantDoc,
    Maize,
    Rice,
    LegacyPest,
}

impl ClassifierId {
    pub const ALL: [ClassifierId; 4] = [
        ClassifierId::PlantDoc,
        ClassifierId::Maize,
        ClassifierId::Rice,
        ClassifierId::LegacyPest,
    ];

    /// Ensemble members in priority order
    pub const ENSEMBLE: [ClassifierId; 3] =
        [ClassifierId::PlantDoc, ClassifierId::Maize, ClassifierId::Rice];

    /// Short lowercase name, used for metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassifierId::PlantDoc => "plantdoc",
            ClassifierId::Maize => "maize",
            ClassifierId::Rice => "rice",
            ClassifierId::LegacyPest => "legacy",
        }
    }

    pub fn env_prefix(&self) -> &'static str {
        match self {
            ClassifierId::PlantDoc => "PLANTDOC",
            ClassifierId::Maize => "MAIZE",
            ClassifierId::Rice => "RICE",
            ClassifierId::LegacyPest => "LEGACY",
        }
    }
}

impl fmt::Display for ClassifierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClassifierId::PlantDoc => "PlantDoc",
            ClassifierId::Maize => "Maize",
            ClassifierId::Rice => "Rice",
            ClassifierId::LegacyPest => "LegacyPest",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Label vocabularies
// ============================================================================

pub const PLANTDOC_LABELS: [&str; 29] = [
    "Apple Scab Leaf",
    "Apple leaf",
    "Apple rust leaf",
    "Bell_pepper leaf",
    "Bell_pepper leaf spot",
    "Blueberry leaf",
    "Cherry leaf",
    "Corn Gray leaf spot",
    "Corn leaf blight",
    "Corn rust leaf",
    "grape leaf",
    "grape leaf black rot",
    "Peach leaf",
    "Potato leaf",
    "Potato leaf early blight",
    "Potato leaf late blight",
    "Raspberry leaf",
    "Soyabean leaf",
    "Soybean leaf",
    "Squash Powdery mildew leaf",
    "Strawberry leaf",
    "Tomato Early blight leaf",
    "Tomato leaf",
    "Tomato leaf bacterial spot",
    "Tomato leaf late blight",
    "Tomato leaf mosaic virus",
    "Tomato leaf yellow virus",
    "Tomato mold leaf",
    "Tomato Septoria leaf spot",
];

pub const MAIZE_LABELS: [&str; 11] = [
    "fall army worm",
    "healthy",
    "herbicide burn",
    "magnesium deficiency",
    "maize streak",
    "multiple",
    "nitrogen deficiency",
    "potassium deficiency",
    "stalk borer",
    "sulphur deficiency",
    "zinc deficiency",
];

pub const RICE_LABELS: [&str; 10] = [
    "bacterial_leaf_blight",
    "bacterial_leaf_streak",
    "bacterial_panicle_blight",
    "blast",
    "brown_spot",
    "dead_heart",
    "downy_mildew",
    "hispa",
    "normal",
    "tungro",
];

/// Ordered, immutable class names; index `i` names output `i`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelVocabulary(Arc<[String]>);

impl LabelVocabulary {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(labels.into_iter().map(Into::into).collect())
    }

    /// One label per non-empty line
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            EngineError::ModelUnavailable {
                model: path.display().to_string(),
                reason: format!("cannot read labels: {}", e),
            }
        })?;
        Ok(Self::new(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty()),
        ))
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// What a probabilistic model's raw output vector holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// Unnormalized scores; softmax is always applied
    Logits,
    /// Already a distribution; used as is
    Probabilities,
}

impl OutputKind {
    pub fn to_probabilities(self, scores: Vec<f32>) -> Vec<f32> {
        match self {
            OutputKind::Logits => softmax(&scores),
            OutputKind::Probabilities => scores,
        }
    }
}

/// Static description of a classifier: identity, vocabulary, preprocessing
#[derive(Debug, Clone)]
pub struct ClassifierSpec {
    pub id: ClassifierId,
    pub labels: LabelVocabulary,
    pub preprocessing: Preprocessing,
    pub output: OutputKind,
}

impl ClassifierSpec {
    pub fn for_id(id: ClassifierId) -> Self {
        match id {
            ClassifierId::PlantDoc => Self {
                id,
                labels: LabelVocabulary::new(PLANTDOC_LABELS),
                preprocessing: Preprocessing::imagenet(224),
                output: OutputKind::Logits,
            },
            ClassifierId::Maize => Self {
                id,
                labels: LabelVocabulary::new(MAIZE_LABELS),
                preprocessing: Preprocessing::imagenet(224),
                output: OutputKind::Logits,
            },
            ClassifierId::Rice => Self {
                id,
                labels: LabelVocabulary::new(RICE_LABELS),
                preprocessing: Preprocessing::Scaled {
                    width: 256,
                    height: 256,
                },
                output: OutputKind::Logits,
            },
            // Vocabulary is read from the labels file when the weights load
            ClassifierId::LegacyPest => Self {
                id,
                labels: LabelVocabulary::new(Vec::<String>::new()),
                preprocessing: Preprocessing::Flattened {
                    width: 224,
                    height: 224,
                },
                output: OutputKind::Probabilities,
            },
        }
    }
}

// ============================================================================
// Model capabilities
// ============================================================================

/// Weights that produce one score per label
pub trait ProbabilisticModel: Send + Sync {
    /// Probabilities or logits, one per vocabulary entry
    fn scores(&self, input: &ModelInput) -> Result<Vec<f32>>;
}

/// Weights that only emit the predicted label
pub trait LabelOnlyModel: Send + Sync {
    fn label(&self, input: &ModelInput) -> Result<String>;
}

pub enum ModelHandle {
    Probabilistic(Box<dyn ProbabilisticModel>),
    LabelOnly(Box<dyn LabelOnlyModel>),
}

impl ModelHandle {
    pub fn capability(&self) -> Capability {
        match self {
            ModelHandle::Probabilistic(_) => Capability::Probabilistic,
            ModelHandle::LabelOnly(_) => Capability::LabelOnly,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Probabilistic,
    LabelOnly,
}

/// What a [`ModelLoader`] hands back
pub struct LoadedModel {
    pub handle: ModelHandle,
    /// Replaces the built-in vocabulary when the weights ship their own
    pub labels: Option<LabelVocabulary>,
    /// Overrides the spec's output kind
    pub output: Option<OutputKind>,
}

impl LoadedModel {
    pub fn probabilistic(model: impl ProbabilisticModel + 'static) -> Self {
        Self {
            handle: ModelHandle::Probabilistic(Box::new(model)),
            labels: None,
            output: None,
        }
    }

    pub fn label_only(model: impl LabelOnlyModel + 'static) -> Self {
        Self {
            handle: ModelHandle::LabelOnly(Box::new(model)),
            labels: None,
            output: None,
        }
    }

    pub fn with_labels(mut self, labels: LabelVocabulary) -> Self {
        self.labels = Some(labels);
        self
    }

    pub fn with_output(mut self, output: OutputKind) -> Self {
        self.output = Some(output);
        self
    }
}

/// Turns a weights location into a ready model. Called at most once per
/// successful load; may block.
pub trait ModelLoader: Send + Sync {
    fn load(&self, spec: &ClassifierSpec, weights: &Path) -> Result<LoadedModel>;
}

// ============================================================================
// Classifier
// ============================================================================

pub struct Classifier {
    id: ClassifierId,
    labels: LabelVocabulary,
    preprocessing: Preprocessing,
    output: OutputKind,
    handle: ModelHandle,
}

impl fmt::Debug for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Classifier")
            .field("id", &self.id)
            .field("labels", &self.labels.len())
            .field("preprocessing", &self.preprocessing)
            .field("output", &self.output)
            .field("capability", &self.handle.capability())
            .finish()
    }
}

impl Classifier {
    pub fn new(spec: ClassifierSpec, loaded: LoadedModel) -> Self {
        Self {
            id: spec.id,
            labels: loaded.labels.unwrap_or(spec.labels),
            preprocessing: spec.preprocessing,
            output: loaded.output.unwrap_or(spec.output),
            handle: loaded.handle,
        }
    }

    pub fn id(&self) -> ClassifierId {
        self.id
    }

    pub fn labels(&self) -> &LabelVocabulary {
        &self.labels
    }

    pub fn capability(&self) -> Capability {
        self.handle.capability()
    }

    /// Classify one image. Failures are returned as [`PredictionResult::Failure`].
    pub fn predict(&self, image: &DecodedImage) -> PredictionResult {
        let model = self.id.as_str();
        INFERENCE_REQUESTS.with_label_values(&[model]).inc();
        let timer = Timer::new();

        let result = self.try_predict(image);
        timer.observe_labeled(&INFERENCE_LATENCY, model);

        match result {
            Ok(prediction) => {
                debug!(
                    model = %self.id,
                    label = %prediction.label,
                    confidence = prediction.confidence,
                    latency_ms = timer.elapsed_ms(),
                    "Prediction complete"
                );
                PredictionResult::Success(prediction)
            }
            Err(e) => {
                INFERENCE_FAILURES.with_label_values(&[model]).inc();
                warn!(model = %self.id, error = %e, "Prediction failed");
                PredictionResult::failure(self.id, e)
            }
        }
    }

    fn try_predict(&self, image: &DecodedImage) -> Result<ModelPrediction> {
        let input = self.preprocessing.apply(image)?;

        match &self.handle {
            ModelHandle::Probabilistic(model) => {
                let scores = model.scores(&input)?;
                if scores.is_empty() {
                    return Err(EngineError::Inference("model returned no scores".into()));
                }
                if scores.len() != self.labels.len() {
                    return Err(EngineError::Inference(format!(
                        "model returned {} scores for {} labels",
                        scores.len(),
                        self.labels.len()
                    )));
                }
                if let Some(bad) = scores.iter().find(|v| !v.is_finite()) {
                    return Err(EngineError::Inference(format!(
                        "model returned non-finite score {}",
                        bad
                    )));
                }
                self.rank(self.output.to_probabilities(scores))
            }
            ModelHandle::LabelOnly(model) => {
                let label = model.label(&input)?;
                Ok(ModelPrediction {
                    model: self.id,
                    label,
                    confidence: LEGACY_FALLBACK_CONFIDENCE,
                    all_predictions: Vec::new(),
                })
            }
        }
    }

    /// Arg-max label plus the top-k breakdown. Ties go to the lower index.
    fn rank(&self, probabilities: Vec<f32>) -> Result<ModelPrediction> {
        let mut indexed: Vec<(usize, f32)> = probabilities.into_iter().enumerate().collect();
        indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let all_predictions = indexed
            .iter()
            .take(TOP_K)
            .filter_map(|&(idx, confidence)| {
                self.labels.get(idx).map(|label| LabelScore {
                    label: label.to_string(),
                    confidence,
                })
            })
            .collect::<Vec<_>>();

        let best = all_predictions
            .first()
            .cloned()
            .ok_or_else(|| EngineError::Inference("empty probability vector".into()))?;

        Ok(ModelPrediction {
            model: self.id,
            label: best.label,
            confidence: best.confidence,
            all_predictions,
        })
    }
}
