pub mod analytics;
pub mod classifier;
pub mod config;
pub mod ensemble;
pub mod error;
pub mod image_input;
pub mod metrics;
pub mod model_store;
pub mod moisture;
pub mod onnx;
pub mod prediction;
pub mod preprocess;
pub mod registry;
pub mod vegetation;

// Re-export commonly used types for easier testing
pub use crate::analytics::{
    AnalyticsProcessor, AnalyticsRecord, BandDataProvider, BandRequest, BandSet, BoundingBox,
    DateWindow, FarmBoundary, NdviSample, TimeSeriesRequest,
};
pub use crate::classifier::{
    Classifier, ClassifierId, ClassifierSpec, LabelOnlyModel, LabelVocabulary, LoadedModel,
    ModelLoader, OutputKind, ProbabilisticModel,
};
pub use crate::config::Config;
pub use crate::ensemble::{CombinedDetection, EnsembleArbitrator};
pub use crate::error::{EngineError, Result};
pub use crate::image_input::DecodedImage;
pub use crate::prediction::{EnsembleResult, ModelPrediction, PredictionResult};
pub use crate::registry::{ModelRegistry, ModelState};
pub use crate::vegetation::{IndexArray, IndexStatistics};
