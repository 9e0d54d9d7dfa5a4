use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Image decode failed: {0}")]
    Decode(String),

    #[error("Invalid band data: {0}")]
    InvalidBands(String),

    #[error("Model unavailable: {model}: {reason}")]
    ModelUnavailable { model: String, reason: String },

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("No satellite data available: {0}")]
    NoData(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Errors that abort a whole analysis rather than a single component
    pub fn is_orchestration_failure(&self) -> bool {
        matches!(
            self,
            EngineError::Provider(_) | EngineError::NoData(_) | EngineError::InvalidRequest(_)
        )
    }
}

impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Internal(err.to_string())
    }
}

impl From<image::ImageError> for EngineError {
    fn from(err: image::ImageError) -> Self {
        EngineError::Decode(err.to_string())
    }
}

impl From<ort::Error> for EngineError {
    fn from(err: ort::Error) -> Self {
        EngineError::Inference(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
