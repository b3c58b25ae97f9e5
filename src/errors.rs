use thiserror::Error;

#[derive(Error, Debug)]
pub enum TPError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Layer validation failed for {layer}: {reason}")]
    LayerValidation { layer: String, reason: String },
    #[error("Required constant tensor is missing: {0}")]
    NullPointer(String),
    #[error("Graph error: {0}")]
    Graph(String),
    #[error("Runtime error: {0}")]
    Runtime(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TPError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        TPError::InvalidArgument(msg.into())
    }

    pub fn layer_validation(layer: impl Into<String>, reason: impl Into<String>) -> Self {
        TPError::LayerValidation {
            layer: layer.into(),
            reason: reason.into(),
        }
    }
}

pub type TPResult<T> = Result<T, TPError>;
