use convnet_core::{Shape, TensorError};
use thiserror::Error;

/// Errors raised while inferring shapes, building weights or running layers.
#[derive(Debug, Error)]
pub enum NnError {
    #[error(transparent)]
    Tensor(#[from] TensorError),

    #[error("Expected input of rank {expected}, got shape {got}")]
    RankMismatch { expected: usize, got: Shape },

    #[error("Input shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    #[error("Negative dimension size: input {input} with window {window} and stride {stride}")]
    NegativeDimension {
        input: usize,
        window: usize,
        stride: usize,
    },

    #[error("Invalid axis {axis} for input of rank {ndim}")]
    InvalidAxis { axis: isize, ndim: usize },

    #[error("Invalid layer configuration: {0}")]
    InvalidConfig(String),

    #[error("Layer weights are not built; call build first")]
    NotBuilt,

    #[error("Model has no layers")]
    EmptyModel,

    #[error("The first layer declares no input shape")]
    MissingInputShape,

    #[error("Layer {index} ({name}): {source}")]
    Layer {
        index: usize,
        name: String,
        #[source]
        source: Box<NnError>,
    },

    #[error("Backend config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl NnError {
    /// Attach the position and name of the layer that raised this error.
    pub fn in_layer(self, index: usize, name: &str) -> NnError {
        NnError::Layer {
            index,
            name: name.to_string(),
            source: Box::new(self),
        }
    }
}

pub type NnResult<T> = Result<T, NnError>;
