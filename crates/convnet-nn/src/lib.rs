//! Layers, sequential models and the backend settings they share.

pub mod backend;
pub mod conv;
pub mod error;
pub mod layers;
pub mod regularizers;
pub mod sequential;
pub mod spec;
pub mod summary;

pub use backend::{BackendConfig, ImageDataFormat};
pub use conv::{Conv2D, MaxPool2D};
pub use error::{NnError, NnResult};
pub use layers::*;
pub use regularizers::{l1, l2, Regularizer};
pub use sequential::Sequential;
pub use spec::{ActivationKind, LayerKind, LayerSpec, Padding};
pub use summary::{ModelSummary, SummaryRow};
