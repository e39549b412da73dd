use convnet_core::Tensor;
use serde::{Deserialize, Serialize};

/// Weight penalty attached to a layer's kernel.
///
/// Coefficients are stored as given; a negative or huge coefficient is the
/// caller's business.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum Regularizer {
    /// `l1 * Σ|w|`
    L1 { l1: f64 },
    /// `l2 * Σw²`
    L2 { l2: f64 },
    L1L2 { l1: f64, l2: f64 },
}

/// L2 (ridge) penalty with the given strength.
pub fn l2(l2: f64) -> Regularizer {
    Regularizer::L2 { l2 }
}

/// L1 (lasso) penalty with the given strength.
pub fn l1(l1: f64) -> Regularizer {
    Regularizer::L1 { l1 }
}

impl Regularizer {
    /// Penalty this regularizer adds to the loss for `weights`.
    pub fn penalty(&self, weights: &Tensor<f64>) -> f64 {
        match *self {
            Regularizer::L1 { l1 } => l1 * weights.sum_abs(),
            Regularizer::L2 { l2 } => l2 * weights.sum_squares(),
            Regularizer::L1L2 { l1, l2 } => l1 * weights.sum_abs() + l2 * weights.sum_squares(),
        }
    }

    /// `(l1, l2)` coefficients, zero where absent.
    pub fn coefficients(&self) -> (f64, f64) {
        match *self {
            Regularizer::L1 { l1 } => (l1, 0.0),
            Regularizer::L2 { l2 } => (0.0, l2),
            Regularizer::L1L2 { l1, l2 } => (l1, l2),
        }
    }
}
