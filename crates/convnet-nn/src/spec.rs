//! Plain-data descriptions of layers.
//!
//! A [`LayerSpec`] carries a layer's kind and hyperparameters but no weights.
//! Lists of specs are how architectures are inspected, compared and written
//! out as JSON.

use std::fmt;

use convnet_core::Shape;
use serde::{Deserialize, Serialize};

use crate::backend::ImageDataFormat;
use crate::conv::{Conv2D, MaxPool2D};
use crate::error::{NnError, NnResult};
use crate::layers::{Activation, BatchNorm, Dense, Dropout, Flatten, Layer};
use crate::regularizers::Regularizer;

/// Border handling for sliding windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Padding {
    /// No padding; windows must fit entirely inside the input.
    #[default]
    Valid,
    /// Zero padding so that the output length is `ceil(input / stride)`.
    Same,
}

impl Padding {
    /// Output length of a window sliding over `input` positions.
    pub fn output_length(self, input: usize, window: usize, stride: usize) -> NnResult<usize> {
        if window == 0 || stride == 0 {
            return Err(NnError::InvalidConfig(format!(
                "window ({window}) and stride ({stride}) must be positive"
            )));
        }
        let len = match self {
            Padding::Same => input.div_ceil(stride),
            Padding::Valid if input >= window => (input - window) / stride + 1,
            Padding::Valid => 0,
        };
        if len == 0 {
            return Err(NnError::NegativeDimension { input, window, stride });
        }
        Ok(len)
    }

    /// Padding inserted before the first element for an `output`-long result.
    pub fn leading(self, input: usize, window: usize, stride: usize, output: usize) -> usize {
        match self {
            Padding::Valid => 0,
            Padding::Same => ((output - 1) * stride + window).saturating_sub(input) / 2,
        }
    }
}

/// Element-wise (or, for softmax, row-wise) activation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationKind {
    Linear,
    Relu,
    Sigmoid,
    Tanh,
    /// Normalizes the last axis into a probability distribution.
    Softmax,
}

impl fmt::Display for ActivationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActivationKind::Linear => "linear",
            ActivationKind::Relu => "relu",
            ActivationKind::Sigmoid => "sigmoid",
            ActivationKind::Tanh => "tanh",
            ActivationKind::Softmax => "softmax",
        };
        f.write_str(name)
    }
}

/// The kind of a layer without its hyperparameters; used to compare topologies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    Conv2D,
    Activation(ActivationKind),
    BatchNormalization,
    MaxPool2D,
    Dropout,
    Flatten,
    Dense,
}

impl LayerKind {
    /// Prefix used when naming layers inside a model.
    pub fn base_name(self) -> &'static str {
        match self {
            LayerKind::Conv2D => "conv2d",
            LayerKind::Activation(_) => "activation",
            LayerKind::BatchNormalization => "batch_normalization",
            LayerKind::MaxPool2D => "max_pooling2d",
            LayerKind::Dropout => "dropout",
            LayerKind::Flatten => "flatten",
            LayerKind::Dense => "dense",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerKind::Conv2D => f.write_str("Conv2D"),
            LayerKind::Activation(kind) => write!(f, "Activation({kind})"),
            LayerKind::BatchNormalization => f.write_str("BatchNormalization"),
            LayerKind::MaxPool2D => f.write_str("MaxPool2D"),
            LayerKind::Dropout => f.write_str("Dropout"),
            LayerKind::Flatten => f.write_str("Flatten"),
            LayerKind::Dense => f.write_str("Dense"),
        }
    }
}

/// A layer's kind together with every hyperparameter needed to recreate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum LayerSpec {
    Conv2D {
        filters: usize,
        kernel_size: (usize, usize),
        strides: (usize, usize),
        padding: Padding,
        data_format: ImageDataFormat,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kernel_regularizer: Option<Regularizer>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input_shape: Option<Shape>,
    },
    Activation {
        activation: ActivationKind,
    },
    BatchNormalization {
        axis: isize,
        momentum: f64,
        epsilon: f64,
    },
    MaxPool2D {
        pool_size: (usize, usize),
        strides: (usize, usize),
        padding: Padding,
        data_format: ImageDataFormat,
    },
    Dropout {
        rate: f64,
    },
    Flatten {
        data_format: ImageDataFormat,
    },
    Dense {
        units: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kernel_regularizer: Option<Regularizer>,
    },
}

impl LayerSpec {
    pub fn kind(&self) -> LayerKind {
        match self {
            LayerSpec::Conv2D { .. } => LayerKind::Conv2D,
            LayerSpec::Activation { activation } => LayerKind::Activation(*activation),
            LayerSpec::BatchNormalization { .. } => LayerKind::BatchNormalization,
            LayerSpec::MaxPool2D { .. } => LayerKind::MaxPool2D,
            LayerSpec::Dropout { .. } => LayerKind::Dropout,
            LayerSpec::Flatten { .. } => LayerKind::Flatten,
            LayerSpec::Dense { .. } => LayerKind::Dense,
        }
    }

    /// The kernel regularizer of a weighted layer.
    pub fn kernel_regularizer(&self) -> Option<&Regularizer> {
        match self {
            LayerSpec::Conv2D { kernel_regularizer, .. } | LayerSpec::Dense { kernel_regularizer, .. } => {
                kernel_regularizer.as_ref()
            }
            _ => None,
        }
    }

    /// Input shape declared on this layer, if it opens a model.
    pub fn input_shape(&self) -> Option<&Shape> {
        match self {
            LayerSpec::Conv2D { input_shape, .. } => input_shape.as_ref(),
            _ => None,
        }
    }

    /// A fresh, unbuilt layer with these hyperparameters.
    pub fn into_layer(self) -> Box<dyn Layer> {
        match self {
            LayerSpec::Conv2D {
                filters,
                kernel_size,
                strides,
                padding,
                data_format,
                kernel_regularizer,
                input_shape,
            } => {
                let mut conv = Conv2D::new(filters, kernel_size)
                    .with_strides(strides)
                    .with_padding(padding)
                    .with_data_format(data_format);
                conv.kernel_regularizer = kernel_regularizer;
                conv.input_shape = input_shape;
                Box::new(conv)
            }
            LayerSpec::Activation { activation } => Box::new(Activation::new(activation)),
            LayerSpec::BatchNormalization { axis, momentum, epsilon } => {
                let mut bn = BatchNorm::new(axis);
                bn.momentum = momentum;
                bn.epsilon = epsilon;
                Box::new(bn)
            }
            LayerSpec::MaxPool2D {
                pool_size,
                strides,
                padding,
                data_format,
            } => Box::new(
                MaxPool2D::new(pool_size)
                    .with_strides(strides)
                    .with_padding(padding)
                    .with_data_format(data_format),
            ),
            LayerSpec::Dropout { rate } => Box::new(Dropout::new(rate)),
            LayerSpec::Flatten { data_format } => Box::new(Flatten::new().with_data_format(data_format)),
            LayerSpec::Dense {
                units,
                kernel_regularizer,
            } => {
                let mut dense = Dense::new(units);
                dense.kernel_regularizer = kernel_regularizer;
                Box::new(dense)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regularizers::l2;

    #[test]
    fn test_same_padding_lengths() {
        assert_eq!(Padding::Same.output_length(227, 11, 4).unwrap(), 57);
        assert_eq!(Padding::Same.output_length(13, 3, 1).unwrap(), 13);
        // 56 * 4 + 11 = 235 spans 8 more than the input, 4 of them in front
        assert_eq!(Padding::Same.leading(227, 11, 4, 57), 4);
        assert_eq!(Padding::Same.leading(13, 3, 1, 13), 1);
    }

    #[test]
    fn test_valid_padding_lengths() {
        assert_eq!(Padding::Valid.output_length(57, 3, 2).unwrap(), 28);
        assert_eq!(Padding::Valid.output_length(3, 3, 2).unwrap(), 1);
        assert_eq!(Padding::Valid.leading(57, 3, 2, 28), 0);
        assert!(matches!(
            Padding::Valid.output_length(2, 3, 2),
            Err(NnError::NegativeDimension { input: 2, window: 3, stride: 2 })
        ));
    }

    #[test]
    fn test_zero_stride_is_rejected() {
        assert!(matches!(Padding::Same.output_length(8, 3, 0), Err(NnError::InvalidConfig(_))));
    }

    #[test]
    fn test_kind_and_accessors() {
        let spec = LayerSpec::Dense { units: 10, kernel_regularizer: Some(l2(0.1)) };
        assert_eq!(spec.kind(), LayerKind::Dense);
        assert_eq!(spec.kernel_regularizer(), Some(&l2(0.1)));
        assert_eq!(spec.input_shape(), None);

        let act = LayerSpec::Activation { activation: ActivationKind::Softmax };
        assert_eq!(act.kind(), LayerKind::Activation(ActivationKind::Softmax));
        assert_eq!(act.kind().to_string(), "Activation(softmax)");
        assert_eq!(act.kernel_regularizer(), None);
    }

    #[test]
    fn test_json_shape() {
        let spec = LayerSpec::MaxPool2D {
            pool_size: (3, 3),
            strides: (2, 2),
            padding: Padding::Valid,
            data_format: ImageDataFormat::ChannelsLast,
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["kind"], "MaxPool2D");
        assert_eq!(value["pool_size"], serde_json::json!([3, 3]));
        assert_eq!(value["data_format"], "channels_last");
    }

    #[test]
    fn test_into_layer_preserves_spec() {
        let spec = LayerSpec::Conv2D {
            filters: 96,
            kernel_size: (11, 11),
            strides: (4, 4),
            padding: Padding::Same,
            data_format: ImageDataFormat::ChannelsFirst,
            kernel_regularizer: Some(l2(0.0002)),
            input_shape: Some(Shape::new(vec![3, 227, 227])),
        };
        assert_eq!(spec.clone().into_layer().spec(), spec);

        let bn = LayerSpec::BatchNormalization { axis: 1, momentum: 0.9, epsilon: 1e-5 };
        assert_eq!(bn.clone().into_layer().spec(), bn);
    }
}
