use std::fmt;

use convnet_core::{Shape, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::backend::ImageDataFormat;
use crate::error::{NnError, NnResult};
use crate::regularizers::Regularizer;
use crate::spec::{ActivationKind, LayerSpec};

/// Trainable and non-trainable parameter counts of one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParamCount {
    pub trainable: usize,
    pub non_trainable: usize,
}

impl ParamCount {
    pub fn trainable(n: usize) -> Self {
        ParamCount { trainable: n, non_trainable: 0 }
    }

    pub fn total(&self) -> usize {
        self.trainable + self.non_trainable
    }
}

/// Trait for a neural network layer.
///
/// Shapes passed to `output_shape`, `build` and `parameter_count` are
/// per-sample (no batch axis). Tensors passed to `forward` carry the batch
/// axis first.
pub trait Layer: fmt::Debug + Send {
    /// Kind and hyperparameters of this layer.
    fn spec(&self) -> LayerSpec;

    /// Output shape for a given input shape.
    fn output_shape(&self, input: &Shape) -> NnResult<Shape>;

    /// Allocate weights for the given input shape.
    fn build(&mut self, _input: &Shape, _rng: &mut StdRng) -> NnResult<()> {
        Ok(())
    }

    fn is_built(&self) -> bool {
        true
    }

    /// Forward pass. `training` enables dropout and batch statistics.
    fn forward(&mut self, input: &Tensor<f64>, training: bool) -> NnResult<Tensor<f64>>;

    fn parameter_count(&self, _input: &Shape) -> NnResult<ParamCount> {
        Ok(ParamCount::default())
    }

    /// Trainable weight tensors, empty until built.
    fn parameters(&self) -> Vec<&Tensor<f64>> {
        vec![]
    }

    /// Loss contribution of this layer's regularizers.
    fn regularization_penalty(&self) -> f64 {
        0.0
    }

    /// Input shape declared on this layer, if any.
    fn declared_input_shape(&self) -> Option<&Shape> {
        None
    }
}

/// Split a batched tensor into `(batch, per-sample shape)`.
pub(crate) fn split_batch(input: &Tensor<f64>) -> NnResult<(usize, Shape)> {
    let shape = input.shape();
    if shape.ndim() == 0 {
        return Err(NnError::RankMismatch { expected: 1, got: shape.clone() });
    }
    Ok((shape.dims()[0], shape.without_batch()))
}

// ─── Dense ──────────────────────────────────────────────────────────────────

/// Fully connected layer over the last axis: y = xW + b.
#[derive(Debug, Clone)]
pub struct Dense {
    pub units: usize,
    pub kernel_regularizer: Option<Regularizer>,
    weight: Option<Tensor<f64>>, // [in_features, units]
    bias: Option<Tensor<f64>>,   // [units]
}

impl Dense {
    pub fn new(units: usize) -> Self {
        Dense {
            units,
            kernel_regularizer: None,
            weight: None,
            bias: None,
        }
    }

    pub fn with_kernel_regularizer(mut self, regularizer: Regularizer) -> Self {
        self.kernel_regularizer = Some(regularizer);
        self
    }

    pub fn weight(&self) -> Option<&Tensor<f64>> {
        self.weight.as_ref()
    }

    fn in_features(input: &Shape) -> NnResult<usize> {
        input
            .last()
            .ok_or_else(|| NnError::RankMismatch { expected: 1, got: input.clone() })
    }
}

impl Layer for Dense {
    fn spec(&self) -> LayerSpec {
        LayerSpec::Dense {
            units: self.units,
            kernel_regularizer: self.kernel_regularizer,
        }
    }

    fn output_shape(&self, input: &Shape) -> NnResult<Shape> {
        Self::in_features(input)?;
        let mut dims = input.to_vec();
        if let Some(last) = dims.last_mut() {
            *last = self.units;
        }
        Ok(Shape::new(dims))
    }

    /// Glorot-uniform kernel, zero bias.
    fn build(&mut self, input: &Shape, rng: &mut StdRng) -> NnResult<()> {
        let in_features = Self::in_features(input)?;
        let limit = (6.0 / (in_features + self.units) as f64).sqrt();
        self.weight = Some(Tensor::random_uniform(vec![in_features, self.units], -limit, limit, rng));
        self.bias = Some(Tensor::zeros(vec![self.units]));
        Ok(())
    }

    fn is_built(&self) -> bool {
        self.weight.is_some()
    }

    fn forward(&mut self, input: &Tensor<f64>, _training: bool) -> NnResult<Tensor<f64>> {
        let (weight, bias) = match (&self.weight, &self.bias) {
            (Some(w), Some(b)) => (w, b),
            _ => return Err(NnError::NotBuilt),
        };
        let in_features = weight.shape().dims()[0];
        let dims = input.shape_vec();
        if dims.len() < 2 || dims[dims.len() - 1] != in_features {
            return Err(NnError::ShapeMismatch {
                expected: Shape::new(vec![in_features]),
                got: input.shape().without_batch(),
            });
        }

        let rows = input.numel() / in_features;
        let out = input
            .reshape(vec![rows, in_features])?
            .matmul(weight)?
            .add(bias)?;

        let mut out_dims = dims;
        if let Some(last) = out_dims.last_mut() {
            *last = self.units;
        }
        Ok(out.reshape(out_dims)?)
    }

    fn parameter_count(&self, input: &Shape) -> NnResult<ParamCount> {
        let in_features = Self::in_features(input)?;
        Ok(ParamCount::trainable(in_features * self.units + self.units))
    }

    fn parameters(&self) -> Vec<&Tensor<f64>> {
        self.weight.iter().chain(self.bias.iter()).collect()
    }

    fn regularization_penalty(&self) -> f64 {
        match (&self.kernel_regularizer, &self.weight) {
            (Some(reg), Some(w)) => reg.penalty(w),
            _ => 0.0,
        }
    }
}

// ─── Activation ─────────────────────────────────────────────────────────────

/// Applies an activation function; softmax normalizes the last axis.
#[derive(Debug, Clone, Copy)]
pub struct Activation {
    pub kind: ActivationKind,
}

impl Activation {
    pub fn new(kind: ActivationKind) -> Self {
        Activation { kind }
    }

    pub fn relu() -> Self {
        Self::new(ActivationKind::Relu)
    }

    pub fn softmax() -> Self {
        Self::new(ActivationKind::Softmax)
    }
}

impl Layer for Activation {
    fn spec(&self) -> LayerSpec {
        LayerSpec::Activation { activation: self.kind }
    }

    fn output_shape(&self, input: &Shape) -> NnResult<Shape> {
        Ok(input.clone())
    }

    fn forward(&mut self, input: &Tensor<f64>, _training: bool) -> NnResult<Tensor<f64>> {
        Ok(match self.kind {
            ActivationKind::Linear => input.clone(),
            ActivationKind::Relu => input.relu(),
            ActivationKind::Sigmoid => input.sigmoid(),
            ActivationKind::Tanh => input.tanh_elem(),
            ActivationKind::Softmax => input.softmax()?,
        })
    }
}

// ─── Dropout ────────────────────────────────────────────────────────────────

/// Dropout layer: zeroes a `rate` fraction of activations during training and
/// rescales the survivors by `1 / (1 - rate)`. Identity at inference.
#[derive(Debug, Clone)]
pub struct Dropout {
    pub rate: f64,
    rng: Option<StdRng>,
}

impl Dropout {
    pub fn new(rate: f64) -> Self {
        Dropout { rate, rng: None }
    }
}

impl Layer for Dropout {
    fn spec(&self) -> LayerSpec {
        LayerSpec::Dropout { rate: self.rate }
    }

    fn output_shape(&self, input: &Shape) -> NnResult<Shape> {
        Ok(input.clone())
    }

    fn build(&mut self, _input: &Shape, rng: &mut StdRng) -> NnResult<()> {
        self.rng = Some(StdRng::seed_from_u64(rng.gen()));
        Ok(())
    }

    fn is_built(&self) -> bool {
        self.rng.is_some()
    }

    fn forward(&mut self, input: &Tensor<f64>, training: bool) -> NnResult<Tensor<f64>> {
        if !training || self.rate <= 0.0 {
            return Ok(input.clone());
        }
        if self.rate >= 1.0 {
            return Ok(Tensor::zeros(input.shape_vec()));
        }
        let rng = self.rng.as_mut().ok_or(NnError::NotBuilt)?;
        let scale = 1.0 / (1.0 - self.rate);
        let rate = self.rate;
        let data: Vec<f64> = input
            .data()
            .iter()
            .map(|&v| if rng.gen::<f64>() < rate { 0.0 } else { v * scale })
            .collect();
        Ok(Tensor::new(data, input.shape_vec())?)
    }
}

// ─── Flatten ────────────────────────────────────────────────────────────────

/// Flatten layer: reshapes `[batch, ...]` to `[batch, features]`.
///
/// Channels-first inputs are moved to channels-last order first, so the
/// feature order does not depend on the data format.
#[derive(Debug, Clone, Copy, Default)]
pub struct Flatten {
    pub data_format: ImageDataFormat,
}

impl Flatten {
    pub fn new() -> Self {
        Flatten::default()
    }

    pub fn with_data_format(mut self, data_format: ImageDataFormat) -> Self {
        self.data_format = data_format;
        self
    }
}

impl Layer for Flatten {
    fn spec(&self) -> LayerSpec {
        LayerSpec::Flatten { data_format: self.data_format }
    }

    fn output_shape(&self, input: &Shape) -> NnResult<Shape> {
        Ok(Shape::new(vec![input.numel()]))
    }

    fn forward(&mut self, input: &Tensor<f64>, _training: bool) -> NnResult<Tensor<f64>> {
        let (batch, sample) = split_batch(input)?;
        let ordered = if self.data_format == ImageDataFormat::ChannelsFirst && input.ndim() >= 3 {
            // [0, 2, .., n-1, 1]
            let mut perm: Vec<usize> = (0..input.ndim()).filter(|&a| a != 1).collect();
            perm.push(1);
            input.permute(&perm)?
        } else {
            input.clone()
        };
        Ok(ordered.reshape(vec![batch, sample.numel()])?)
    }
}

// ─── Batch Normalization ────────────────────────────────────────────────────

/// Batch Normalization over one feature axis.
///
/// y = (x - μ) / √(σ² + ε) * γ + β, with μ and σ² taken from the batch during
/// training and from moving averages at inference.
#[derive(Debug, Clone)]
pub struct BatchNorm {
    /// Feature axis, counted on the batched tensor; negative counts from the end.
    pub axis: isize,
    pub momentum: f64,
    pub epsilon: f64,
    gamma: Option<Tensor<f64>>,
    beta: Option<Tensor<f64>>,
    moving_mean: Option<Tensor<f64>>,
    moving_variance: Option<Tensor<f64>>,
}

impl BatchNorm {
    pub fn new(axis: isize) -> Self {
        BatchNorm {
            axis,
            momentum: 0.99,
            epsilon: 1e-3,
            gamma: None,
            beta: None,
            moving_mean: None,
            moving_variance: None,
        }
    }

    /// Resolve the feature axis against a batched shape; the batch axis itself is rejected.
    fn feature_axis(&self, batched: &Shape) -> NnResult<usize> {
        match batched.resolve_axis(self.axis) {
            Some(axis) if axis > 0 => Ok(axis),
            _ => Err(NnError::InvalidAxis { axis: self.axis, ndim: batched.ndim() }),
        }
    }

    fn features(&self, input: &Shape) -> NnResult<usize> {
        let batched = input.with_batch(1);
        Ok(batched.dims()[self.feature_axis(&batched)?])
    }

    pub fn moving_mean(&self) -> Option<&Tensor<f64>> {
        self.moving_mean.as_ref()
    }

    pub fn moving_variance(&self) -> Option<&Tensor<f64>> {
        self.moving_variance.as_ref()
    }
}

impl Default for BatchNorm {
    fn default() -> Self {
        Self::new(-1)
    }
}

impl Layer for BatchNorm {
    fn spec(&self) -> LayerSpec {
        LayerSpec::BatchNormalization {
            axis: self.axis,
            momentum: self.momentum,
            epsilon: self.epsilon,
        }
    }

    fn output_shape(&self, input: &Shape) -> NnResult<Shape> {
        self.features(input)?;
        Ok(input.clone())
    }

    fn build(&mut self, input: &Shape, _rng: &mut StdRng) -> NnResult<()> {
        let c = self.features(input)?;
        self.gamma = Some(Tensor::ones(vec![c]));
        self.beta = Some(Tensor::zeros(vec![c]));
        self.moving_mean = Some(Tensor::zeros(vec![c]));
        self.moving_variance = Some(Tensor::ones(vec![c]));
        Ok(())
    }

    fn is_built(&self) -> bool {
        self.gamma.is_some()
    }

    fn forward(&mut self, input: &Tensor<f64>, training: bool) -> NnResult<Tensor<f64>> {
        let axis = self.feature_axis(input.shape())?;
        let (gamma, beta, moving_mean, moving_var) = match (
            &self.gamma,
            &self.beta,
            &mut self.moving_mean,
            &mut self.moving_variance,
        ) {
            (Some(g), Some(b), Some(m), Some(v)) => (g, b, m, v),
            _ => return Err(NnError::NotBuilt),
        };

        let dims = input.shape().dims();
        let c = dims[axis];
        if c != gamma.numel() {
            return Err(NnError::ShapeMismatch {
                expected: Shape::new(vec![gamma.numel()]),
                got: Shape::new(vec![c]),
            });
        }
        // View the input as [outer, c, inner].
        let outer: usize = dims[..axis].iter().product();
        let inner: usize = dims[axis + 1..].iter().product();
        let x = input.data();

        let (mean, var) = if training {
            let count = (outer * inner) as f64;
            let mut mean = vec![0.0; c];
            let mut var = vec![0.0; c];
            for o in 0..outer {
                for (ch, m) in mean.iter_mut().enumerate() {
                    let start = (o * c + ch) * inner;
                    *m += x[start..start + inner].iter().sum::<f64>();
                }
            }
            mean.iter_mut().for_each(|m| *m /= count);
            for o in 0..outer {
                for ch in 0..c {
                    let start = (o * c + ch) * inner;
                    var[ch] += x[start..start + inner].iter().map(|&v| (v - mean[ch]).powi(2)).sum::<f64>();
                }
            }
            var.iter_mut().for_each(|v| *v /= count);

            let momentum = self.momentum;
            for (running, &batch) in moving_mean.data_mut().iter_mut().zip(&mean) {
                *running = momentum * *running + (1.0 - momentum) * batch;
            }
            for (running, &batch) in moving_var.data_mut().iter_mut().zip(&var) {
                *running = momentum * *running + (1.0 - momentum) * batch;
            }
            (mean, var)
        } else {
            (moving_mean.data().to_vec(), moving_var.data().to_vec())
        };

        let mut out = Vec::with_capacity(input.numel());
        for o in 0..outer {
            for ch in 0..c {
                let inv_std = 1.0 / (var[ch] + self.epsilon).sqrt();
                let (g, b) = (gamma.data()[ch], beta.data()[ch]);
                let start = (o * c + ch) * inner;
                out.extend(x[start..start + inner].iter().map(|&v| (v - mean[ch]) * inv_std * g + b));
            }
        }
        Ok(Tensor::new(out, input.shape_vec())?)
    }

    /// γ and β are trainable; the moving statistics are not.
    fn parameter_count(&self, input: &Shape) -> NnResult<ParamCount> {
        let c = self.features(input)?;
        Ok(ParamCount { trainable: 2 * c, non_trainable: 2 * c })
    }

    fn parameters(&self) -> Vec<&Tensor<f64>> {
        self.gamma.iter().chain(self.beta.iter()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn test_dense_shapes_and_params() {
        let dense = Dense::new(4096);
        let input = Shape::new(vec![9216]);
        assert_eq!(dense.output_shape(&input).unwrap().dims(), &[4096]);
        assert_eq!(dense.parameter_count(&input).unwrap().total(), 9216 * 4096 + 4096);
        assert!(dense.output_shape(&Shape::scalar()).is_err());
    }

    #[test]
    fn test_dense_forward() {
        let mut dense = Dense::new(3);
        assert!(matches!(dense.forward(&Tensor::zeros(vec![2, 4]), false), Err(NnError::NotBuilt)));

        dense.build(&Shape::new(vec![4]), &mut rng()).unwrap();
        let out = dense.forward(&Tensor::ones(vec![2, 4]), false).unwrap();
        assert_eq!(out.shape_vec(), vec![2, 3]);
        assert!(dense.forward(&Tensor::ones(vec![2, 5]), false).is_err());
    }

    #[test]
    fn test_dense_regularization() {
        let mut dense = Dense::new(2).with_kernel_regularizer(crate::regularizers::l2(0.5));
        assert_eq!(dense.regularization_penalty(), 0.0);
        dense.build(&Shape::new(vec![3]), &mut rng()).unwrap();
        let expected = 0.5 * dense.weight().unwrap().sum_squares();
        assert_relative_eq!(dense.regularization_penalty(), expected);
    }

    #[test]
    fn test_activation_softmax() {
        let mut act = Activation::softmax();
        let x = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]).unwrap();
        let y = act.forward(&x, false).unwrap();
        assert_relative_eq!(y.data()[0] + y.data()[1], 1.0, epsilon = 1e-12);

        let mut relu = Activation::relu();
        let y = relu.forward(&Tensor::from_slice(&[-1.0, 2.0]), false).unwrap();
        assert_eq!(y.data(), &[0.0, 2.0]);
    }

    #[test]
    fn test_dropout_modes() {
        let mut dropout = Dropout::new(0.5);
        let x = Tensor::ones(vec![4, 256]);
        // inference is identity even before build
        assert_eq!(dropout.forward(&x, false).unwrap(), x);
        assert!(matches!(dropout.forward(&x, true), Err(NnError::NotBuilt)));

        dropout.build(&Shape::new(vec![256]), &mut rng()).unwrap();
        let y = dropout.forward(&x, true).unwrap();
        let zeros = y.data().iter().filter(|&&v| v == 0.0).count();
        assert!(zeros > 384 && zeros < 640, "dropped {zeros} of 1024");
        assert!(y.data().iter().all(|&v| v == 0.0 || v == 2.0));
    }

    #[test]
    fn test_flatten_channels_first_order() {
        // [1, 2, 1, 2]: channels-first, two channels of 1x2
        let x = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![1, 2, 1, 2]).unwrap();
        let mut last = Flatten::new();
        assert_eq!(last.forward(&x, false).unwrap().data(), &[1.0, 2.0, 3.0, 4.0]);
        let mut first = Flatten::new().with_data_format(ImageDataFormat::ChannelsFirst);
        let y = first.forward(&x, false).unwrap();
        assert_eq!(y.shape_vec(), vec![1, 4]);
        assert_eq!(y.data(), &[1.0, 3.0, 2.0, 4.0]);
        assert_eq!(first.output_shape(&Shape::new(vec![256, 6, 6])).unwrap().dims(), &[9216]);
    }

    #[test]
    fn test_batchnorm_axis_resolution() {
        let input = Shape::new(vec![13, 13, 256]);
        assert_eq!(BatchNorm::new(-1).parameter_count(&input).unwrap(), ParamCount {
            trainable: 512,
            non_trainable: 512,
        });
        let channels_first = Shape::new(vec![256, 13, 13]);
        assert_eq!(BatchNorm::new(1).parameter_count(&channels_first).unwrap().trainable, 512);
        assert!(matches!(
            BatchNorm::new(0).output_shape(&input),
            Err(NnError::InvalidAxis { axis: 0, .. })
        ));
        assert!(BatchNorm::new(5).output_shape(&input).is_err());
    }

    #[test]
    fn test_batchnorm_training_normalizes() {
        let mut bn = BatchNorm::new(-1);
        bn.build(&Shape::new(vec![2]), &mut rng()).unwrap();
        let x = Tensor::new(vec![1.0, 10.0, 3.0, 20.0, 5.0, 30.0], vec![3, 2]).unwrap();
        let y = bn.forward(&x, true).unwrap();
        let col0: f64 = [0, 2, 4].iter().map(|&i| y.data()[i]).sum();
        assert_relative_eq!(col0, 0.0, epsilon = 1e-9);
        // moving mean moved 1% toward the batch mean (3.0, 20.0)
        let mm = bn.moving_mean().unwrap();
        assert_relative_eq!(mm.data()[0], 0.03, epsilon = 1e-12);
        assert_relative_eq!(mm.data()[1], 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_batchnorm_inference_uses_moving_stats() {
        let mut bn = BatchNorm::new(1);
        bn.build(&Shape::new(vec![3, 2, 2]), &mut rng()).unwrap();
        let x = Tensor::full(vec![2, 3, 2, 2], 2.0);
        let y = bn.forward(&x, false).unwrap();
        // mean 0, variance 1
        assert_relative_eq!(y.data()[0], 2.0 / (1.0f64 + 1e-3).sqrt(), epsilon = 1e-12);
        assert_eq!(bn.moving_mean().unwrap().data(), &[0.0, 0.0, 0.0]);
    }
}
