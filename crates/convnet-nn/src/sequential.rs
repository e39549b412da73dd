use convnet_core::{Shape, Tensor};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{NnError, NnResult};
use crate::layers::{Layer, ParamCount};
use crate::spec::{LayerKind, LayerSpec};
use crate::summary::{ModelSummary, SummaryRow};

#[derive(Debug)]
struct LayerEntry {
    name: String,
    layer: Box<dyn Layer>,
}

/// JSON form of an architecture: the layer list, no weights.
#[derive(Serialize, Deserialize)]
struct Architecture {
    layers: Vec<LayerSpec>,
}

/// Layers applied one after another.
///
/// Layers are attached unbuilt. Shapes are inferred from the first layer's
/// declared input shape, and weights exist only after [`Sequential::build`].
#[derive(Debug, Default)]
pub struct Sequential {
    entries: Vec<LayerEntry>,
}

impl Sequential {
    pub fn new() -> Self {
        Sequential { entries: Vec::new() }
    }

    /// Add a layer to the model.
    pub fn add(mut self, layer: Box<dyn Layer>) -> Self {
        self.push(layer);
        self
    }

    /// Append a layer, naming it after its kind (`dense`, `dense_1`, ..).
    pub fn push(&mut self, layer: Box<dyn Layer>) {
        let base = layer.spec().kind().base_name();
        let seen = self
            .entries
            .iter()
            .filter(|e| e.layer.spec().kind().base_name() == base)
            .count();
        let name = if seen == 0 { base.to_string() } else { format!("{base}_{seen}") };
        debug!("layer {}: {} {:?}", self.entries.len(), name, layer.spec());
        self.entries.push(LayerEntry { name, layer });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn layers(&self) -> impl Iterator<Item = &dyn Layer> + '_ {
        self.entries.iter().map(|e| e.layer.as_ref())
    }

    pub fn layer(&self, index: usize) -> Option<&dyn Layer> {
        self.entries.get(index).map(|e| e.layer.as_ref())
    }

    pub fn specs(&self) -> Vec<LayerSpec> {
        self.layers().map(|l| l.spec()).collect()
    }

    /// The topology: layer kinds in order.
    pub fn kinds(&self) -> Vec<LayerKind> {
        self.layers().map(|l| l.spec().kind()).collect()
    }

    /// Per-sample input shape declared on the first layer.
    pub fn input_shape(&self) -> Option<&Shape> {
        self.entries.first().and_then(|e| e.layer.declared_input_shape())
    }

    fn require_input_shape(&self) -> NnResult<&Shape> {
        if self.entries.is_empty() {
            return Err(NnError::EmptyModel);
        }
        self.input_shape().ok_or(NnError::MissingInputShape)
    }

    /// Output shape after every layer, in order.
    pub fn infer_shapes(&self) -> NnResult<Vec<Shape>> {
        let mut shape = self.require_input_shape()?.clone();
        let mut shapes = Vec::with_capacity(self.entries.len());
        for (index, entry) in self.entries.iter().enumerate() {
            shape = entry
                .layer
                .output_shape(&shape)
                .map_err(|e| e.in_layer(index, &entry.name))?;
            shapes.push(shape.clone());
        }
        Ok(shapes)
    }

    pub fn output_shape(&self) -> NnResult<Shape> {
        let shapes = self.infer_shapes()?;
        shapes.last().cloned().ok_or(NnError::EmptyModel)
    }

    pub fn summary(&self) -> NnResult<ModelSummary> {
        let input_shape = self.require_input_shape()?.clone();
        let mut shape = input_shape.clone();
        let mut rows = Vec::with_capacity(self.entries.len());
        for (index, entry) in self.entries.iter().enumerate() {
            let in_layer = |e: NnError| e.in_layer(index, &entry.name);
            let params = entry.layer.parameter_count(&shape).map_err(in_layer)?;
            let output_shape = entry.layer.output_shape(&shape).map_err(in_layer)?;
            rows.push(SummaryRow {
                name: entry.name.clone(),
                kind: entry.layer.spec().kind(),
                output_shape: output_shape.clone(),
                params,
            });
            shape = output_shape;
        }
        Ok(ModelSummary { input_shape, rows })
    }

    pub fn count_params(&self) -> NnResult<ParamCount> {
        Ok(self.summary()?.params())
    }

    /// Allocate every layer's weights from a seeded generator.
    pub fn build(&mut self, seed: u64) -> NnResult<()> {
        let mut shape = self.require_input_shape()?.clone();
        let mut rng = StdRng::seed_from_u64(seed);
        for (index, entry) in self.entries.iter_mut().enumerate() {
            let name = &entry.name;
            entry
                .layer
                .build(&shape, &mut rng)
                .map_err(|e| e.in_layer(index, name))?;
            shape = entry
                .layer
                .output_shape(&shape)
                .map_err(|e| e.in_layer(index, name))?;
        }
        info!("built {} layers, output shape {}", self.entries.len(), shape);
        Ok(())
    }

    pub fn is_built(&self) -> bool {
        !self.entries.is_empty() && self.layers().all(|l| l.is_built())
    }

    /// Forward pass through all layers. `input` carries the batch axis first.
    pub fn forward(&mut self, input: &Tensor<f64>, training: bool) -> NnResult<Tensor<f64>> {
        let expected = self.require_input_shape()?;
        let got = input.shape().without_batch();
        if input.ndim() == 0 || &got != expected {
            return Err(NnError::ShapeMismatch {
                expected: expected.clone(),
                got,
            });
        }

        let mut x = input.clone();
        for (index, entry) in self.entries.iter_mut().enumerate() {
            x = entry
                .layer
                .forward(&x, training)
                .map_err(|e| e.in_layer(index, &entry.name))?;
        }
        Ok(x)
    }

    /// Sum of all regularizer penalties over built weights.
    pub fn regularization_loss(&self) -> f64 {
        self.layers().map(|l| l.regularization_penalty()).sum()
    }

    /// Collect all trainable parameters from all layers.
    pub fn parameters(&self) -> Vec<&Tensor<f64>> {
        self.layers().flat_map(|l| l.parameters()).collect()
    }

    /// JSON description of the architecture (layer kinds and hyperparameters).
    pub fn to_json(&self) -> NnResult<String> {
        let arch = Architecture { layers: self.specs() };
        Ok(serde_json::to_string_pretty(&arch)?)
    }

    /// Recreate an unbuilt model from [`Sequential::to_json`] output.
    pub fn from_json(json: &str) -> NnResult<Self> {
        let arch: Architecture = serde_json::from_str(json)?;
        Ok(Self::from_specs(arch.layers))
    }

    pub fn from_specs(specs: impl IntoIterator<Item = LayerSpec>) -> Self {
        specs
            .into_iter()
            .fold(Sequential::new(), |model, spec| model.add(spec.into_layer()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conv::{Conv2D, MaxPool2D};
    use crate::layers::{Activation, BatchNorm, Dense, Dropout, Flatten};
    use crate::regularizers::l2;
    use crate::spec::{ActivationKind, Padding};
    use approx::assert_relative_eq;

    fn small_cnn() -> Sequential {
        Sequential::new()
            .add(Box::new(
                Conv2D::new(4, (3, 3))
                    .with_padding(Padding::Same)
                    .with_kernel_regularizer(l2(0.01))
                    .with_input_shape(vec![8, 8, 1]),
            ))
            .add(Box::new(Activation::relu()))
            .add(Box::new(BatchNorm::new(-1)))
            .add(Box::new(MaxPool2D::new((2, 2))))
            .add(Box::new(Dropout::new(0.25)))
            .add(Box::new(Flatten::new()))
            .add(Box::new(Dense::new(3).with_kernel_regularizer(l2(0.01))))
            .add(Box::new(Activation::softmax()))
    }

    #[test]
    fn test_naming() {
        let model = Sequential::new()
            .add(Box::new(Dense::new(4)))
            .add(Box::new(Activation::relu()))
            .add(Box::new(Dense::new(2)))
            .add(Box::new(Dense::new(1)));
        assert_eq!(model.names(), vec!["dense", "activation", "dense_1", "dense_2"]);
    }

    #[test]
    fn test_shape_inference() {
        let model = small_cnn();
        let shapes = model.infer_shapes().unwrap();
        assert_eq!(shapes.len(), model.len());
        assert_eq!(shapes[0].dims(), &[8, 8, 4]);
        assert_eq!(shapes[3].dims(), &[4, 4, 4]);
        assert_eq!(shapes[5].dims(), &[64]);
        assert_eq!(model.output_shape().unwrap().dims(), &[3]);
    }

    #[test]
    fn test_summary_counts() {
        let summary = small_cnn().summary().unwrap();
        let params = summary.params();
        // conv 3*3*1*4+4, bn 2*4 (+2*4), dense 64*3+3
        assert_eq!(params.trainable, 40 + 8 + 195);
        assert_eq!(params.non_trainable, 8);
        assert_eq!(summary.rows[0].name, "conv2d");
    }

    #[test]
    fn test_missing_input_shape() {
        assert!(matches!(Sequential::new().infer_shapes(), Err(NnError::EmptyModel)));
        let model = Sequential::new().add(Box::new(Dense::new(3)));
        assert!(matches!(model.summary(), Err(NnError::MissingInputShape)));
    }

    #[test]
    fn test_error_names_failing_layer() {
        let model = Sequential::new()
            .add(Box::new(Conv2D::new(4, (3, 3)).with_input_shape(vec![2, 2, 1])))
            .add(Box::new(Flatten::new()));
        match model.infer_shapes() {
            Err(NnError::Layer { index, name, source }) => {
                assert_eq!(index, 0);
                assert_eq!(name, "conv2d");
                assert!(matches!(*source, NnError::NegativeDimension { .. }));
            }
            other => panic!("expected a layer error, got {other:?}"),
        }
    }

    #[test]
    fn test_build_and_forward() {
        let mut model = small_cnn();
        let x = Tensor::ones(vec![2, 8, 8, 1]);
        assert!(!model.is_built());
        assert!(matches!(model.forward(&x, false), Err(NnError::Layer { index: 0, .. })));

        model.build(7).unwrap();
        assert!(model.is_built());
        let y = model.forward(&x, false).unwrap();
        assert_eq!(y.shape_vec(), vec![2, 3]);
        for row in y.data().chunks(3) {
            assert_relative_eq!(row.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
        }

        let y_train = model.forward(&x, true).unwrap();
        assert_eq!(y_train.shape_vec(), vec![2, 3]);

        let bad = Tensor::ones(vec![2, 8, 8, 3]);
        assert!(matches!(model.forward(&bad, false), Err(NnError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_build_is_deterministic() {
        let mut a = small_cnn();
        let mut b = small_cnn();
        a.build(3).unwrap();
        b.build(3).unwrap();
        assert_eq!(a.parameters(), b.parameters());
        assert!(a.regularization_loss() > 0.0);
        assert_relative_eq!(a.regularization_loss(), b.regularization_loss());
    }

    #[test]
    fn test_json_round_trip_preserves_specs() {
        let model = small_cnn();
        let json = model.to_json().unwrap();
        let rebuilt = Sequential::from_json(&json).unwrap();
        assert_eq!(rebuilt.specs(), model.specs());
        assert_eq!(rebuilt.names(), model.names());
        assert_eq!(
            rebuilt.kinds().last(),
            Some(&LayerKind::Activation(ActivationKind::Softmax))
        );
        assert!(json.contains("\"data_format\": \"channels_last\""));
        assert!(matches!(Sequential::from_json("{}"), Err(NnError::Json(_))));
    }
}
