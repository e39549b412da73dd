//! AlexNet with batch normalization and L2 weight decay.
//!
//! Three convolutional blocks, two fully connected blocks and a softmax
//! classifier. The returned model is unbuilt: shapes can be inspected with
//! [`Sequential::summary`] before any weights are allocated.

use convnet_nn::backend::{self, BackendConfig};
use convnet_nn::{
    l2, Activation, BatchNorm, Conv2D, Dense, Dropout, Flatten, MaxPool2D, Padding, Sequential,
};
use log::info;

/// Namespace for the AlexNet builder.
pub struct AlexNet;

impl AlexNet {
    /// L2 coefficient used by [`AlexNet::build_default`].
    pub const DEFAULT_REG: f64 = 0.0002;

    /// Build with the process-wide backend config.
    ///
    /// Inputs are not validated; an image too small for the stack surfaces as
    /// an error once shapes are inferred or weights built.
    pub fn build(width: usize, height: usize, depth: usize, classes: usize, reg: f64) -> Sequential {
        Self::build_with(&backend::config(), width, height, depth, classes, reg)
    }

    pub fn build_default(width: usize, height: usize, depth: usize, classes: usize) -> Sequential {
        Self::build(width, height, depth, classes, Self::DEFAULT_REG)
    }

    pub fn build_with(
        config: &BackendConfig,
        width: usize,
        height: usize,
        depth: usize,
        classes: usize,
        reg: f64,
    ) -> Sequential {
        let format = config.image_data_format;
        let input_shape = format.image_shape(height, width, depth);
        let chan_dim = format.channel_axis();

        let conv = |filters: usize, kernel: usize| {
            Conv2D::new(filters, (kernel, kernel))
                .with_padding(Padding::Same)
                .with_data_format(format)
                .with_kernel_regularizer(l2(reg))
        };
        let pool = || MaxPool2D::new((3, 3)).with_strides((2, 2)).with_data_format(format);
        let dense = |units: usize| Dense::new(units).with_kernel_regularizer(l2(reg));

        let model = Sequential::new()
            // Block 1: conv, relu, pool
            .add(Box::new(conv(96, 11).with_strides((4, 4)).with_input_shape(input_shape.clone())))
            .add(Box::new(Activation::relu()))
            .add(Box::new(BatchNorm::new(chan_dim)))
            .add(Box::new(pool()))
            .add(Box::new(Dropout::new(0.25)))
            // Block 2
            .add(Box::new(conv(256, 5)))
            .add(Box::new(Activation::relu()))
            .add(Box::new(BatchNorm::new(chan_dim)))
            .add(Box::new(pool()))
            .add(Box::new(Dropout::new(0.25)))
            // Block 3: three stacked convs before pooling
            .add(Box::new(conv(384, 3)))
            .add(Box::new(Activation::relu()))
            .add(Box::new(BatchNorm::new(chan_dim)))
            .add(Box::new(conv(384, 3)))
            .add(Box::new(Activation::relu()))
            .add(Box::new(BatchNorm::new(chan_dim)))
            .add(Box::new(conv(256, 3)))
            .add(Box::new(Activation::relu()))
            .add(Box::new(BatchNorm::new(chan_dim)))
            .add(Box::new(pool()))
            .add(Box::new(Dropout::new(0.25)))
            // Block 4: first fully connected set
            .add(Box::new(Flatten::new().with_data_format(format)))
            .add(Box::new(dense(4096)))
            .add(Box::new(Activation::relu()))
            .add(Box::new(BatchNorm::default()))
            .add(Box::new(Dropout::new(0.5)))
            // Block 5
            .add(Box::new(dense(4096)))
            .add(Box::new(Activation::relu()))
            .add(Box::new(BatchNorm::default()))
            .add(Box::new(Dropout::new(0.5)))
            // softmax classifier
            .add(Box::new(dense(classes)))
            .add(Box::new(Activation::softmax()));

        info!(
            "assembled AlexNet: input {} ({}), {} classes, {} layers",
            input_shape,
            format,
            classes,
            model.len()
        );
        model
    }
}
