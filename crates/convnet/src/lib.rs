//! # convnet
//!
//! Declarative convolutional classifier architectures in Rust.
//!
//! ## Modules
//!
//! - **core**: Tensor engine with shapes, broadcasting, reductions and softmax
//! - **nn**: Layers (Conv2D, MaxPool2D, BatchNorm, Dropout, Flatten, Dense), Sequential, backend config
//! - **models**: Ready-made architectures (AlexNet)
//!
//! ```no_run
//! use convnet::models::AlexNet;
//!
//! let model = AlexNet::build_default(227, 227, 3, 1000);
//! println!("{}", model.summary().unwrap());
//! ```

/// Core tensor engine.
pub use convnet_core as core;

/// Neural network layers and containers.
pub use convnet_nn as nn;

/// Architecture builders.
pub use convnet_models as models;
