//! Ready-made architectures assembled from `convnet-nn` layers.

pub mod alexnet;

pub use alexnet::AlexNet;
