//! Training and inference of feed-forward and convolutional neural networks on OpenCL devices,
//! or on the built-in host executor.
extern crate byteorder;
extern crate env_logger;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;
#[cfg(feature = "opencl")]
extern crate ocl;

pub mod cl_util;
pub mod config;
pub mod controller;
pub mod dataset;
pub mod error;
pub mod geometry;
pub mod layers;
pub mod math;
pub mod model;
pub mod network;
pub mod optimizer;
pub mod util;
#[cfg(test)]
mod tests;

pub use crate::cl_util::{DeviceContext, Queue};
pub use crate::config::DeviceConfig;
pub use crate::error::{Error, Result};
pub use crate::geometry::{ImageGeometry, Window};
pub use crate::layers::{Activation, LayerSpec, PoolingKind};
pub use crate::math::{AccelMatrix, AccelTensor};
pub use crate::model::Model;
pub use crate::network::{DependencyGraph, InputRef, Topology};
pub use crate::optimizer::{BatchPolicy, Optimization, Optimizer};
