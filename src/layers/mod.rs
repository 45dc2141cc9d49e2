//! The closed set of layer kinds and their forward/backward computations.
mod activation;
mod conv;
mod dense;
mod pooling;
#[cfg(test)]
mod test;

pub use self::activation::*;
pub use self::conv::*;
pub use self::dense::*;
pub use self::pooling::*;

use crate::cl_util::Queue;
use crate::error::{Error, Result};
use crate::geometry::{ImageGeometry, Window};
use crate::math::AccelTensor;
use crate::network::BackpropStorage;
use rand::Rng;

/// Declarative description of a layer: its kind and hyper-parameters.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum LayerSpec {
    Dense {
        outputs: usize,
        activation: Activation,
    },
    Convolution {
        features: usize,
        window: Window,
        activation: Activation,
    },
    Pooling {
        kind: PoolingKind,
        window: Window,
    },
}

/// Upper bound on the elements of one sample's layer output and of one parameter tensor.
pub const MAX_LAYER_ELEMS: usize = 1 << 28;

fn check_size(what: &str, elems: Option<usize>) -> Result<()> {
    match elems {
        Some(n) if n <= MAX_LAYER_ELEMS => Ok(()),
        _ => Err(Error::Topology(format!(
            "{} exceeds {} elements",
            what, MAX_LAYER_ELEMS
        ))),
    }
}

impl LayerSpec {
    /// Geometry the layer produces from `input`. Fails for hyper-parameters that do not fit the
    /// input and for layers with more than `MAX_LAYER_ELEMS` outputs or weights per tensor.
    ///
    /// A pooling window must lie inside the unpadded input. Positions that would need a partial
    /// window at the far edges are not produced, so trailing rows and columns that no window
    /// reaches are dropped and receive no gradient.
    pub fn output_geometry(&self, input: &ImageGeometry) -> Result<ImageGeometry> {
        let output = match *self {
            LayerSpec::Dense { outputs, .. } => {
                if outputs == 0 || input.num_elems() == 0 {
                    return Err(Error::Topology(format!(
                        "dense layer {} -> {} has no weights",
                        input, outputs
                    )));
                }
                check_size("dense weights", outputs.checked_mul(input.num_elems()))?;
                ImageGeometry::vector(outputs)
            }
            LayerSpec::Convolution {
                features, window, ..
            } => {
                if features == 0 {
                    return Err(Error::Topology("convolution without features".to_owned()));
                }
                check_size(
                    "convolution filter",
                    window
                        .num_elems()
                        .checked_mul(features)
                        .and_then(|n| n.checked_mul(input.channels())),
                )?;
                window.output_of(input, features).ok_or_else(|| {
                    Error::Topology(format!(
                        "convolution filter {:?} does not fit input {}",
                        window, input
                    ))
                })?
            }
            LayerSpec::Pooling { kind, window } => {
                if input.plane() > MAX_POOLING_PLANE {
                    return Err(Error::Topology(format!(
                        "{} pooling over {} exceeds {} positions per plane",
                        kind, input, MAX_POOLING_PLANE
                    )));
                }
                match window.output_of(input, input.channels()) {
                    Some(output) if window.padding() == 0 => output,
                    _ => {
                        return Err(Error::Topology(format!(
                            "{} pooling window {:?} reads past the boundary of input {}",
                            kind, window, input
                        )))
                    }
                }
            }
        };
        check_size("layer output", Some(output.num_elems()))?;
        Ok(output)
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            LayerSpec::Dense { .. } => "dense",
            LayerSpec::Convolution { .. } => "convolution",
            LayerSpec::Pooling { .. } => "pooling",
        }
    }
}

/// A layer with its parameters allocated on the device.
#[derive(Debug)]
pub enum Layer {
    Dense(DenseLayer),
    Convolution(ConvolutionLayer),
    Pooling(PoolingLayer),
}

impl Layer {
    /// Allocates a layer for `input`, drawing initial weights from `rng`.
    pub fn new<R: Rng>(
        spec: &LayerSpec,
        input: ImageGeometry,
        queue: &Queue,
        rng: &mut R,
    ) -> Result<Layer> {
        let output = spec.output_geometry(&input)?;
        debug!("Create {} layer {} -> {}.", spec.kind_name(), input, output);
        Ok(match *spec {
            LayerSpec::Dense {
                outputs,
                activation,
            } => Layer::Dense(DenseLayer::new(input, outputs, activation, queue, rng)?),
            LayerSpec::Convolution {
                features,
                window,
                activation,
            } => Layer::Convolution(ConvolutionLayer::new(
                input, output, features, window, activation, queue, rng,
            )?),
            LayerSpec::Pooling { kind, window } => {
                Layer::Pooling(PoolingLayer::new(kind, input, output, window))
            }
        })
    }

    pub fn spec(&self) -> LayerSpec {
        match self {
            Layer::Dense(l) => l.spec(),
            Layer::Convolution(l) => l.spec(),
            Layer::Pooling(l) => l.spec(),
        }
    }

    pub fn input_geometry(&self) -> ImageGeometry {
        match self {
            Layer::Dense(l) => l.input_geometry(),
            Layer::Convolution(l) => l.input_geometry(),
            Layer::Pooling(l) => l.input_geometry(),
        }
    }

    pub fn output_geometry(&self) -> ImageGeometry {
        match self {
            Layer::Dense(l) => l.output_geometry(),
            Layer::Convolution(l) => l.output_geometry(),
            Layer::Pooling(l) => l.output_geometry(),
        }
    }

    /// Inference forward pass over the element-wise sum of `inputs`.
    pub fn forward(&self, inputs: &[&AccelTensor], queue: &Queue) -> Result<AccelTensor> {
        let input = merge_inputs(inputs, queue)?;
        Ok(self.forward_impl(&input, queue, false)?.0)
    }

    /// Training forward pass; also returns what the backward pass needs.
    pub fn forward_train(
        &self,
        inputs: &[&AccelTensor],
        queue: &Queue,
    ) -> Result<(AccelTensor, BackpropStorage)> {
        let input = merge_inputs(inputs, queue)?;
        match self.forward_impl(&input, queue, true)? {
            (output, Some(storage)) => Ok((output, storage)),
            (_, None) => Err(Error::Device(format!(
                "{} layer recorded no backprop storage",
                self.spec().kind_name()
            ))),
        }
    }

    fn forward_impl(
        &self,
        input: &AccelTensor,
        queue: &Queue,
        record: bool,
    ) -> Result<(AccelTensor, Option<BackpropStorage>)> {
        match self {
            Layer::Dense(l) => l.forward(input, queue, record),
            Layer::Convolution(l) => l.forward(input, queue, record),
            Layer::Pooling(l) => l.forward(input, queue, record),
        }
    }

    /// Returns the gradient with respect to the (merged) input, shaped like the input, and one
    /// gradient per parameter, shaped like the parameter.
    pub fn backward(
        &self,
        output_gradient: &AccelTensor,
        storage: BackpropStorage,
        queue: &Queue,
    ) -> Result<(AccelTensor, Vec<AccelTensor>)> {
        match (self, storage) {
            (Layer::Dense(l), BackpropStorage::Dense(s)) => l.backward(output_gradient, s, queue),
            (Layer::Convolution(l), BackpropStorage::Convolution(s)) => {
                l.backward(output_gradient, s, queue)
            }
            (Layer::Pooling(l), BackpropStorage::Pooling(s)) => {
                Ok((l.backward(output_gradient, s, queue)?, Vec::new()))
            }
            (layer, storage) => Err(Error::Device(format!(
                "{} layer cannot consume {} storage",
                layer.spec().kind_name(),
                storage.kind()
            ))),
        }
    }

    /// Parameters in a fixed slot order.
    pub fn params(&self) -> Vec<&AccelTensor> {
        match self {
            Layer::Dense(l) => vec![l.weights(), l.bias()],
            Layer::Convolution(l) => vec![l.filter().weights(), l.filter().bias()],
            Layer::Pooling(_) => Vec::new(),
        }
    }

    /// A layer with the same hyper-parameters whose parameters alias this layer's.
    pub(crate) fn share(&self) -> Layer {
        match self {
            Layer::Dense(l) => Layer::Dense(l.share()),
            Layer::Convolution(l) => Layer::Convolution(l.share()),
            Layer::Pooling(l) => Layer::Pooling(l.share()),
        }
    }

    pub fn params_mut(&mut self) -> Vec<&mut AccelTensor> {
        match self {
            Layer::Dense(l) => l.params_mut(),
            Layer::Convolution(l) => l.filter_mut().params_mut(),
            Layer::Pooling(_) => Vec::new(),
        }
    }

    /// Overwrites parameter `slot` with host data.
    pub fn load_param(&mut self, slot: usize, data: &[f32], queue: &Queue) -> Result<()> {
        let mut params = self.params_mut();
        let len = params.len();
        let param = params
            .get_mut(slot)
            .ok_or(Error::IndexOutOfRange { index: slot, len })?;
        param.write_host(data, queue)
    }
}

/// Sums the inputs of a node element-wise. A single input is passed through as a view.
pub fn merge_inputs(inputs: &[&AccelTensor], queue: &Queue) -> Result<AccelTensor> {
    let (first, rest) = inputs
        .split_first()
        .ok_or_else(|| Error::Topology("layer invoked without inputs".to_owned()))?;
    let mut merged = first.view();
    for input in rest {
        merged = merged.add(input, queue, false)?;
    }
    Ok(merged)
}

/// Number of samples in `input` for a layer expecting `geometry`. The tensor must hold
/// `channels` matrices of (rows x cols) per sample, or be any reshaping of that.
pub(crate) fn batch_of(input: &AccelTensor, geometry: &ImageGeometry) -> Result<usize> {
    let per_sample = geometry.num_elems();
    if per_sample == 0 || input.len() % per_sample != 0 {
        return Err(Error::shape_mismatch(
            "layer input",
            geometry.to_string(),
            input.shape(),
        ));
    }
    Ok(input.len() / per_sample)
}
