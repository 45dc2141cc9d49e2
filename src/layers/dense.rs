use super::{batch_of, Activation, LayerSpec};
use crate::cl_util::Queue;
use crate::error::{Error, Result};
use crate::geometry::ImageGeometry;
use crate::math::AccelTensor;
use crate::network::{BackpropStorage, DenseStorage};
use rand::Rng;

/// A fully-connected layer. The input is flattened per sample, so a dense layer may follow a
/// convolution or pooling layer directly.
#[derive(Debug)]
pub struct DenseLayer {
    input: ImageGeometry,
    activation: Activation,
    /// (outputs x inputs)
    weights: AccelTensor,
    /// (outputs x 1)
    bias: AccelTensor,
}

impl DenseLayer {
    /// Creates a layer with Xavier-uniform weights and zero biases.
    pub fn new<R: Rng>(
        input: ImageGeometry,
        outputs: usize,
        activation: Activation,
        queue: &Queue,
        rng: &mut R,
    ) -> Result<DenseLayer> {
        let inputs = input.num_elems();
        let bound = (6.0 / (inputs + outputs) as f32).sqrt();
        trace!(
            "\t↳ weights: {}x{} = {}, init bound: {}.",
            outputs,
            inputs,
            outputs * inputs,
            bound
        );
        Ok(DenseLayer {
            input,
            activation,
            weights: AccelTensor::uniform(outputs, inputs, 1, bound, rng, queue)?,
            bias: AccelTensor::zeros(outputs, 1, 1, queue)?,
        })
    }

    pub fn num_in(&self) -> usize {
        self.weights.cols()
    }
    pub fn num_out(&self) -> usize {
        self.weights.rows()
    }
    pub fn activation(&self) -> Activation {
        self.activation
    }
    pub fn weights(&self) -> &AccelTensor {
        &self.weights
    }
    pub fn bias(&self) -> &AccelTensor {
        &self.bias
    }
    pub(crate) fn params_mut(&mut self) -> Vec<&mut AccelTensor> {
        vec![&mut self.weights, &mut self.bias]
    }
    pub(crate) fn share(&self) -> DenseLayer {
        DenseLayer {
            input: self.input,
            activation: self.activation,
            weights: self.weights.view(),
            bias: self.bias.view(),
        }
    }

    pub fn spec(&self) -> LayerSpec {
        LayerSpec::Dense {
            outputs: self.num_out(),
            activation: self.activation,
        }
    }
    pub fn input_geometry(&self) -> ImageGeometry {
        self.input
    }
    pub fn output_geometry(&self) -> ImageGeometry {
        ImageGeometry::vector(self.num_out())
    }

    /// `act(W * x + b)` for every sample; the output is `(outputs, 1, batch)`.
    pub(crate) fn forward(
        &self,
        input: &AccelTensor,
        queue: &Queue,
        record: bool,
    ) -> Result<(AccelTensor, Option<BackpropStorage>)> {
        let batch = batch_of(input, &self.input)?;
        let x = input.reshape(self.num_in(), 1, batch)?;
        let z = AccelTensor::batched_gemm(1.0, &self.weights, false, &x, false, queue, false)?
            .add_broadcast(&self.bias.get_matrix(0)?, queue, false)?;
        let output = self.activation.forward(&z, queue, false)?;

        let storage = if record {
            Some(BackpropStorage::Dense(DenseStorage {
                input_shape: input.shape(),
                input: x,
                preactivation: z,
            }))
        } else {
            None
        };
        Ok((output, storage))
    }

    /// Returns `dL/dx` and `[dL/dW, dL/db]` summed over the batch.
    pub(crate) fn backward(
        &self,
        output_gradient: &AccelTensor,
        storage: DenseStorage,
        queue: &Queue,
    ) -> Result<(AccelTensor, Vec<AccelTensor>)> {
        let DenseStorage {
            input_shape,
            input,
            preactivation,
        } = storage;
        let batch = input.depth();
        if output_gradient.len() != preactivation.len() {
            return Err(Error::shape_mismatch(
                "dense backward",
                preactivation.shape(),
                output_gradient.shape(),
            ));
        }
        let g = output_gradient.reshape(self.num_out(), 1, batch)?;
        let delta = g.hadamard(
            &self.activation.derivative_of(&preactivation, queue, false)?,
            queue,
            false,
        )?;

        // The batch of column vectors is also a (batch x n) row-major matrix.
        let delta_rows = delta.reshape(batch, self.num_out(), 1)?;
        let input_rows = input.reshape(batch, self.num_in(), 1)?;
        let weights_grad =
            AccelTensor::batched_gemm(1.0, &delta_rows, true, &input_rows, false, queue, false)?;
        let bias_grad = delta.sum_collapse(queue, false)?;

        let input_grad =
            AccelTensor::batched_gemm(1.0, &self.weights, true, &delta, false, queue, false)?;
        let (rows, cols, depth) = input_shape;
        Ok((
            input_grad.reshape(rows, cols, depth)?,
            vec![weights_grad, bias_grad],
        ))
    }
}
