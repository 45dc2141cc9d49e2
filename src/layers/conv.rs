use super::{batch_of, Activation, LayerSpec};
use crate::cl_util::{KernelCall, Program, Queue};
use crate::error::{Error, Result};
use crate::geometry::{ImageGeometry, Window};
use crate::math::AccelTensor;
use crate::network::{BackpropStorage, ConvolutionStorage};
use rand::Rng;

/// The learnable part of a convolutional layer: one `(k_h x k_w)` kernel per (output feature,
/// input channel) pair and one bias per output feature.
#[derive(Debug)]
pub struct Filter {
    /// (k_h, k_w, features * channels), kernel of feature `f` and channel `c` at depth
    /// `f * channels + c`
    weights: AccelTensor,
    /// (features, 1, 1)
    bias: AccelTensor,
}

impl Filter {
    pub fn weights(&self) -> &AccelTensor {
        &self.weights
    }
    pub fn bias(&self) -> &AccelTensor {
        &self.bias
    }
    pub(crate) fn params_mut(&mut self) -> Vec<&mut AccelTensor> {
        vec![&mut self.weights, &mut self.bias]
    }
}

/// A 2D convolution with square stride and symmetric zero padding.
#[derive(Debug)]
pub struct ConvolutionLayer {
    input: ImageGeometry,
    output: ImageGeometry,
    window: Window,
    activation: Activation,
    filter: Filter,
}

impl ConvolutionLayer {
    pub fn new<R: Rng>(
        input: ImageGeometry,
        output: ImageGeometry,
        features: usize,
        window: Window,
        activation: Activation,
        queue: &Queue,
        rng: &mut R,
    ) -> Result<ConvolutionLayer> {
        let taps = window.num_elems();
        let bound = (6.0 / ((input.channels() + features) * taps) as f32).sqrt();
        trace!(
            "\t↳ filter: {}x{}x{}x{}, stride: {}, padding: {}.",
            features,
            input.channels(),
            window.rows(),
            window.cols(),
            window.stride(),
            window.padding()
        );
        let filter = Filter {
            weights: AccelTensor::uniform(
                window.rows(),
                window.cols(),
                features * input.channels(),
                bound,
                rng,
                queue,
            )?,
            bias: AccelTensor::zeros(features, 1, 1, queue)?,
        };
        Ok(ConvolutionLayer {
            input,
            output,
            window,
            activation,
            filter,
        })
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }
    pub(crate) fn filter_mut(&mut self) -> &mut Filter {
        &mut self.filter
    }
    pub(crate) fn share(&self) -> ConvolutionLayer {
        ConvolutionLayer {
            input: self.input,
            output: self.output,
            window: self.window,
            activation: self.activation,
            filter: Filter {
                weights: self.filter.weights.view(),
                bias: self.filter.bias.view(),
            },
        }
    }
    pub fn features(&self) -> usize {
        self.output.channels()
    }
    pub fn window(&self) -> Window {
        self.window
    }

    pub fn spec(&self) -> LayerSpec {
        LayerSpec::Convolution {
            features: self.features(),
            window: self.window,
            activation: self.activation,
        }
    }
    pub fn input_geometry(&self) -> ImageGeometry {
        self.input
    }
    pub fn output_geometry(&self) -> ImageGeometry {
        self.output
    }

    /// Appends the ten dimension arguments shared by the convolution kernels.
    fn dims<'a>(&self, call: KernelCall<'a>) -> KernelCall<'a> {
        call.uint(self.input.channels())
            .uint(self.output.channels())
            .uint(self.input.rows())
            .uint(self.input.cols())
            .uint(self.window.rows())
            .uint(self.window.cols())
            .uint(self.window.stride())
            .uint(self.window.padding())
            .uint(self.output.rows())
            .uint(self.output.cols())
    }

    pub(crate) fn forward(
        &self,
        input: &AccelTensor,
        queue: &Queue,
        record: bool,
    ) -> Result<(AccelTensor, Option<BackpropStorage>)> {
        let batch = batch_of(input, &self.input)?;
        let x = input.reshape(
            self.input.rows(),
            self.input.cols(),
            batch * self.input.channels(),
        )?;
        let depth = batch * self.output.channels();
        let z = AccelTensor::zeros(self.output.rows(), self.output.cols(), depth, queue)?;

        let (in_buf, in_off, in_len) = x.arg();
        let (w_buf, w_off, w_len) = self.filter.weights.arg();
        let (b_buf, b_off, b_len) = self.filter.bias.arg();
        let (z_buf, z_off, z_len) = z.arg();
        let call = KernelCall::new(Program::Convolution, "conv_forward")
            .global([self.output.cols(), self.output.rows(), depth])
            .buffer(in_buf, in_off, in_len)
            .buffer(w_buf, w_off, w_len)
            .buffer(b_buf, b_off, b_len)
            .buffer(z_buf, z_off, z_len);
        queue.run(self.dims(call), false)?;

        let output = self.activation.forward(&z, queue, false)?;
        let storage = if record {
            Some(BackpropStorage::Convolution(ConvolutionStorage {
                input_shape: input.shape(),
                input: x,
                preactivation: z,
            }))
        } else {
            None
        };
        Ok((output, storage))
    }

    pub(crate) fn backward(
        &self,
        output_gradient: &AccelTensor,
        storage: ConvolutionStorage,
        queue: &Queue,
    ) -> Result<(AccelTensor, Vec<AccelTensor>)> {
        let ConvolutionStorage {
            input_shape,
            input,
            preactivation,
        } = storage;
        if output_gradient.len() != preactivation.len() {
            return Err(Error::shape_mismatch(
                "convolution backward",
                preactivation.shape(),
                output_gradient.shape(),
            ));
        }
        let (c_in, c_out) = (self.input.channels(), self.output.channels());
        let batch = preactivation.depth() / c_out;
        let (out_h, out_w, out_depth) = preactivation.shape();
        let g = output_gradient.reshape(out_h, out_w, out_depth)?;
        let delta = g.hadamard(
            &self.activation.derivative_of(&preactivation, queue, false)?,
            queue,
            false,
        )?;
        let (d_buf, d_off, d_len) = delta.arg();
        let (in_buf, in_off, in_len) = input.arg();
        let (w_buf, w_off, w_len) = self.filter.weights.arg();

        let weights_grad = AccelTensor::zeros(
            self.window.rows(),
            self.window.cols(),
            c_out * c_in,
            queue,
        )?;
        let (dw_buf, dw_off, dw_len) = weights_grad.arg();
        let call = KernelCall::new(Program::Convolution, "conv_backward_weights")
            .global([self.window.cols(), self.window.rows(), c_out * c_in])
            .buffer(in_buf, in_off, in_len)
            .buffer(d_buf, d_off, d_len)
            .buffer(dw_buf, dw_off, dw_len)
            .uint(batch);
        queue.run(self.dims(call), false)?;

        let bias_grad = AccelTensor::zeros(c_out, 1, 1, queue)?;
        let (db_buf, db_off, db_len) = bias_grad.arg();
        let call = KernelCall::new(Program::Convolution, "conv_backward_bias")
            .global([c_out, 1, 1])
            .buffer(d_buf, d_off, d_len)
            .buffer(db_buf, db_off, db_len)
            .uint(batch)
            .uint(c_out)
            .uint(out_h)
            .uint(out_w);
        queue.run(call, false)?;

        let input_grad =
            AccelTensor::zeros(self.input.rows(), self.input.cols(), batch * c_in, queue)?;
        let (di_buf, di_off, di_len) = input_grad.arg();
        let call = KernelCall::new(Program::Convolution, "conv_backward_input")
            .global([self.input.cols(), self.input.rows(), batch * c_in])
            .buffer(d_buf, d_off, d_len)
            .buffer(w_buf, w_off, w_len)
            .buffer(di_buf, di_off, di_len);
        queue.run(self.dims(call), false)?;

        let (rows, cols, depth) = input_shape;
        Ok((
            input_grad.reshape(rows, cols, depth)?,
            vec![weights_grad, bias_grad],
        ))
    }
}
