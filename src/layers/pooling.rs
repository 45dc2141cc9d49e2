use super::{batch_of, LayerSpec};
use crate::cl_util::{KernelCall, Program, Queue};
use crate::error::{Error, Result};
use crate::geometry::{ImageGeometry, Window};
use crate::math::AccelTensor;
use crate::network::{BackpropStorage, PoolingStorage};
use std::fmt;
use std::str::FromStr;

/// Largest input plane a pooling layer accepts. Max pooling records the arg-max position within
/// the plane in an f32 buffer, which holds every integer up to 2^24 exactly.
pub const MAX_POOLING_PLANE: usize = 1 << 24;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PoolingKind {
    Max,
    Avg,
}

impl fmt::Display for PoolingKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            PoolingKind::Max => "max",
            PoolingKind::Avg => "avg",
        })
    }
}

impl FromStr for PoolingKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<PoolingKind> {
        match s.trim().to_lowercase().as_str() {
            "max" => Ok(PoolingKind::Max),
            "avg" | "average" => Ok(PoolingKind::Avg),
            _ => Err(Error::Format(format!("unknown pooling kind \"{}\"", s))),
        }
    }
}

/// Max or average pooling over every channel plane independently. Has no parameters.
#[derive(Debug)]
pub struct PoolingLayer {
    kind: PoolingKind,
    input: ImageGeometry,
    output: ImageGeometry,
    window: Window,
}

impl PoolingLayer {
    pub fn new(
        kind: PoolingKind,
        input: ImageGeometry,
        output: ImageGeometry,
        window: Window,
    ) -> PoolingLayer {
        PoolingLayer {
            kind,
            input,
            output,
            window,
        }
    }

    pub fn kind(&self) -> PoolingKind {
        self.kind
    }
    pub(crate) fn share(&self) -> PoolingLayer {
        PoolingLayer::new(self.kind, self.input, self.output, self.window)
    }
    pub fn spec(&self) -> LayerSpec {
        LayerSpec::Pooling {
            kind: self.kind,
            window: self.window,
        }
    }
    pub fn input_geometry(&self) -> ImageGeometry {
        self.input
    }
    pub fn output_geometry(&self) -> ImageGeometry {
        self.output
    }

    fn dims<'a>(&self, call: KernelCall<'a>) -> KernelCall<'a> {
        call.uint(self.input.rows())
            .uint(self.input.cols())
            .uint(self.window.rows())
            .uint(self.window.cols())
            .uint(self.window.stride())
            .uint(self.output.rows())
            .uint(self.output.cols())
    }

    pub(crate) fn forward(
        &self,
        input: &AccelTensor,
        queue: &Queue,
        record: bool,
    ) -> Result<(AccelTensor, Option<BackpropStorage>)> {
        let depth = batch_of(input, &self.input)? * self.input.channels();
        let x = input.reshape(self.input.rows(), self.input.cols(), depth)?;
        let output = AccelTensor::zeros(self.output.rows(), self.output.cols(), depth, queue)?;
        let global = [self.output.cols(), self.output.rows(), depth];
        let (in_buf, in_off, in_len) = x.arg();
        let (out_buf, out_off, out_len) = output.arg();

        let storage = match self.kind {
            PoolingKind::Max => {
                let argmax =
                    AccelTensor::zeros(self.output.rows(), self.output.cols(), depth, queue)?;
                let (arg_buf, arg_off, arg_len) = argmax.arg();
                let call = KernelCall::new(Program::Pooling, "max_pool_forward")
                    .global(global)
                    .buffer(in_buf, in_off, in_len)
                    .buffer(out_buf, out_off, out_len)
                    .buffer(arg_buf, arg_off, arg_len);
                queue.run(self.dims(call), false)?;
                PoolingStorage::Max {
                    input_shape: input.shape(),
                    argmax,
                }
            }
            PoolingKind::Avg => {
                let call = KernelCall::new(Program::Pooling, "avg_pool_forward")
                    .global(global)
                    .buffer(in_buf, in_off, in_len)
                    .buffer(out_buf, out_off, out_len);
                queue.run(self.dims(call), false)?;
                PoolingStorage::Avg {
                    input_shape: input.shape(),
                }
            }
        };
        let storage = if record {
            Some(BackpropStorage::Pooling(storage))
        } else {
            None
        };
        Ok((output, storage))
    }

    /// Routes the gradient of every window to its maximum, or spreads it evenly over the window.
    pub(crate) fn backward(
        &self,
        output_gradient: &AccelTensor,
        storage: PoolingStorage,
        queue: &Queue,
    ) -> Result<AccelTensor> {
        let depth = batch_of(output_gradient, &self.output)? * self.output.channels();
        let g = output_gradient.reshape(self.output.rows(), self.output.cols(), depth)?;
        let input_grad = AccelTensor::zeros(self.input.rows(), self.input.cols(), depth, queue)?;
        let global = [self.input.cols(), self.input.rows(), depth];
        let (g_buf, g_off, g_len) = g.arg();
        let (di_buf, di_off, di_len) = input_grad.arg();

        let input_shape = match storage {
            PoolingStorage::Max {
                input_shape,
                argmax,
            } => {
                if argmax.len() != g.len() {
                    return Err(Error::shape_mismatch(
                        "max pooling backward",
                        argmax.shape(),
                        g.shape(),
                    ));
                }
                let (arg_buf, arg_off, arg_len) = argmax.arg();
                let call = KernelCall::new(Program::Pooling, "max_pool_backward")
                    .global(global)
                    .buffer(g_buf, g_off, g_len)
                    .buffer(arg_buf, arg_off, arg_len)
                    .buffer(di_buf, di_off, di_len);
                queue.run(self.dims(call), false)?;
                input_shape
            }
            PoolingStorage::Avg { input_shape } => {
                let call = KernelCall::new(Program::Pooling, "avg_pool_backward")
                    .global(global)
                    .buffer(g_buf, g_off, g_len)
                    .buffer(di_buf, di_off, di_len);
                queue.run(self.dims(call), false)?;
                input_shape
            }
        };
        let (rows, cols, depth) = input_shape;
        input_grad.reshape(rows, cols, depth)
    }
}

impl PoolingKind {
    /// Tag used by the model file.
    pub(crate) fn tag(self) -> u32 {
        match self {
            PoolingKind::Max => 0,
            PoolingKind::Avg => 1,
        }
    }

    pub(crate) fn from_tag(tag: u32) -> Option<PoolingKind> {
        match tag {
            0 => Some(PoolingKind::Max),
            1 => Some(PoolingKind::Avg),
            _ => None,
        }
    }
}
