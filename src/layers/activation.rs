use crate::cl_util::{KernelCall, Program, Queue};
use crate::error::{Error, Result};
use crate::math::AccelTensor;
use std::fmt;
use std::str::FromStr;

/// Slope of the leaky ReLU for negative inputs.
pub const LEAKY_SLOPE: f32 = 0.01;

/// Element-wise activation functions. The discriminants are the codes the kernels switch on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Activation {
    Identity = 0,
    Sigmoid = 1,
    Relu = 2,
    LeakyRelu = 3,
    Tanh = 4,
    Square = 5,
}

const ALL: [Activation; 6] = [
    Activation::Identity,
    Activation::Sigmoid,
    Activation::Relu,
    Activation::LeakyRelu,
    Activation::Tanh,
    Activation::Square,
];

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

impl Activation {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Activation> {
        ALL.iter().cloned().find(|a| a.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            Activation::Identity => "identity",
            Activation::Sigmoid => "sigmoid",
            Activation::Relu => "relu",
            Activation::LeakyRelu => "leaky_relu",
            Activation::Tanh => "tanh",
            Activation::Square => "square",
        }
    }

    pub fn apply(self, x: f32) -> f32 {
        match self {
            Activation::Identity => x,
            Activation::Sigmoid => sigmoid(x),
            Activation::Relu => x.max(0.0),
            Activation::LeakyRelu => {
                if x > 0.0 {
                    x
                } else {
                    LEAKY_SLOPE * x
                }
            }
            Activation::Tanh => x.tanh(),
            Activation::Square => x * x,
        }
    }

    /// Derivative at the pre-activation value `x`. ReLU takes 0 at the origin.
    pub fn derivative(self, x: f32) -> f32 {
        match self {
            Activation::Identity => 1.0,
            Activation::Sigmoid => {
                let s = sigmoid(x);
                s * (1.0 - s)
            }
            Activation::Relu => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::LeakyRelu => {
                if x > 0.0 {
                    1.0
                } else {
                    LEAKY_SLOPE
                }
            }
            Activation::Tanh => 1.0 - x.tanh().powi(2),
            Activation::Square => 2.0 * x,
        }
    }

    fn launch(
        self,
        kernel: &'static str,
        input: &AccelTensor,
        queue: &Queue,
        blocking: bool,
    ) -> Result<AccelTensor> {
        let out = AccelTensor::zeros(input.rows(), input.cols(), input.depth(), queue)?;
        let n = input.len();
        let (src, src_off, _) = input.arg();
        let (dst, dst_off, _) = out.arg();
        let call = KernelCall::new(Program::Activation, kernel)
            .global([n, 1, 1])
            .buffer(src, src_off, n)
            .buffer(dst, dst_off, n)
            .uint(n)
            .uint(self.code() as usize);
        queue.run(call, blocking)?;
        Ok(out)
    }

    /// Applies the function to every element on the device.
    pub fn forward(self, input: &AccelTensor, queue: &Queue, blocking: bool) -> Result<AccelTensor> {
        if self == Activation::Identity {
            return AccelTensor::copy_of(input, queue, blocking);
        }
        self.launch("activate", input, queue, blocking)
    }

    /// Evaluates the derivative at every element of `preactivation` on the device.
    pub fn derivative_of(
        self,
        preactivation: &AccelTensor,
        queue: &Queue,
        blocking: bool,
    ) -> Result<AccelTensor> {
        self.launch("activate_derivative", preactivation, queue, blocking)
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Activation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Activation> {
        let name = s.trim().to_lowercase();
        ALL.iter()
            .cloned()
            .find(|a| a.name() == name)
            .ok_or_else(|| Error::Format(format!("unknown activation function \"{}\"", s)))
    }
}
