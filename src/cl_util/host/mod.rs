//! Host executor: runs the kernels of `src/cl` natively, one launch at a time, in submission
//! order. Buffer arguments are copied in, the kernel runs over the copies and the declared output
//! arguments are written back, so a launch may freely read and write views of one allocation.
mod activation;
mod convolution;
mod matrix;
mod optimization;
mod pooling;

use super::buffer::{BufferInner, DeviceBuffer};
use super::queue::{KernelArg, KernelCall};
use crate::error::{Error, Result};
use std::collections::HashMap;

#[derive(Debug)]
enum HostArg {
    Buffer(Vec<f32>),
    Float(f32),
    Uint(u32),
}

/// The arguments of one host kernel launch.
pub(crate) struct HostCall {
    name: &'static str,
    pub global: [usize; 3],
    args: Vec<HostArg>,
}

impl HostCall {
    fn bad_arg(&self, index: usize, expected: &str) -> Error {
        Error::Device(format!(
            "argument {} of kernel `{}` is not a {}",
            index, self.name, expected
        ))
    }

    pub fn uint(&self, index: usize) -> Result<usize> {
        match self.args.get(index) {
            Some(HostArg::Uint(v)) => Ok(*v as usize),
            _ => Err(self.bad_arg(index, "uint")),
        }
    }

    pub fn float(&self, index: usize) -> Result<f32> {
        match self.args.get(index) {
            Some(HostArg::Float(v)) => Ok(*v),
            _ => Err(self.bad_arg(index, "float")),
        }
    }

    /// Borrows a buffer argument that must hold at least `len` elements.
    pub fn buf(&self, index: usize, len: usize) -> Result<&[f32]> {
        match self.args.get(index) {
            Some(HostArg::Buffer(data)) if data.len() >= len => Ok(data.as_slice()),
            Some(HostArg::Buffer(data)) => Err(Error::Device(format!(
                "buffer argument {} of kernel `{}` holds {} elements, {} needed",
                index,
                self.name,
                data.len(),
                len
            ))),
            _ => Err(self.bad_arg(index, "buffer")),
        }
    }

    /// Moves a buffer argument out so it can be written while other arguments are borrowed.
    pub fn take(&mut self, index: usize, len: usize) -> Result<Vec<f32>> {
        self.buf(index, len)?;
        match self.args.get_mut(index) {
            Some(HostArg::Buffer(data)) => Ok(std::mem::replace(data, Vec::new())),
            _ => Err(Error::Device(format!("kernel `{}` lost argument {}", self.name, index))),
        }
    }

    pub fn put(&mut self, index: usize, data: Vec<f32>) {
        if let Some(arg) = self.args.get_mut(index) {
            *arg = HostArg::Buffer(data);
        }
    }
}

type HostKernelFn = fn(&mut HostCall) -> Result<()>;

struct HostKernel {
    run: HostKernelFn,
    /// Indices of the buffer arguments the kernel writes
    outputs: &'static [usize],
}

lazy_static! {
    static ref HOST_KERNELS: HashMap<&'static str, HostKernel> = {
        let mut kernels = HashMap::new();
        let mut register = |name: &'static str, run: HostKernelFn, outputs: &'static [usize]| {
            kernels.insert(name, HostKernel { run, outputs });
        };
        register("fill", matrix::fill, &[0]);
        register("copy", matrix::copy, &[1]);
        register("axpby", matrix::axpby, &[2]);
        register("scale", matrix::scale, &[1]);
        register("hadamard", matrix::hadamard, &[2]);
        register("transpose", matrix::transpose, &[1]);
        register("gemm_batched", matrix::gemm_batched, &[2]);
        register("sum_collapse", matrix::sum_collapse, &[1]);
        register("activate", activation::activate, &[1]);
        register("activate_derivative", activation::activate_derivative, &[1]);
        register("conv_forward", convolution::forward, &[3]);
        register("conv_backward_weights", convolution::backward_weights, &[2]);
        register("conv_backward_bias", convolution::backward_bias, &[1]);
        register("conv_backward_input", convolution::backward_input, &[2]);
        register("max_pool_forward", pooling::max_forward, &[1, 2]);
        register("max_pool_backward", pooling::max_backward, &[2]);
        register("avg_pool_forward", pooling::avg_forward, &[1]);
        register("avg_pool_backward", pooling::avg_backward, &[1]);
        register("momentum_update", optimization::momentum_update, &[0, 2]);
        register("rprop_update", optimization::rprop_update, &[0, 2, 3, 4]);
        kernels
    };
}

pub(crate) fn has_kernel(name: &str) -> bool {
    HOST_KERNELS.contains_key(name)
}

fn host_data(buffer: &DeviceBuffer) -> Result<&std::sync::RwLock<Vec<f32>>> {
    match buffer.inner() {
        BufferInner::Host(data) => Ok(data),
        #[cfg(feature = "opencl")]
        _ => Err(super::buffer::backend_mismatch()),
    }
}

fn lock_error<T>(_: T) -> Error {
    Error::Device("host buffer lock poisoned".to_owned())
}

pub(crate) fn execute(call: &KernelCall) -> Result<()> {
    let kernel = HOST_KERNELS
        .get(call.name)
        .ok_or_else(|| Error::Device(format!("unknown host kernel `{}`", call.name)))?;

    let mut args = Vec::with_capacity(call.args.len());
    for arg in &call.args {
        args.push(match arg {
            KernelArg::Buffer {
                buffer,
                offset,
                len,
            } => {
                if offset + len > buffer.len() {
                    return Err(Error::IndexOutOfRange {
                        index: offset + len,
                        len: buffer.len(),
                    });
                }
                let data = host_data(buffer)?.read().map_err(lock_error)?;
                HostArg::Buffer(data[*offset..offset + len].to_vec())
            }
            KernelArg::Float(v) => HostArg::Float(*v),
            KernelArg::Uint(v) => HostArg::Uint(*v),
        });
    }

    let mut host_call = HostCall {
        name: call.name,
        global: call.global,
        args,
    };
    (kernel.run)(&mut host_call)?;

    for &index in kernel.outputs {
        if let (Some(KernelArg::Buffer { buffer, offset, .. }), Some(HostArg::Buffer(result))) =
            (call.args.get(index), host_call.args.get(index))
        {
            let mut data = host_data(buffer)?.write().map_err(lock_error)?;
            data[*offset..offset + result.len()].copy_from_slice(result);
        }
    }
    Ok(())
}
