//! OpenCL launch path. Each buffer argument is followed by its element offset.
use super::buffer::{backend_mismatch, BufferInner};
use super::kernels::{CompiledProgram, KernelHandle};
use super::queue::{KernelArg, KernelCall};
use crate::error::Result;
use ocl::enums::{DeviceInfo, DeviceInfoResult};
use ocl::{flags, Device, Kernel, Queue, SpatialDims};

pub fn enqueue(queue: &Queue, kernel: &KernelHandle, call: &KernelCall) -> Result<()> {
    let program = match kernel.program() {
        CompiledProgram::Cl(program) => program,
        CompiledProgram::Host(_) => return Err(backend_mismatch()),
    };

    let mut builder = Kernel::builder();
    builder
        .program(program)
        .name(kernel.name())
        .queue(queue.clone())
        .global_work_size(SpatialDims::Three(
            call.global[0],
            call.global[1],
            call.global[2],
        ));
    for arg in &call.args {
        match arg {
            KernelArg::Buffer { buffer, offset, .. } => match buffer.inner() {
                BufferInner::Cl(buf) => {
                    builder.arg(buf);
                    builder.arg(*offset as u32);
                }
                BufferInner::Host(_) => return Err(backend_mismatch()),
            },
            KernelArg::Float(value) => {
                builder.arg(*value);
            }
            KernelArg::Uint(value) => {
                builder.arg(*value);
            }
        }
    }
    let kernel = builder.build()?;
    unsafe {
        kernel.enq()?;
    }
    Ok(())
}

pub fn describe_device(device: Device) -> Result<()> {
    let device_type = match device.info(DeviceInfo::Type).map_err(ocl::Error::from)? {
        DeviceInfoResult::Type(t) if t.contains(flags::DeviceType::GPU) => "GPU",
        DeviceInfoResult::Type(t) if t.contains(flags::DeviceType::CPU) => "CPU",
        _ => "unknown device type",
    };
    info!("Using {} \"{}\".", device_type, device.name().map_err(ocl::Error::from)?);
    debug!(
        "Maximum work-item-sizes: {}",
        device
            .info(DeviceInfo::MaxWorkItemSizes)
            .map_err(ocl::Error::from)?
    );
    Ok(())
}
