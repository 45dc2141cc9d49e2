use super::queue::{Queue, QueueInner};
use crate::error::{Error, Result};
use std::sync::{Arc, RwLock};

#[cfg(feature = "opencl")]
use ocl::{flags, Buffer};

/// A device allocation of f32s. Cloning shares the allocation.
#[derive(Clone, Debug)]
pub struct DeviceBuffer {
    inner: BufferInner,
    len: usize,
}

#[derive(Clone, Debug)]
pub(crate) enum BufferInner {
    Host(Arc<RwLock<Vec<f32>>>),
    #[cfg(feature = "opencl")]
    Cl(Buffer<f32>),
}

fn poisoned<T>(_: T) -> Error {
    Error::Device("host buffer lock poisoned".to_owned())
}

impl DeviceBuffer {
    /// Allocates `len` zero-initialized elements on the queue's device.
    pub fn zeros(len: usize, queue: &Queue) -> Result<DeviceBuffer> {
        let inner = match queue.inner() {
            QueueInner::Host => {
                let mut data = Vec::new();
                data.try_reserve_exact(len).map_err(|_| {
                    Error::Device(format!("cannot allocate {} floats on the host", len))
                })?;
                data.resize(len, 0f32);
                BufferInner::Host(Arc::new(RwLock::new(data)))
            }
            #[cfg(feature = "opencl")]
            QueueInner::Cl(q) => BufferInner::Cl(
                Buffer::<f32>::builder()
                    .queue(q.clone())
                    .flags(flags::MEM_READ_WRITE)
                    // OpenCL rejects empty allocations
                    .len(len.max(1))
                    .fill_val(0f32)
                    .build()?,
            ),
        };
        Ok(DeviceBuffer { inner, len })
    }

    /// Allocates a buffer and copies `data` into it, blocking until the copy is done.
    pub fn from_slice(data: &[f32], queue: &Queue) -> Result<DeviceBuffer> {
        let buffer = DeviceBuffer::zeros(data.len(), queue)?;
        buffer.write(0, data, queue)?;
        Ok(buffer)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether both handles refer to the same allocation.
    pub fn same_allocation(&self, other: &DeviceBuffer) -> bool {
        match (&self.inner, &other.inner) {
            (BufferInner::Host(a), BufferInner::Host(b)) => Arc::ptr_eq(a, b),
            #[cfg(feature = "opencl")]
            (BufferInner::Cl(a), BufferInner::Cl(b)) => a.as_core().as_ptr() == b.as_core().as_ptr(),
            #[cfg(feature = "opencl")]
            _ => false,
        }
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<()> {
        if offset + len > self.len {
            return Err(Error::IndexOutOfRange {
                index: offset + len,
                len: self.len,
            });
        }
        Ok(())
    }

    /// Blocking read of `len` elements starting at `offset`. Waits for every command already
    /// enqueued on `queue`.
    pub fn read(&self, offset: usize, len: usize, queue: &Queue) -> Result<Vec<f32>> {
        self.check_range(offset, len)?;
        match (&self.inner, queue.inner()) {
            (BufferInner::Host(data), QueueInner::Host) => {
                let data = data.read().map_err(poisoned)?;
                Ok(data[offset..offset + len].to_vec())
            }
            #[cfg(feature = "opencl")]
            (BufferInner::Cl(buf), QueueInner::Cl(q)) => {
                let mut out = vec![0f32; len];
                if len > 0 {
                    buf.read(&mut out).queue(q).offset(offset).enq()?;
                }
                Ok(out)
            }
            #[cfg(feature = "opencl")]
            _ => Err(backend_mismatch()),
        }
    }

    /// Blocking write of `data` starting at `offset`.
    pub fn write(&self, offset: usize, data: &[f32], queue: &Queue) -> Result<()> {
        self.check_range(offset, data.len())?;
        match (&self.inner, queue.inner()) {
            (BufferInner::Host(buf), QueueInner::Host) => {
                let mut buf = buf.write().map_err(poisoned)?;
                buf[offset..offset + data.len()].copy_from_slice(data);
                Ok(())
            }
            #[cfg(feature = "opencl")]
            (BufferInner::Cl(buf), QueueInner::Cl(q)) => {
                if !data.is_empty() {
                    buf.write(data).queue(q).offset(offset).enq()?;
                }
                Ok(())
            }
            #[cfg(feature = "opencl")]
            _ => Err(backend_mismatch()),
        }
    }

    pub(crate) fn inner(&self) -> &BufferInner {
        &self.inner
    }
}

#[cfg(feature = "opencl")]
pub(crate) fn backend_mismatch() -> Error {
    Error::Device("buffer and queue belong to different backends".to_owned())
}
