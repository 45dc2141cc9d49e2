//! Device discovery, queues, kernel compilation and device buffers.
mod buffer;
mod host;
mod kernels;
#[cfg(feature = "opencl")]
mod opencl;
mod platform;
mod queue;
#[cfg(test)]
mod test;

pub use self::buffer::DeviceBuffer;
pub use self::kernels::{KernelHandle, Program};
pub use self::platform::*;
pub use self::queue::*;

use self::kernels::{Compiler, KernelCache};
use self::platform::Backend;
use crate::config::DeviceConfig;
use crate::error::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// State shared by a context and every queue created from it.
pub(crate) struct ContextShared {
    platform: PlatformHandle,
    kernels: KernelCache,
    next_queue_id: AtomicUsize,
    #[cfg(feature = "opencl")]
    cl: Option<(ocl::Context, ocl::Device)>,
}

/// A compute device with its queues and kernel cache.
#[derive(Clone)]
pub struct DeviceContext {
    shared: Arc<ContextShared>,
    queues: QueueSet,
}

impl DeviceContext {
    /// Opens `platform` and creates `queue_count` queues on it (at least one).
    pub fn new(platform: PlatformHandle, queue_count: usize) -> Result<DeviceContext> {
        let backend = platform.backend().clone();
        let shared = match backend {
            Backend::Host => ContextShared {
                kernels: KernelCache::new(Compiler::Host),
                next_queue_id: AtomicUsize::new(0),
                #[cfg(feature = "opencl")]
                cl: None,
                platform,
            },
            #[cfg(feature = "opencl")]
            Backend::OpenCl {
                platform: cl_platform,
                device,
            } => {
                opencl::describe_device(device)?;
                let context = ocl::Context::builder()
                    .platform(cl_platform)
                    .devices(device)
                    .build()?;
                ContextShared {
                    kernels: KernelCache::new(Compiler::Cl {
                        context: context.clone(),
                        device,
                    }),
                    next_queue_id: AtomicUsize::new(0),
                    cl: Some((context, device)),
                    platform,
                }
            }
        };
        let shared = Arc::new(shared);
        let queues = Self::open_queues(&shared, queue_count)?;
        debug!(
            "opened {} with {} queue(s)",
            shared.platform.name(),
            queues.len()
        );
        Ok(DeviceContext { shared, queues })
    }

    /// A context on the host executor.
    pub fn host(queue_count: usize) -> DeviceContext {
        let shared = Arc::new(ContextShared {
            platform: PlatformHandle::host(),
            kernels: KernelCache::new(Compiler::Host),
            next_queue_id: AtomicUsize::new(0),
            #[cfg(feature = "opencl")]
            cl: None,
        });
        let queues = (0..queue_count.max(1))
            .map(|_| Self::host_queue(&shared))
            .collect();
        DeviceContext {
            shared,
            queues: QueueSet::new(queues),
        }
    }

    /// Selects a platform according to `config` and opens it.
    pub fn from_config(config: &DeviceConfig) -> Result<DeviceContext> {
        let platform = select_platform(&config.criteria())?;
        DeviceContext::new(platform, config.queue_count)
    }

    fn host_queue(shared: &Arc<ContextShared>) -> Queue {
        let id = shared.next_queue_id.fetch_add(1, Ordering::SeqCst);
        Queue::new(id, shared.clone(), QueueInner::Host)
    }

    fn open_queues(shared: &Arc<ContextShared>, count: usize) -> Result<QueueSet> {
        let mut queues = Vec::with_capacity(count.max(1));
        for _ in 0..count.max(1) {
            #[cfg(feature = "opencl")]
            {
                if let Some((context, device)) = &shared.cl {
                    let id = shared.next_queue_id.fetch_add(1, Ordering::SeqCst);
                    let queue = ocl::Queue::new(context, *device, None)?;
                    queues.push(Queue::new(id, shared.clone(), QueueInner::Cl(queue)));
                    continue;
                }
            }
            queues.push(Self::host_queue(shared));
        }
        Ok(QueueSet::new(queues))
    }

    pub fn platform(&self) -> &PlatformHandle {
        &self.shared.platform
    }

    /// The queues opened with the context.
    pub fn queues(&self) -> &QueueSet {
        &self.queues
    }

    pub fn default_queue(&self) -> &Queue {
        self.queues.primary()
    }

    /// Opens an additional set of `count` queues (at least one) on the same device.
    pub fn create_queues(&self, count: usize) -> Result<QueueSet> {
        Self::open_queues(&self.shared, count)
    }

    /// Compiles `name` from `source`, or returns the cached handle.
    pub fn compile_kernel(&self, source: &str, name: &str) -> Result<KernelHandle> {
        self.shared.kernels.compile_kernel(source, name)
    }

    /// Number of programs compiled by this context so far.
    pub fn compilations(&self) -> usize {
        self.shared.kernels.compilations()
    }
}
