use super::buffer::DeviceBuffer;
use super::kernels::Program;
use super::{host, ContextShared};
use crate::error::{Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// An argument to a kernel launch. Buffers are passed together with an element offset, which the
/// OpenCL kernels receive as a trailing `uint` argument.
#[derive(Clone, Debug)]
pub enum KernelArg<'a> {
    Buffer {
        buffer: &'a DeviceBuffer,
        offset: usize,
        len: usize,
    },
    Float(f32),
    Uint(u32),
}

/// A kernel launch: which kernel, over which global range, with which arguments.
#[derive(Clone, Debug)]
pub struct KernelCall<'a> {
    pub program: Program,
    pub name: &'static str,
    pub global: [usize; 3],
    pub args: Vec<KernelArg<'a>>,
}

impl<'a> KernelCall<'a> {
    pub fn new(program: Program, name: &'static str) -> KernelCall<'a> {
        KernelCall {
            program,
            name,
            global: [1, 1, 1],
            args: Vec::new(),
        }
    }
    pub fn global(mut self, global: [usize; 3]) -> KernelCall<'a> {
        self.global = global;
        self
    }
    pub fn buffer(mut self, buffer: &'a DeviceBuffer, offset: usize, len: usize) -> KernelCall<'a> {
        self.args.push(KernelArg::Buffer {
            buffer,
            offset,
            len,
        });
        self
    }
    pub fn float(mut self, value: f32) -> KernelCall<'a> {
        self.args.push(KernelArg::Float(value));
        self
    }
    pub fn uint(mut self, value: usize) -> KernelCall<'a> {
        self.args.push(KernelArg::Uint(value as u32));
        self
    }
}

#[derive(Clone)]
pub(crate) enum QueueInner {
    Host,
    #[cfg(feature = "opencl")]
    Cl(ocl::Queue),
}

/// An in-order command queue. Commands submitted to one queue execute in submission order.
#[derive(Clone)]
pub struct Queue {
    id: usize,
    context: Arc<ContextShared>,
    inner: QueueInner,
    submitted: Arc<AtomicUsize>,
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Queue")
            .field("id", &self.id)
            .field("submitted", &self.submitted())
            .finish()
    }
}

impl PartialEq for Queue {
    fn eq(&self, other: &Queue) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.context, &other.context)
    }
}

impl Queue {
    pub(crate) fn new(id: usize, context: Arc<ContextShared>, inner: QueueInner) -> Queue {
        Queue {
            id,
            context,
            inner,
            submitted: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Number of kernel launches submitted to this queue.
    pub fn submitted(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }

    pub fn is_host(&self) -> bool {
        match self.inner {
            QueueInner::Host => true,
            #[cfg(feature = "opencl")]
            _ => false,
        }
    }

    pub(crate) fn inner(&self) -> &QueueInner {
        &self.inner
    }

    /// Enqueues a kernel launch. The launch runs asynchronously on OpenCL devices and inline on
    /// the host executor; either way it is ordered after every earlier launch on this queue.
    pub fn enqueue(&self, call: KernelCall) -> Result<()> {
        let kernel = self
            .context
            .kernels
            .compile_kernel(call.program.source(), call.name)?;
        if call.global.iter().any(|&d| d == 0) {
            return Ok(());
        }
        self.submitted.fetch_add(1, Ordering::SeqCst);
        trace!(
            "queue {}: {}::{} over {:?}",
            self.id,
            call.program.file_name(),
            kernel.name(),
            call.global
        );
        match &self.inner {
            QueueInner::Host => host::execute(&call),
            #[cfg(feature = "opencl")]
            QueueInner::Cl(queue) => super::opencl::enqueue(queue, &kernel, &call),
        }
    }

    /// Enqueues `call` and, if `blocking`, waits for the queue to drain.
    pub fn run(&self, call: KernelCall, blocking: bool) -> Result<()> {
        self.enqueue(call)?;
        if blocking {
            self.finish()?;
        }
        Ok(())
    }

    /// Blocks until every command submitted to this queue has completed.
    pub fn finish(&self) -> Result<()> {
        match &self.inner {
            QueueInner::Host => Ok(()),
            #[cfg(feature = "opencl")]
            QueueInner::Cl(queue) => Ok(queue.finish()?),
        }
    }
}

/// A fixed set of queues on one device, handed out round-robin.
#[derive(Clone, Debug)]
pub struct QueueSet {
    queues: Vec<Queue>,
    next: Arc<AtomicUsize>,
}

impl QueueSet {
    /// `queues` must not be empty.
    pub(crate) fn new(queues: Vec<Queue>) -> QueueSet {
        debug_assert!(!queues.is_empty());
        QueueSet {
            queues,
            next: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    pub fn primary(&self) -> &Queue {
        &self.queues[0]
    }

    pub fn get(&self, index: usize) -> Result<&Queue> {
        self.queues.get(index).ok_or(Error::IndexOutOfRange {
            index,
            len: self.queues.len(),
        })
    }

    /// Returns the next queue in round-robin order.
    pub fn next(&self) -> &Queue {
        let index = self.next.fetch_add(1, Ordering::SeqCst) % self.queues.len();
        &self.queues[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Queue> {
        self.queues.iter()
    }

    pub fn finish_all(&self) -> Result<()> {
        for queue in &self.queues {
            queue.finish()?;
        }
        Ok(())
    }
}
