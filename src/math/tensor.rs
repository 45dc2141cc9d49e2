use super::matrix::AccelMatrix;
use crate::cl_util::{DeviceBuffer, KernelCall, Program, Queue};
use crate::error::{Error, Result};
use ndarray::Array3;
use rand::Rng;

/// A batch of `depth` row-major (rows x cols) matrices stored contiguously in one device
/// allocation. Views (`view`, `get_matrix`, `slice`, `reshape`) share the allocation; writes
/// through a view are visible through every other handle.
///
/// Operations enqueue kernels on the queue they are given and return without waiting unless
/// `blocking` is set. The returned value remembers that queue, and reading it back (`to_vec`)
/// waits for it.
#[derive(Debug)]
pub struct AccelTensor {
    buffer: DeviceBuffer,
    offset: usize,
    rows: usize,
    cols: usize,
    depth: usize,
    queue: Queue,
    view: bool,
}

impl AccelTensor {
    /// Allocates a zero-filled tensor.
    pub fn zeros(rows: usize, cols: usize, depth: usize, queue: &Queue) -> Result<AccelTensor> {
        Ok(AccelTensor {
            buffer: DeviceBuffer::zeros(rows * cols * depth, queue)?,
            offset: 0,
            rows,
            cols,
            depth,
            queue: queue.clone(),
            view: false,
        })
    }

    /// Copies host data into a new tensor. Blocks until the copy is complete.
    pub fn from_host(
        data: &[f32],
        rows: usize,
        cols: usize,
        depth: usize,
        queue: &Queue,
    ) -> Result<AccelTensor> {
        if data.len() != rows * cols * depth {
            return Err(Error::shape_mismatch(
                "from_host",
                (rows, cols, depth),
                data.len(),
            ));
        }
        Ok(AccelTensor {
            buffer: DeviceBuffer::from_slice(data, queue)?,
            offset: 0,
            rows,
            cols,
            depth,
            queue: queue.clone(),
            view: false,
        })
    }

    /// Allocates a tensor with values drawn uniformly from `[-bound, bound)`.
    pub fn uniform<R: Rng>(
        rows: usize,
        cols: usize,
        depth: usize,
        bound: f32,
        rng: &mut R,
        queue: &Queue,
    ) -> Result<AccelTensor> {
        if bound <= 0.0 {
            return AccelTensor::zeros(rows, cols, depth, queue);
        }
        let data = (0..rows * cols * depth)
            .map(|_| rng.gen_range(-bound..bound))
            .collect::<Vec<f32>>();
        AccelTensor::from_host(&data, rows, cols, depth, queue)
    }

    /// Copies another tensor into a new allocation on `queue`.
    pub fn copy_of(other: &AccelTensor, queue: &Queue, blocking: bool) -> Result<AccelTensor> {
        let mut copy = AccelTensor::zeros(other.rows, other.cols, other.depth, queue)?;
        copy.copy_from(other, queue, blocking)?;
        Ok(copy)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }
    pub fn cols(&self) -> usize {
        self.cols
    }
    pub fn depth(&self) -> usize {
        self.depth
    }
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.rows, self.cols, self.depth)
    }
    /// Elements in one matrix of the batch.
    pub fn matrix_len(&self) -> usize {
        self.rows * self.cols
    }
    pub fn len(&self) -> usize {
        self.matrix_len() * self.depth
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn is_view(&self) -> bool {
        self.view
    }
    /// The queue of the last operation that produced or modified this value.
    pub fn queue(&self) -> &Queue {
        &self.queue
    }
    pub fn buffer(&self) -> &DeviceBuffer {
        &self.buffer
    }
    /// Element offset of this value within its allocation.
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn view_of(&self, offset: usize, rows: usize, cols: usize, depth: usize) -> AccelTensor {
        AccelTensor {
            buffer: self.buffer.clone(),
            offset,
            rows,
            cols,
            depth,
            queue: self.queue.clone(),
            view: true,
        }
    }

    /// A view of the whole tensor.
    pub fn view(&self) -> AccelTensor {
        self.view_of(self.offset, self.rows, self.cols, self.depth)
    }

    /// A view of matrix `z` of the batch.
    pub fn get_matrix(&self, z: usize) -> Result<AccelMatrix> {
        if z >= self.depth {
            return Err(Error::IndexOutOfRange {
                index: z,
                len: self.depth,
            });
        }
        let offset = self.offset + z * self.matrix_len();
        Ok(AccelMatrix::from_tensor_unchecked(
            self.view_of(offset, self.rows, self.cols, 1),
        ))
    }

    /// Views of every matrix of the batch, in order.
    pub fn matrices(&self) -> Vec<AccelMatrix> {
        (0..self.depth)
            .map(|z| {
                let offset = self.offset + z * self.matrix_len();
                AccelMatrix::from_tensor_unchecked(self.view_of(offset, self.rows, self.cols, 1))
            })
            .collect()
    }

    /// A view of the matrices `begin..end` of the batch.
    pub fn slice(&self, begin: usize, end: usize) -> Result<AccelTensor> {
        if begin > end || end > self.depth {
            return Err(Error::IndexOutOfRange {
                index: end.max(begin),
                len: self.depth,
            });
        }
        let offset = self.offset + begin * self.matrix_len();
        Ok(self.view_of(offset, self.rows, self.cols, end - begin))
    }

    /// A view with a different shape over the same elements.
    pub fn reshape(&self, rows: usize, cols: usize, depth: usize) -> Result<AccelTensor> {
        if rows * cols * depth != self.len() {
            return Err(Error::shape_mismatch(
                "reshape",
                self.shape(),
                (rows, cols, depth),
            ));
        }
        Ok(self.view_of(self.offset, rows, cols, depth))
    }

    /// A view where every matrix is a column vector.
    pub fn flatten(&self) -> AccelTensor {
        self.view_of(self.offset, self.matrix_len(), 1, self.depth)
    }

    pub fn same_shape(&self, other: &AccelTensor) -> bool {
        self.shape() == other.shape()
    }

    fn check_shape(&self, op: &'static str, other: &AccelTensor) -> Result<()> {
        if !self.same_shape(other) {
            return Err(Error::shape_mismatch(op, self.shape(), other.shape()));
        }
        Ok(())
    }

    pub(crate) fn arg(&self) -> (&DeviceBuffer, usize, usize) {
        (&self.buffer, self.offset, self.len())
    }

    /// Blocking read of every element.
    pub fn to_vec(&self) -> Result<Vec<f32>> {
        self.buffer.read(self.offset, self.len(), &self.queue)
    }

    /// Blocking read into a `(depth, rows, cols)` array.
    pub fn to_array3(&self) -> Result<Array3<f32>> {
        Array3::from_shape_vec((self.depth, self.rows, self.cols), self.to_vec()?)
            .map_err(|e| Error::shape_mismatch("to_array3", self.shape(), e.to_string()))
    }

    /// Blocking sum of every element.
    pub fn sum(&self) -> Result<f32> {
        Ok(self.to_vec()?.iter().sum())
    }

    /// Blocking copy of host data into this value.
    pub fn write_host(&mut self, data: &[f32], queue: &Queue) -> Result<()> {
        if data.len() != self.len() {
            return Err(Error::shape_mismatch("write_host", self.len(), data.len()));
        }
        self.buffer.write(self.offset, data, queue)?;
        self.queue = queue.clone();
        Ok(())
    }

    pub fn fill(&mut self, value: f32, queue: &Queue, blocking: bool) -> Result<()> {
        let (buffer, offset, len) = self.arg();
        let call = KernelCall::new(Program::Matrix, "fill")
            .global([len, 1, 1])
            .buffer(buffer, offset, len)
            .float(value)
            .uint(len);
        queue.run(call, blocking)?;
        self.queue = queue.clone();
        Ok(())
    }

    /// Device-to-device copy of `other` into this value, which must have the same shape.
    pub fn copy_from(&mut self, other: &AccelTensor, queue: &Queue, blocking: bool) -> Result<()> {
        self.check_shape("copy_from", other)?;
        let (src, src_off, len) = other.arg();
        let (dst, dst_off, _) = self.arg();
        let call = KernelCall::new(Program::Matrix, "copy")
            .global([len, 1, 1])
            .buffer(src, src_off, len)
            .buffer(dst, dst_off, len)
            .uint(len);
        queue.run(call, blocking)?;
        self.queue = queue.clone();
        Ok(())
    }

    /// Launches `c = alpha * a + beta * b` matrix by matrix; `b` may be a single matrix that is
    /// broadcast over the batch.
    fn launch_axpby(
        a: &AccelTensor,
        alpha: f32,
        b: &AccelTensor,
        beta: f32,
        c: &AccelTensor,
        queue: &Queue,
        blocking: bool,
    ) -> Result<()> {
        let n = a.matrix_len();
        let b_stride = if b.depth == 1 && a.depth != 1 { 0 } else { n };
        let call = KernelCall::new(Program::Matrix, "axpby")
            .global([n, a.depth, 1])
            .buffer(&a.buffer, a.offset, a.len())
            .buffer(&b.buffer, b.offset, b.len())
            .buffer(&c.buffer, c.offset, c.len())
            .float(alpha)
            .float(beta)
            .uint(n)
            .uint(n)
            .uint(b_stride)
            .uint(n);
        queue.run(call, blocking)
    }

    /// `alpha * self + beta * other`
    pub fn linear(
        &self,
        alpha: f32,
        other: &AccelTensor,
        beta: f32,
        queue: &Queue,
        blocking: bool,
    ) -> Result<AccelTensor> {
        self.check_shape("linear", other)?;
        let out = AccelTensor::zeros(self.rows, self.cols, self.depth, queue)?;
        Self::launch_axpby(self, alpha, other, beta, &out, queue, blocking)?;
        Ok(out)
    }

    pub fn add(&self, other: &AccelTensor, queue: &Queue, blocking: bool) -> Result<AccelTensor> {
        self.linear(1.0, other, 1.0, queue, blocking)
    }

    pub fn sub(&self, other: &AccelTensor, queue: &Queue, blocking: bool) -> Result<AccelTensor> {
        self.linear(1.0, other, -1.0, queue, blocking)
    }

    /// Adds one matrix to every matrix of the batch.
    pub fn add_broadcast(
        &self,
        matrix: &AccelMatrix,
        queue: &Queue,
        blocking: bool,
    ) -> Result<AccelTensor> {
        let matrix = matrix.as_tensor();
        if (matrix.rows, matrix.cols) != (self.rows, self.cols) {
            return Err(Error::shape_mismatch(
                "add_broadcast",
                (self.rows, self.cols),
                (matrix.rows, matrix.cols),
            ));
        }
        let out = AccelTensor::zeros(self.rows, self.cols, self.depth, queue)?;
        Self::launch_axpby(self, 1.0, matrix, 1.0, &out, queue, blocking)?;
        Ok(out)
    }

    /// In-place `self += alpha * other`.
    pub fn ipadd(
        &mut self,
        alpha: f32,
        other: &AccelTensor,
        queue: &Queue,
        blocking: bool,
    ) -> Result<()> {
        self.check_shape("ipadd", other)?;
        Self::launch_axpby(self, 1.0, other, alpha, self, queue, blocking)?;
        self.queue = queue.clone();
        Ok(())
    }

    pub fn scale(&self, alpha: f32, queue: &Queue, blocking: bool) -> Result<AccelTensor> {
        let out = AccelTensor::zeros(self.rows, self.cols, self.depth, queue)?;
        let n = self.len();
        let call = KernelCall::new(Program::Matrix, "scale")
            .global([n, 1, 1])
            .buffer(&self.buffer, self.offset, n)
            .buffer(&out.buffer, out.offset, n)
            .float(alpha)
            .uint(n);
        queue.run(call, blocking)?;
        Ok(out)
    }

    /// Element-wise product.
    pub fn hadamard(
        &self,
        other: &AccelTensor,
        queue: &Queue,
        blocking: bool,
    ) -> Result<AccelTensor> {
        self.check_shape("hadamard", other)?;
        let out = AccelTensor::zeros(self.rows, self.cols, self.depth, queue)?;
        let n = self.len();
        let call = KernelCall::new(Program::Matrix, "hadamard")
            .global([n, 1, 1])
            .buffer(&self.buffer, self.offset, n)
            .buffer(&other.buffer, other.offset, n)
            .buffer(&out.buffer, out.offset, n)
            .uint(n);
        queue.run(call, blocking)?;
        Ok(out)
    }

    /// Transposes every matrix of the batch.
    pub fn transpose(&self, queue: &Queue, blocking: bool) -> Result<AccelTensor> {
        let out = AccelTensor::zeros(self.cols, self.rows, self.depth, queue)?;
        let call = KernelCall::new(Program::Matrix, "transpose")
            .global([self.cols, self.rows, self.depth])
            .buffer(&self.buffer, self.offset, self.len())
            .buffer(&out.buffer, out.offset, out.len())
            .uint(self.rows)
            .uint(self.cols);
        queue.run(call, blocking)?;
        Ok(out)
    }

    /// Sums the batch into a single matrix.
    pub fn sum_collapse(&self, queue: &Queue, blocking: bool) -> Result<AccelTensor> {
        let out = AccelTensor::zeros(self.rows, self.cols, 1, queue)?;
        let n = self.matrix_len();
        let call = KernelCall::new(Program::Matrix, "sum_collapse")
            .global([n, 1, 1])
            .buffer(&self.buffer, self.offset, self.len())
            .buffer(&out.buffer, out.offset, n)
            .uint(n)
            .uint(self.depth);
        queue.run(call, blocking)?;
        Ok(out)
    }

    /// Batched `alpha * op(a) * op(b)`. Either operand may hold a single matrix, which is then
    /// shared by the whole batch.
    pub fn batched_gemm(
        alpha: f32,
        a: &AccelTensor,
        trans_a: bool,
        b: &AccelTensor,
        trans_b: bool,
        queue: &Queue,
        blocking: bool,
    ) -> Result<AccelTensor> {
        let (m, k) = if trans_a { (a.cols, a.rows) } else { (a.rows, a.cols) };
        let (kb, n) = if trans_b { (b.cols, b.rows) } else { (b.rows, b.cols) };
        if k != kb {
            return Err(Error::shape_mismatch("gemm", (m, k), (kb, n)));
        }
        let batch = match (a.depth, b.depth) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            (x, y) => return Err(Error::shape_mismatch("gemm batch", x, y)),
        };
        let stride = |t: &AccelTensor| if t.depth == 1 { 0 } else { t.matrix_len() };

        let out = AccelTensor::zeros(m, n, batch, queue)?;
        let call = KernelCall::new(Program::Matrix, "gemm_batched")
            .global([n, m, batch])
            .buffer(&a.buffer, a.offset, a.len())
            .buffer(&b.buffer, b.offset, b.len())
            .buffer(&out.buffer, out.offset, out.len())
            .uint(m)
            .uint(n)
            .uint(k)
            .uint(trans_a as usize)
            .uint(trans_b as usize)
            .uint(stride(a))
            .uint(stride(b))
            .uint(m * n)
            .float(alpha)
            .float(0.0);
        queue.run(call, blocking)?;
        Ok(out)
    }
}
