use super::tensor::AccelTensor;
use crate::cl_util::Queue;
use crate::error::{Error, Result};

/// A single row-major matrix on the device; a tensor with a batch of one.
#[derive(Debug)]
pub struct AccelMatrix {
    inner: AccelTensor,
}

impl AccelMatrix {
    pub(crate) fn from_tensor_unchecked(inner: AccelTensor) -> AccelMatrix {
        AccelMatrix { inner }
    }

    /// Wraps a tensor holding exactly one matrix.
    pub fn from_tensor(inner: AccelTensor) -> Result<AccelMatrix> {
        if inner.depth() != 1 {
            return Err(Error::shape_mismatch("from_tensor", 1, inner.depth()));
        }
        Ok(AccelMatrix { inner })
    }

    pub fn zeros(rows: usize, cols: usize, queue: &Queue) -> Result<AccelMatrix> {
        Ok(AccelMatrix {
            inner: AccelTensor::zeros(rows, cols, 1, queue)?,
        })
    }

    /// Copies host data into a new matrix. Blocks until the copy is complete.
    pub fn from_host(data: &[f32], rows: usize, cols: usize, queue: &Queue) -> Result<AccelMatrix> {
        Ok(AccelMatrix {
            inner: AccelTensor::from_host(data, rows, cols, 1, queue)?,
        })
    }

    pub fn copy_of(other: &AccelMatrix, queue: &Queue, blocking: bool) -> Result<AccelMatrix> {
        Ok(AccelMatrix {
            inner: AccelTensor::copy_of(&other.inner, queue, blocking)?,
        })
    }

    pub fn rows(&self) -> usize {
        self.inner.rows()
    }
    pub fn cols(&self) -> usize {
        self.inner.cols()
    }
    pub fn len(&self) -> usize {
        self.inner.len()
    }
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
    pub fn is_view(&self) -> bool {
        self.inner.is_view()
    }
    pub fn as_tensor(&self) -> &AccelTensor {
        &self.inner
    }
    pub fn into_tensor(self) -> AccelTensor {
        self.inner
    }
    pub fn view(&self) -> AccelMatrix {
        AccelMatrix {
            inner: self.inner.view(),
        }
    }

    pub fn to_vec(&self) -> Result<Vec<f32>> {
        self.inner.to_vec()
    }
    pub fn sum(&self) -> Result<f32> {
        self.inner.sum()
    }

    pub fn fill(&mut self, value: f32, queue: &Queue, blocking: bool) -> Result<()> {
        self.inner.fill(value, queue, blocking)
    }

    pub fn copy_from(&mut self, other: &AccelMatrix, queue: &Queue, blocking: bool) -> Result<()> {
        self.inner.copy_from(&other.inner, queue, blocking)
    }

    pub fn add(&self, other: &AccelMatrix, queue: &Queue, blocking: bool) -> Result<AccelMatrix> {
        Ok(AccelMatrix {
            inner: self.inner.add(&other.inner, queue, blocking)?,
        })
    }

    pub fn sub(&self, other: &AccelMatrix, queue: &Queue, blocking: bool) -> Result<AccelMatrix> {
        Ok(AccelMatrix {
            inner: self.inner.sub(&other.inner, queue, blocking)?,
        })
    }

    /// In-place `self += alpha * other`.
    pub fn ipadd(
        &mut self,
        alpha: f32,
        other: &AccelMatrix,
        queue: &Queue,
        blocking: bool,
    ) -> Result<()> {
        self.inner.ipadd(alpha, &other.inner, queue, blocking)
    }

    pub fn scale(&self, alpha: f32, queue: &Queue, blocking: bool) -> Result<AccelMatrix> {
        Ok(AccelMatrix {
            inner: self.inner.scale(alpha, queue, blocking)?,
        })
    }

    pub fn hadamard(
        &self,
        other: &AccelMatrix,
        queue: &Queue,
        blocking: bool,
    ) -> Result<AccelMatrix> {
        Ok(AccelMatrix {
            inner: self.inner.hadamard(&other.inner, queue, blocking)?,
        })
    }

    pub fn transpose(&self, queue: &Queue, blocking: bool) -> Result<AccelMatrix> {
        Ok(AccelMatrix {
            inner: self.inner.transpose(queue, blocking)?,
        })
    }

    /// Matrix product `self * other`.
    pub fn matmul(&self, other: &AccelMatrix, queue: &Queue, blocking: bool) -> Result<AccelMatrix> {
        self.gemm(1.0, false, other, false, queue, blocking)
    }

    /// `alpha * op(self) * op(other)`
    pub fn gemm(
        &self,
        alpha: f32,
        trans_self: bool,
        other: &AccelMatrix,
        trans_other: bool,
        queue: &Queue,
        blocking: bool,
    ) -> Result<AccelMatrix> {
        Ok(AccelMatrix {
            inner: AccelTensor::batched_gemm(
                alpha,
                &self.inner,
                trans_self,
                &other.inner,
                trans_other,
                queue,
                blocking,
            )?,
        })
    }
}
