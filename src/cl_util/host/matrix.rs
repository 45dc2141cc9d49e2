use super::HostCall;
use crate::error::Result;
use num_traits::{Float, NumAssign};

/// Number of elements touched by `depth` matrices of `n` elements placed `stride` apart.
fn extent(depth: usize, stride: usize, n: usize) -> usize {
    if depth == 0 {
        0
    } else {
        (depth - 1) * stride + n
    }
}

pub fn fill(call: &mut HostCall) -> Result<()> {
    let value = call.float(1)?;
    let n = call.uint(2)?;
    let mut out = call.take(0, n)?;
    out[..n].iter_mut().for_each(|x| *x = value);
    call.put(0, out);
    Ok(())
}

pub fn copy(call: &mut HostCall) -> Result<()> {
    let n = call.uint(2)?;
    let mut dst = call.take(1, n)?;
    dst[..n].copy_from_slice(&call.buf(0, n)?[..n]);
    call.put(1, dst);
    Ok(())
}

pub fn axpby(call: &mut HostCall) -> Result<()> {
    let (alpha, beta) = (call.float(3)?, call.float(4)?);
    let n = call.uint(5)?;
    let (a_stride, b_stride, c_stride) = (call.uint(6)?, call.uint(7)?, call.uint(8)?);
    let depth = call.global[1];

    let mut c = call.take(2, extent(depth, c_stride, n))?;
    let a = call.buf(0, extent(depth, a_stride, n))?;
    let b = call.buf(1, extent(depth, b_stride, n))?;
    for z in 0..depth {
        for i in 0..n {
            c[z * c_stride + i] = alpha * a[z * a_stride + i] + beta * b[z * b_stride + i];
        }
    }
    call.put(2, c);
    Ok(())
}

pub fn scale(call: &mut HostCall) -> Result<()> {
    let alpha = call.float(2)?;
    let n = call.uint(3)?;
    let mut c = call.take(1, n)?;
    let a = call.buf(0, n)?;
    for i in 0..n {
        c[i] = alpha * a[i];
    }
    call.put(1, c);
    Ok(())
}

pub fn hadamard(call: &mut HostCall) -> Result<()> {
    let n = call.uint(3)?;
    let mut c = call.take(2, n)?;
    let (a, b) = (call.buf(0, n)?, call.buf(1, n)?);
    for i in 0..n {
        c[i] = a[i] * b[i];
    }
    call.put(2, c);
    Ok(())
}

pub fn transpose(call: &mut HostCall) -> Result<()> {
    let (rows, cols) = (call.uint(2)?, call.uint(3)?);
    let depth = call.global[2];
    let len = rows * cols * depth;
    let mut out = call.take(1, len)?;
    let input = call.buf(0, len)?;
    for z in 0..depth {
        let base = z * rows * cols;
        for i in 0..rows {
            for j in 0..cols {
                out[base + j * rows + i] = input[base + i * cols + j];
            }
        }
    }
    call.put(1, out);
    Ok(())
}

/// Layout of one GEMM: `op(A)` is (m x k), `op(B)` is (k x n).
#[derive(Copy, Clone, Debug)]
pub struct GemmDims {
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub trans_a: bool,
    pub trans_b: bool,
}

/// `c = alpha * op(a) * op(b) + beta * c` on row-major slices.
pub fn gemm_into<T>(a: &[T], b: &[T], c: &mut [T], dims: GemmDims, alpha: T, beta: T)
where
    T: Float + NumAssign,
{
    let GemmDims { m, n, k, .. } = dims;
    for row in 0..m {
        for col in 0..n {
            let mut acc = T::zero();
            for p in 0..k {
                let lhs = if dims.trans_a { a[p * m + row] } else { a[row * k + p] };
                let rhs = if dims.trans_b { b[col * k + p] } else { b[p * n + col] };
                acc += lhs * rhs;
            }
            let dst = &mut c[row * n + col];
            *dst = if beta == T::zero() {
                alpha * acc
            } else {
                alpha * acc + beta * *dst
            };
        }
    }
}

pub fn gemm_batched(call: &mut HostCall) -> Result<()> {
    let dims = GemmDims {
        m: call.uint(3)?,
        n: call.uint(4)?,
        k: call.uint(5)?,
        trans_a: call.uint(6)? != 0,
        trans_b: call.uint(7)? != 0,
    };
    let (a_stride, b_stride, c_stride) = (call.uint(8)?, call.uint(9)?, call.uint(10)?);
    let (alpha, beta) = (call.float(11)?, call.float(12)?);
    let batch = call.global[2];

    let mut c = call.take(2, extent(batch, c_stride, dims.m * dims.n))?;
    let a = call.buf(0, extent(batch, a_stride, dims.m * dims.k))?;
    let b = call.buf(1, extent(batch, b_stride, dims.k * dims.n))?;
    for z in 0..batch {
        gemm_into(
            &a[z * a_stride..],
            &b[z * b_stride..],
            &mut c[z * c_stride..],
            dims,
            alpha,
            beta,
        );
    }
    call.put(2, c);
    Ok(())
}

pub fn sum_collapse(call: &mut HostCall) -> Result<()> {
    let (n, depth) = (call.uint(2)?, call.uint(3)?);
    let mut out = call.take(1, n)?;
    let input = call.buf(0, n * depth)?;
    for i in 0..n {
        out[i] = (0..depth).map(|z| input[z * n + i]).sum();
    }
    call.put(1, out);
    Ok(())
}
