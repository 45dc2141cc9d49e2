use super::HostCall;
use crate::error::Result;
use itertools::iproduct;
use std::ops::Range;

#[derive(Copy, Clone, Debug)]
struct PoolDims {
    in_h: usize,
    in_w: usize,
    pool_h: usize,
    pool_w: usize,
    stride: usize,
    out_h: usize,
    out_w: usize,
}

impl PoolDims {
    fn read(call: &HostCall, first: usize) -> Result<PoolDims> {
        Ok(PoolDims {
            in_h: call.uint(first)?,
            in_w: call.uint(first + 1)?,
            pool_h: call.uint(first + 2)?,
            pool_w: call.uint(first + 3)?,
            stride: call.uint(first + 4)?,
            out_h: call.uint(first + 5)?,
            out_w: call.uint(first + 6)?,
        })
    }

    /// Output positions whose window covers input coordinate `i`.
    fn windows(&self, i: usize, pool: usize, extent: usize) -> Range<usize> {
        let first = if i >= pool { (i - pool) / self.stride + 1 } else { 0 };
        let last = (i / self.stride + 1).min(extent);
        first..last.max(first)
    }

    fn in_plane(&self) -> usize {
        self.in_h * self.in_w
    }
    fn out_plane(&self) -> usize {
        self.out_h * self.out_w
    }
}

pub fn max_forward(call: &mut HostCall) -> Result<()> {
    let d = PoolDims::read(call, 3)?;
    let depth = call.global[2];

    let mut out = call.take(1, depth * d.out_plane())?;
    let mut argmax = call.take(2, depth * d.out_plane())?;
    let input = call.buf(0, depth * d.in_plane())?;

    for (z, oy, ox) in iproduct!(0..depth, 0..d.out_h, 0..d.out_w) {
        let base = z * d.in_plane();
        let mut best = oy * d.stride * d.in_w + ox * d.stride;
        let mut best_val = input[base + best];
        for (py, px) in iproduct!(0..d.pool_h, 0..d.pool_w) {
            let idx = (oy * d.stride + py) * d.in_w + ox * d.stride + px;
            if input[base + idx] > best_val {
                best_val = input[base + idx];
                best = idx;
            }
        }
        let dst = (z * d.out_h + oy) * d.out_w + ox;
        out[dst] = best_val;
        // Exact for planes up to 2^24 positions, the largest the layer accepts.
        argmax[dst] = best as f32;
    }
    call.put(1, out);
    call.put(2, argmax);
    Ok(())
}

pub fn max_backward(call: &mut HostCall) -> Result<()> {
    let d = PoolDims::read(call, 3)?;
    let depth = call.global[2];

    let mut din = call.take(2, depth * d.in_plane())?;
    let dout = call.buf(0, depth * d.out_plane())?;
    let argmax = call.buf(1, depth * d.out_plane())?;

    for (z, y, x) in iproduct!(0..depth, 0..d.in_h, 0..d.in_w) {
        let idx = y * d.in_w + x;
        let mut acc = 0f32;
        for (oy, ox) in iproduct!(d.windows(y, d.pool_h, d.out_h), d.windows(x, d.pool_w, d.out_w)) {
            let o = (z * d.out_h + oy) * d.out_w + ox;
            if argmax[o] as usize == idx {
                acc += dout[o];
            }
        }
        din[z * d.in_plane() + idx] = acc;
    }
    call.put(2, din);
    Ok(())
}

pub fn avg_forward(call: &mut HostCall) -> Result<()> {
    let d = PoolDims::read(call, 2)?;
    let depth = call.global[2];
    let window = (d.pool_h * d.pool_w) as f32;

    let mut out = call.take(1, depth * d.out_plane())?;
    let input = call.buf(0, depth * d.in_plane())?;

    for (z, oy, ox) in iproduct!(0..depth, 0..d.out_h, 0..d.out_w) {
        let base = z * d.in_plane();
        let sum: f32 = iproduct!(0..d.pool_h, 0..d.pool_w)
            .map(|(py, px)| input[base + (oy * d.stride + py) * d.in_w + ox * d.stride + px])
            .sum();
        out[(z * d.out_h + oy) * d.out_w + ox] = sum / window;
    }
    call.put(1, out);
    Ok(())
}

pub fn avg_backward(call: &mut HostCall) -> Result<()> {
    let d = PoolDims::read(call, 2)?;
    let depth = call.global[2];
    let window = (d.pool_h * d.pool_w) as f32;

    let mut din = call.take(1, depth * d.in_plane())?;
    let dout = call.buf(0, depth * d.out_plane())?;

    for (z, y, x) in iproduct!(0..depth, 0..d.in_h, 0..d.in_w) {
        let sum: f32 = iproduct!(d.windows(y, d.pool_h, d.out_h), d.windows(x, d.pool_w, d.out_w))
            .map(|(oy, ox)| dout[(z * d.out_h + oy) * d.out_w + ox])
            .sum();
        din[(z * d.in_h + y) * d.in_w + x] = sum / window;
    }
    call.put(1, din);
    Ok(())
}
