use super::HostCall;
use crate::error::Result;
use itertools::iproduct;

#[derive(Copy, Clone, Debug)]
struct ConvDims {
    c_in: usize,
    c_out: usize,
    in_h: usize,
    in_w: usize,
    k_h: usize,
    k_w: usize,
    stride: usize,
    pad: usize,
    out_h: usize,
    out_w: usize,
}

impl ConvDims {
    /// Reads the ten dimension arguments starting at `first`.
    fn read(call: &HostCall, first: usize) -> Result<ConvDims> {
        Ok(ConvDims {
            c_in: call.uint(first)?,
            c_out: call.uint(first + 1)?,
            in_h: call.uint(first + 2)?,
            in_w: call.uint(first + 3)?,
            k_h: call.uint(first + 4)?,
            k_w: call.uint(first + 5)?,
            stride: call.uint(first + 6)?,
            pad: call.uint(first + 7)?,
            out_h: call.uint(first + 8)?,
            out_w: call.uint(first + 9)?,
        })
    }

    /// Input coordinate read by output position `o` at filter tap `k`, if it is not padding.
    fn source(&self, o: usize, k: usize, extent: usize) -> Option<usize> {
        (o * self.stride + k).checked_sub(self.pad).filter(|&i| i < extent)
    }

    /// Output position that reads input coordinate `i` at filter tap `k`, if any.
    fn target(&self, i: usize, k: usize, extent: usize) -> Option<usize> {
        let t = (i + self.pad).checked_sub(k)?;
        if t % self.stride != 0 || t / self.stride >= extent {
            return None;
        }
        Some(t / self.stride)
    }

    fn in_plane(&self) -> usize {
        self.in_h * self.in_w
    }
    fn out_plane(&self) -> usize {
        self.out_h * self.out_w
    }
    fn filter_plane(&self) -> usize {
        self.k_h * self.k_w
    }
}

pub fn forward(call: &mut HostCall) -> Result<()> {
    let d = ConvDims::read(call, 4)?;
    let depth = call.global[2];
    let batch = depth / d.c_out.max(1);

    let mut out = call.take(3, depth * d.out_plane())?;
    let input = call.buf(0, batch * d.c_in * d.in_plane())?;
    let w = call.buf(1, d.c_out * d.c_in * d.filter_plane())?;
    let bias = call.buf(2, d.c_out)?;

    for (z, oy, ox) in iproduct!(0..depth, 0..d.out_h, 0..d.out_w) {
        let (b, co) = (z / d.c_out, z % d.c_out);
        let mut acc = bias[co];
        for (ci, ky, kx) in iproduct!(0..d.c_in, 0..d.k_h, 0..d.k_w) {
            if let (Some(y), Some(x)) = (d.source(oy, ky, d.in_h), d.source(ox, kx, d.in_w)) {
                let in_base = (b * d.c_in + ci) * d.in_plane();
                let w_base = (co * d.c_in + ci) * d.filter_plane();
                acc += input[in_base + y * d.in_w + x] * w[w_base + ky * d.k_w + kx];
            }
        }
        out[(z * d.out_h + oy) * d.out_w + ox] = acc;
    }
    call.put(3, out);
    Ok(())
}

pub fn backward_weights(call: &mut HostCall) -> Result<()> {
    let batch = call.uint(3)?;
    let d = ConvDims::read(call, 4)?;

    let mut dw = call.take(2, d.c_out * d.c_in * d.filter_plane())?;
    let input = call.buf(0, batch * d.c_in * d.in_plane())?;
    let dout = call.buf(1, batch * d.c_out * d.out_plane())?;

    for (co, ci, ky, kx) in iproduct!(0..d.c_out, 0..d.c_in, 0..d.k_h, 0..d.k_w) {
        let mut acc = 0f32;
        for (b, oy, ox) in iproduct!(0..batch, 0..d.out_h, 0..d.out_w) {
            if let (Some(y), Some(x)) = (d.source(oy, ky, d.in_h), d.source(ox, kx, d.in_w)) {
                let in_base = (b * d.c_in + ci) * d.in_plane();
                let dout_base = (b * d.c_out + co) * d.out_plane();
                acc += input[in_base + y * d.in_w + x] * dout[dout_base + oy * d.out_w + ox];
            }
        }
        dw[((co * d.c_in + ci) * d.k_h + ky) * d.k_w + kx] = acc;
    }
    call.put(2, dw);
    Ok(())
}

pub fn backward_bias(call: &mut HostCall) -> Result<()> {
    let (batch, c_out) = (call.uint(2)?, call.uint(3)?);
    let plane = call.uint(4)? * call.uint(5)?;

    let mut db = call.take(1, c_out)?;
    let dout = call.buf(0, batch * c_out * plane)?;
    for co in 0..c_out {
        db[co] = (0..batch)
            .map(|b| {
                let base = (b * c_out + co) * plane;
                dout[base..base + plane].iter().sum::<f32>()
            })
            .sum();
    }
    call.put(1, db);
    Ok(())
}

pub fn backward_input(call: &mut HostCall) -> Result<()> {
    let d = ConvDims::read(call, 3)?;
    let depth = call.global[2];
    let batch = depth / d.c_in.max(1);

    let mut din = call.take(2, depth * d.in_plane())?;
    let dout = call.buf(0, batch * d.c_out * d.out_plane())?;
    let w = call.buf(1, d.c_out * d.c_in * d.filter_plane())?;

    for (z, y, x) in iproduct!(0..depth, 0..d.in_h, 0..d.in_w) {
        let (b, ci) = (z / d.c_in, z % d.c_in);
        let mut acc = 0f32;
        for (co, ky, kx) in iproduct!(0..d.c_out, 0..d.k_h, 0..d.k_w) {
            if let (Some(oy), Some(ox)) = (d.target(y, ky, d.out_h), d.target(x, kx, d.out_w)) {
                let dout_base = (b * d.c_out + co) * d.out_plane();
                let w_base = (co * d.c_in + ci) * d.filter_plane();
                acc += dout[dout_base + oy * d.out_w + ox] * w[w_base + ky * d.k_w + kx];
            }
        }
        din[(z * d.in_h + y) * d.in_w + x] = acc;
    }
    call.put(2, din);
    Ok(())
}
