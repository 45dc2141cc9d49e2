use crate::cl_util::Queue;
use crate::error::{Error, Result};
use crate::math::AccelTensor;

/// Mean-squared error `0.5 * ||output - target||^2`, averaged over the `batch` samples, and its
/// gradient `output - target` with respect to the output. The loss is read back to the host, the
/// gradient stays on the device.
pub fn mse(
    output: &AccelTensor,
    target: &AccelTensor,
    batch: usize,
    queue: &Queue,
) -> Result<(f32, AccelTensor)> {
    if batch == 0 {
        return Err(Error::shape_mismatch("mse", "a non-empty batch", batch));
    }
    let (rows, cols, depth) = output.shape();
    let target = target.reshape(rows, cols, depth)?;
    let gradient = output.sub(&target, queue, true)?;
    let squares = gradient.to_vec()?.iter().map(|d| d * d).sum::<f32>();
    Ok((0.5 * squares / batch as f32, gradient))
}
