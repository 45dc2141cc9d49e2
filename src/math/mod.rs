//! Device-resident matrices and batched tensors.
mod matrix;
mod tensor;

pub use self::matrix::AccelMatrix;
pub use self::tensor::AccelTensor;

/// Index of the largest value of a slice; the first one on ties.
pub fn argmax(values: &[f32]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}
