//! Sources of samples for training and evaluation.
use crate::cl_util::Queue;
use crate::error::{Error, Result};
use crate::geometry::ImageGeometry;
use crate::math::AccelTensor;

/// The class of a sample, or `None` for unlabeled samples.
pub type ClassLabel = Option<usize>;

/// A fixed set of samples, each a tensor `(rows, cols, channels)` of one geometry.
pub trait InputSet {
    fn geometry(&self) -> ImageGeometry;
    fn tensor_count(&self) -> usize;
    fn get_tensor(&self, index: usize) -> Result<AccelTensor>;
    fn class_of(&self, index: usize) -> Result<ClassLabel>;
}

/// Samples kept in host memory and uploaded on request.
pub struct MemoryInputSet {
    geometry: ImageGeometry,
    samples: Vec<Vec<f32>>,
    labels: Vec<ClassLabel>,
    queue: Queue,
}

impl MemoryInputSet {
    pub fn new(geometry: ImageGeometry, queue: &Queue) -> MemoryInputSet {
        MemoryInputSet {
            geometry,
            samples: Vec::new(),
            labels: Vec::new(),
            queue: queue.clone(),
        }
    }

    /// Adds a sample of `geometry.num_elems()` values laid out channel by channel.
    pub fn push(&mut self, sample: Vec<f32>, label: ClassLabel) -> Result<()> {
        if sample.len() != self.geometry.num_elems() {
            return Err(Error::Dataset(format!(
                "sample of {} value(s) does not fit {}",
                sample.len(),
                self.geometry
            )));
        }
        self.samples.push(sample);
        self.labels.push(label);
        Ok(())
    }

    fn check(&self, index: usize) -> Result<()> {
        if index >= self.samples.len() {
            return Err(Error::IndexOutOfRange {
                index,
                len: self.samples.len(),
            });
        }
        Ok(())
    }
}

impl InputSet for MemoryInputSet {
    fn geometry(&self) -> ImageGeometry {
        self.geometry
    }

    fn tensor_count(&self) -> usize {
        self.samples.len()
    }

    fn get_tensor(&self, index: usize) -> Result<AccelTensor> {
        self.check(index)?;
        let g = self.geometry;
        AccelTensor::from_host(
            &self.samples[index],
            g.rows(),
            g.cols(),
            g.channels(),
            &self.queue,
        )
    }

    fn class_of(&self, index: usize) -> Result<ClassLabel> {
        self.check(index)?;
        Ok(self.labels[index])
    }
}

/// The target vector of class `label` among `classes` classes.
pub fn one_hot(label: usize, classes: usize) -> Result<Vec<f32>> {
    if label >= classes {
        return Err(Error::IndexOutOfRange {
            index: label,
            len: classes,
        });
    }
    let mut target = vec![0f32; classes];
    target[label] = 1.0;
    Ok(target)
}
