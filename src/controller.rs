//! Training and evaluation loops around a `Model`.
use crate::cl_util::Queue;
use crate::dataset::{one_hot, InputSet};
use crate::error::{Error, Result};
use crate::math::{argmax, AccelTensor};
use crate::model::Model;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq)]
pub enum ControllerStatus {
    Completed,
    /// Stopped by an error that its policy does not allow to skip
    Aborted(String),
}

/// Outcome of a controller run: a status and named metrics such as `loss` or `accuracy`.
#[derive(Clone, Debug, PartialEq)]
pub struct ControllerResult {
    pub status: ControllerStatus,
    pub metrics: BTreeMap<String, f32>,
}

impl ControllerResult {
    pub fn is_completed(&self) -> bool {
        self.status == ControllerStatus::Completed
    }
    pub fn metric(&self, name: &str) -> Option<f32> {
        self.metrics.get(name).cloned()
    }
}

pub trait Controller {
    fn run(&mut self, model: &mut Model) -> ControllerResult;
}

/// A batch of samples gathered from an input set, with their one-hot targets.
struct Batch {
    input: AccelTensor,
    target: AccelTensor,
    labels: Vec<usize>,
}

/// Gathers the labeled samples `indices` into one batch. Unlabeled samples are left out, and so
/// are unreadable ones when `skip_errors` is set; `skipped` counts those.
fn gather<S: InputSet + ?Sized>(
    set: &S,
    indices: &[usize],
    classes: usize,
    skip_errors: bool,
    skipped: &mut usize,
    queue: &Queue,
) -> Result<Option<Batch>> {
    let geometry = set.geometry();
    let mut samples = Vec::with_capacity(indices.len());
    let mut labels = Vec::with_capacity(indices.len());
    for &idx in indices {
        let sample = set
            .class_of(idx)
            .and_then(|label| Ok((label, set.get_tensor(idx)?)));
        match sample {
            Ok((Some(label), tensor)) => {
                samples.push(tensor);
                labels.push(label);
            }
            Ok((None, _)) => trace!("sample {} has no label", idx),
            Err(e) if skip_errors && e.is_recoverable() => {
                warn!("Skipping sample {}: {}", idx, e);
                *skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }
    if samples.is_empty() {
        return Ok(None);
    }

    let channels = geometry.channels();
    let input = AccelTensor::zeros(
        geometry.rows(),
        geometry.cols(),
        samples.len() * channels,
        queue,
    )?;
    for (j, sample) in samples.iter().enumerate() {
        let mut dst = input.slice(j * channels, (j + 1) * channels)?;
        dst.copy_from(&sample.reshape(geometry.rows(), geometry.cols(), channels)?, queue, false)?;
    }
    let mut targets = Vec::with_capacity(labels.len() * classes);
    for &label in &labels {
        targets.extend(one_hot(label, classes)?);
    }
    let target = AccelTensor::from_host(&targets, classes, 1, labels.len(), queue)?;
    Ok(Some(Batch {
        input,
        target,
        labels,
    }))
}

/// Trains a model for a number of epochs over an input set.
pub struct TrainingController<S: InputSet> {
    set: S,
    epochs: usize,
    batch_size: usize,
    skip_errors: bool,
}

impl<S: InputSet> TrainingController<S> {
    pub fn new(set: S, epochs: usize, batch_size: usize) -> TrainingController<S> {
        TrainingController {
            set,
            epochs,
            batch_size: batch_size.max(1),
            skip_errors: false,
        }
    }

    /// Whether recoverable dataset errors skip the sample instead of aborting the run.
    pub fn skip_errors(mut self, skip: bool) -> TrainingController<S> {
        self.skip_errors = skip;
        self
    }

    pub fn set(&self) -> &S {
        &self.set
    }

    fn train(&mut self, model: &mut Model, metrics: &mut BTreeMap<String, f32>) -> Result<()> {
        let classes = model.output_geometry().num_elems();
        let queue = model.context().default_queue().clone();
        let indices = (0..self.set.tensor_count()).collect::<Vec<_>>();
        let mut skipped = 0;
        for epoch in 0..self.epochs {
            let (mut total, mut seen) = (0f32, 0usize);
            for chunk in indices.chunks(self.batch_size) {
                let batch =
                    match gather(&self.set, chunk, classes, self.skip_errors, &mut skipped, &queue)? {
                        Some(batch) => batch,
                        None => continue,
                    };
                let samples = batch.labels.len();
                total += model.train(&batch.input, &batch.target)? * samples as f32;
                seen += samples;
            }
            model.end_epoch()?;
            let loss = if seen > 0 { total / seen as f32 } else { 0.0 };
            debug!("Epoch {}: mean loss {} over {} sample(s).", epoch, loss, seen);
            metrics.insert("loss".to_owned(), loss);
            metrics.insert("epochs".to_owned(), (epoch + 1) as f32);
        }
        metrics.insert("skipped".to_owned(), skipped as f32);
        Ok(())
    }
}

impl<S: InputSet> Controller for TrainingController<S> {
    fn run(&mut self, model: &mut Model) -> ControllerResult {
        let mut metrics = BTreeMap::new();
        let status = match self.train(model, &mut metrics) {
            Ok(()) => ControllerStatus::Completed,
            Err(e) => {
                error!("Training aborted: {}", e);
                ControllerStatus::Aborted(e.to_string())
            }
        };
        ControllerResult { status, metrics }
    }
}

/// Top-1 accuracy over the labeled samples of `set`. Returns the accuracy and the number of
/// samples it was computed over.
pub fn accuracy<S: InputSet + ?Sized>(model: &Model, set: &S) -> Result<(f32, usize)> {
    let classes = model.output_geometry().num_elems();
    let (mut correct, mut total) = (0usize, 0usize);
    for idx in 0..set.tensor_count() {
        let label = match set.class_of(idx)? {
            Some(label) => label,
            None => continue,
        };
        let output = model.predict(&set.get_tensor(idx)?)?.to_vec()?;
        if output.len() != classes {
            return Err(Error::shape_mismatch("accuracy", classes, output.len()));
        }
        total += 1;
        if argmax(&output) == Some(label) {
            correct += 1;
        }
    }
    let accuracy = if total > 0 {
        correct as f32 / total as f32
    } else {
        0.0
    };
    Ok((accuracy, total))
}

/// Measures top-1 accuracy and mean loss of a model over an input set.
pub struct EvaluationController<S: InputSet> {
    set: S,
}

impl<S: InputSet> EvaluationController<S> {
    pub fn new(set: S) -> EvaluationController<S> {
        EvaluationController { set }
    }

    fn evaluate(&self, model: &Model, metrics: &mut BTreeMap<String, f32>) -> Result<()> {
        let (acc, total) = accuracy(model, &self.set)?;
        let classes = model.output_geometry().num_elems();
        let queue = model.context().default_queue().clone();
        let indices = (0..self.set.tensor_count()).collect::<Vec<_>>();
        let mut skipped = 0;
        if let Some(batch) = gather(&self.set, &indices, classes, false, &mut skipped, &queue)? {
            metrics.insert("loss".to_owned(), model.loss(&batch.input, &batch.target)?);
        }
        info!("Accuracy: {}/{} = {:.3}", (acc * total as f32).round(), total, acc);
        metrics.insert("accuracy".to_owned(), acc);
        metrics.insert("samples".to_owned(), total as f32);
        Ok(())
    }
}

impl<S: InputSet> Controller for EvaluationController<S> {
    fn run(&mut self, model: &mut Model) -> ControllerResult {
        let mut metrics = BTreeMap::new();
        let status = match self.evaluate(model, &mut metrics) {
            Ok(()) => ControllerStatus::Completed,
            Err(e) => {
                error!("Evaluation aborted: {}", e);
                ControllerStatus::Aborted(e.to_string())
            }
        };
        ControllerResult { status, metrics }
    }
}
