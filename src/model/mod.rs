//! A trainable network: a topology, its graph with all parameters and the bound optimizer.
pub mod serialize;
#[cfg(test)]
mod test;

use crate::cl_util::DeviceContext;
use crate::error::{Error, Result};
use crate::geometry::ImageGeometry;
use crate::layers::{batch_of, Activation, LayerSpec};
use crate::math::AccelTensor;
use crate::network::{mse, DependencyGraph, InputRef, TensorShape, Topology};
use crate::optimizer::Optimizer;
use rand::Rng;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

pub struct Model {
    context: DeviceContext,
    graph: DependencyGraph,
    optimizer: Option<Optimizer>,
}

impl Model {
    /// Builds `topology` on `context` with randomly initialized parameters.
    pub fn new(topology: &Topology, context: &DeviceContext) -> Result<Model> {
        Model::with_rng(topology, context, &mut rand::thread_rng())
    }

    pub fn with_rng<R: Rng>(
        topology: &Topology,
        context: &DeviceContext,
        rng: &mut R,
    ) -> Result<Model> {
        Ok(Model {
            context: context.clone(),
            graph: topology.build_with_rng(context, rng)?,
            optimizer: None,
        })
    }

    /// A multi-layer perceptron `sizes[0] -> sizes[1] -> ...`.
    pub fn mlp(context: &DeviceContext, sizes: &[usize], activation: Activation) -> Result<Model> {
        Model::new(&Topology::mlp(sizes, activation)?, context)
    }

    /// A convolutional network: `features` followed by a dense head of `dense_sizes`, all dense
    /// layers using `activation`.
    pub fn cnn(
        context: &DeviceContext,
        features: &Topology,
        dense_sizes: &[usize],
        activation: Activation,
    ) -> Result<Model> {
        let mut topology = features.clone();
        let mut last = features.resolve()?.sink;
        for &outputs in dense_sizes {
            last = topology.push_with_inputs(
                LayerSpec::Dense {
                    outputs,
                    activation,
                },
                vec![InputRef::Node(last)],
            );
        }
        Model::new(&topology, context)
    }

    pub fn context(&self) -> &DeviceContext {
        &self.context
    }
    pub fn topology(&self) -> &Topology {
        self.graph.topology()
    }
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }
    pub fn input_geometry(&self) -> ImageGeometry {
        self.graph.input_geometry()
    }
    pub fn output_geometry(&self) -> ImageGeometry {
        self.graph.output_geometry()
    }

    /// Binds `optimizer`, replacing (and discarding the state of) any earlier one.
    pub fn bind_optimizer(&mut self, optimizer: Optimizer) {
        debug!(
            "Bind {} optimizer with {:?} updates.",
            optimizer.optimization(),
            optimizer.policy()
        );
        self.optimizer = Some(optimizer);
    }

    pub fn optimizer(&self) -> Option<&Optimizer> {
        self.optimizer.as_ref()
    }

    /// Number of samples in `input`, which must be `(rows, cols, batch * channels)` for the input
    /// geometry (or any reshaping of it).
    pub fn batch_size(&self, input: &AccelTensor) -> Result<usize> {
        batch_of(input, &self.input_geometry())
    }

    /// One training pass over a batch: forward, loss against `target`, backward and optimizer
    /// steps. The batch is split so no backward pass spans an update boundary of the optimizer.
    /// Returns the mean loss over the batch.
    pub fn train(&mut self, input: &AccelTensor, target: &AccelTensor) -> Result<f32> {
        let (batch, input, target) = self.training_views(input, target)?;
        let (in_channels, out_channels) = (
            self.input_geometry().channels(),
            self.output_geometry().channels(),
        );
        let optimizer = self
            .optimizer
            .as_mut()
            .ok_or_else(|| Error::Topology("no optimizer bound to the model".to_owned()))?;

        let mut total = 0f32;
        let mut offset = 0;
        while offset < batch {
            let samples = optimizer.chunk_size(batch - offset);
            let end = offset + samples;
            let x = input.slice(offset * in_channels, end * in_channels)?;
            let t = target.slice(offset * out_channels, end * out_channels)?;

            let output = self.graph.forward(&x)?;
            let (loss, gradient) = mse(&output, &t, samples, self.graph.output_queue())?;
            self.graph.backward(&gradient)?;
            optimizer.step(&mut self.graph, samples)?;

            total += loss * samples as f32;
            offset = end;
        }
        Ok(total / batch as f32)
    }

    /// Like `train`, but every update chunk is split into up to `jobs` slices. Each slice runs
    /// forward and backward on its own queue of the graph, through a replica sharing the model's
    /// parameters; the gradients of all slices are summed into the optimizer before the one
    /// update of the chunk. At most one slice per graph queue is used.
    pub fn train_parallel(
        &mut self,
        input: &AccelTensor,
        target: &AccelTensor,
        jobs: usize,
    ) -> Result<f32> {
        let (batch, input, target) = self.training_views(input, target)?;
        let (in_channels, out_channels) = (
            self.input_geometry().channels(),
            self.output_geometry().channels(),
        );
        let optimizer = self
            .optimizer
            .as_mut()
            .ok_or_else(|| Error::Topology("no optimizer bound to the model".to_owned()))?;
        let graph = &mut self.graph;
        let jobs = jobs.max(1).min(graph.queues().len());
        let mut replicas = graph
            .queues()
            .iter()
            .take(jobs)
            .map(|queue| graph.replica(queue))
            .collect::<Vec<_>>();
        debug!("Train {} sample(s) over {} queue(s).", batch, jobs);

        let mut total = 0f32;
        let mut offset = 0;
        while offset < batch {
            let samples = optimizer.chunk_size(batch - offset);
            let counts = (0..jobs)
                .map(|rank| samples / jobs + if rank < samples % jobs { 1 } else { 0 })
                .take_while(|&count| count > 0)
                .collect::<Vec<_>>();
            // The replicas read parameters the last update wrote.
            graph.finish()?;

            let mut outputs = Vec::with_capacity(counts.len());
            let mut start = offset;
            for (replica, &count) in replicas.iter_mut().zip(&counts) {
                let x = input.slice(start * in_channels, (start + count) * in_channels)?;
                outputs.push((start, replica.forward(&x)?));
                start += count;
            }
            for ((replica, &count), (start, output)) in
                replicas.iter_mut().zip(&counts).zip(outputs)
            {
                let t = target.slice(start * out_channels, (start + count) * out_channels)?;
                let (loss, gradient) = mse(&output, &t, count, replica.output_queue())?;
                replica.backward(&gradient)?;
                total += loss * count as f32;
            }
            graph.finish()?;

            for (replica, &count) in replicas.iter().zip(&counts) {
                let gradients = replica
                    .gradients()
                    .into_iter()
                    .map(AccelTensor::view)
                    .collect::<Vec<_>>();
                optimizer.accumulate(graph, &gradients, count)?;
            }
            optimizer.commit(graph)?;
            offset += samples;
        }
        Ok(total / batch as f32)
    }

    /// Checks a training batch against the model and returns its size with `input` and `target`
    /// reshaped to `(rows, cols, batch * channels)`.
    fn training_views(
        &self,
        input: &AccelTensor,
        target: &AccelTensor,
    ) -> Result<(usize, AccelTensor, AccelTensor)> {
        let batch = self.batch_size(input)?;
        if batch == 0 {
            return Err(Error::shape_mismatch("train", "a non-empty batch", batch));
        }
        let (in_geom, out_geom) = (self.input_geometry(), self.output_geometry());
        if target.len() != batch * out_geom.num_elems() {
            return Err(Error::shape_mismatch(
                "train target",
                (out_geom.rows(), out_geom.cols(), batch * out_geom.channels()),
                target.shape(),
            ));
        }
        let input = input.reshape(in_geom.rows(), in_geom.cols(), batch * in_geom.channels())?;
        let target = target.reshape(
            out_geom.rows(),
            out_geom.cols(),
            batch * out_geom.channels(),
        )?;
        Ok((batch, input, target))
    }

    /// Applies pending gradients and advances the optimizer schedule.
    pub fn end_epoch(&mut self) -> Result<()> {
        match self.optimizer.as_mut() {
            Some(optimizer) => optimizer.end_epoch(&mut self.graph),
            None => Ok(()),
        }
    }

    /// Inference over a batch; the output is `(rows, cols, batch * channels)` of the output
    /// geometry.
    pub fn predict(&self, input: &AccelTensor) -> Result<AccelTensor> {
        self.graph.predict(input)
    }

    /// Mean loss over a batch without touching parameters.
    pub fn loss(&self, input: &AccelTensor, target: &AccelTensor) -> Result<f32> {
        let batch = self.batch_size(input)?;
        let output = self.predict(input)?;
        Ok(mse(&output, target, batch, self.graph.output_queue())?.0)
    }

    /// Host copies of every parameter in graph order.
    pub fn params(&self) -> Result<Vec<(TensorShape, Vec<f32>)>> {
        self.graph.finish()?;
        self.graph
            .params()
            .into_iter()
            .map(|p| Ok((p.shape(), p.to_vec()?)))
            .collect()
    }

    pub fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        serialize::write_header(writer)?;
        serialize::write_topology(writer, self.topology())?;
        serialize::write_params(writer, &self.params()?)?;
        Ok(())
    }

    /// Rebuilds the topology stored in `reader` on `context` and loads its parameters.
    pub fn deserialize<R: Read>(reader: &mut R, context: &DeviceContext) -> Result<Model> {
        serialize::read_header(reader)?;
        let topology = serialize::read_topology(reader)?;
        let mut model = Model::new(&topology, context)?;
        let params = serialize::read_params(reader, &model.graph.param_shapes())?;
        model.load_params(&params)?;
        Ok(model)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        self.serialize(&mut writer)?;
        writer.flush()?;
        info!("Saved model to {}.", path.as_ref().display());
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P, context: &DeviceContext) -> Result<Model> {
        let mut reader = BufReader::new(File::open(path.as_ref())?);
        let model = Model::deserialize(&mut reader, context)?;
        info!(
            "Loaded model of {} node(s) from {}.",
            model.graph.len(),
            path.as_ref().display()
        );
        Ok(model)
    }

    /// Loads the parameters of a model file into this model. The file's topology must equal the
    /// model's.
    pub fn read_weights<R: Read>(&mut self, reader: &mut R) -> Result<()> {
        serialize::read_header(reader)?;
        let topology = serialize::read_topology(reader)?;
        if &topology != self.topology() {
            return Err(Error::TopologyMismatch(format!(
                "the file describes\n{}the model is\n{}",
                topology,
                self.topology()
            )));
        }
        let params = serialize::read_params(reader, &self.graph.param_shapes())?;
        self.load_params(&params)
    }

    pub fn load_weights<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let mut reader = BufReader::new(File::open(path.as_ref())?);
        self.read_weights(&mut reader)?;
        info!("Loaded weights from {}.", path.as_ref().display());
        Ok(())
    }

    fn load_params(&mut self, params: &[Vec<f32>]) -> Result<()> {
        self.graph.load_params(params)?;
        if let Some(optimizer) = self.optimizer.as_mut() {
            optimizer.reset();
        }
        Ok(())
    }
}
