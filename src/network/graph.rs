use super::storage::TensorShape;
use super::topology::{InputRef, Resolved, Topology};
use super::BackpropStorage;
use crate::cl_util::{DeviceContext, Queue, QueueSet};
use crate::error::{Error, Result};
use crate::geometry::ImageGeometry;
use crate::layers::{batch_of, Layer};
use crate::math::AccelTensor;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A resolved node: its layer, its edges and the storage of the last training forward pass.
#[derive(Debug)]
pub struct Node {
    id: usize,
    layer: Layer,
    parents: Vec<InputRef>,
    children: Vec<usize>,
    queue: Queue,
    storage: Option<BackpropStorage>,
    gradients: Vec<AccelTensor>,
}

impl Node {
    pub fn id(&self) -> usize {
        self.id
    }
    pub fn layer(&self) -> &Layer {
        &self.layer
    }
    pub fn parents(&self) -> &[InputRef] {
        &self.parents
    }
    pub fn children(&self) -> &[usize] {
        &self.children
    }
    /// The queue every kernel of this node is submitted to.
    pub fn queue(&self) -> &Queue {
        &self.queue
    }
    pub fn has_storage(&self) -> bool {
        self.storage.is_some()
    }
    /// Parameter gradients of the last backward pass, in parameter slot order.
    pub fn gradients(&self) -> &[AccelTensor] {
        &self.gradients
    }
}

/// A parameter together with its latest gradient and the queue that owns both.
pub struct ParamSlot<'a> {
    pub param: &'a mut AccelTensor,
    pub gradient: Option<&'a AccelTensor>,
    pub queue: &'a Queue,
}

/// The execution graph of a topology: an arena of nodes indexed by declaration order plus the
/// sorted visiting order.
#[derive(Debug)]
pub struct DependencyGraph {
    topology: Topology,
    nodes: Vec<Node>,
    order: Vec<usize>,
    sink: usize,
    queues: QueueSet,
    cross_queue_waits: AtomicUsize,
}

impl DependencyGraph {
    pub(crate) fn new<R: Rng>(
        topology: Topology,
        resolved: Resolved,
        context: &DeviceContext,
        rng: &mut R,
    ) -> Result<DependencyGraph> {
        let Resolved {
            order,
            children,
            input_geometry,
            sink,
            ..
        } = resolved;
        // A private round-robin cursor so queue assignment depends only on the topology.
        let queues = QueueSet::new(context.queues().iter().cloned().collect());

        // A node continues on the queue of its first parent unless a sibling already did;
        // sources and extra branches take the next queue.
        let mut assigned: Vec<Option<Queue>> = vec![None; topology.len()];
        let mut continued = vec![false; topology.len()];
        for &idx in &order {
            let queue = match topology.nodes()[idx].inputs[0] {
                InputRef::Node(parent) if !continued[parent] => {
                    continued[parent] = true;
                    assigned[parent].clone()
                }
                _ => None,
            };
            assigned[idx] = Some(queue.unwrap_or_else(|| queues.next().clone()));
        }

        let mut slots = Vec::with_capacity(topology.len());
        for (idx, spec) in topology.nodes().iter().enumerate() {
            let queue = assigned[idx]
                .take()
                .ok_or_else(|| Error::Topology(format!("node {} was never scheduled", idx)))?;
            slots.push((idx, spec, queue));
        }
        // Parameters are drawn in sorted order so initialization follows the traversal the
        // model file uses.
        let mut layers: Vec<Option<Layer>> = (0..topology.len()).map(|_| None).collect();
        for &idx in &order {
            let (_, spec, queue) = &slots[idx];
            layers[idx] = Some(Layer::new(&spec.layer, input_geometry[idx], queue, rng)?);
        }
        let mut nodes = Vec::with_capacity(topology.len());
        for ((idx, spec, queue), layer) in slots.into_iter().zip(layers) {
            let layer = layer
                .ok_or_else(|| Error::Topology(format!("node {} was never built", idx)))?;
            trace!("node {}: {:?} on queue {}", idx, layer.spec(), queue.id());
            nodes.push(Node {
                id: idx,
                layer,
                parents: spec.inputs.clone(),
                children: children[idx].clone(),
                queue,
                storage: None,
                gradients: Vec::new(),
            });
        }
        queues.finish_all()?;

        debug!(
            "Built graph of {} node(s) with {} parameter(s) on {} queue(s).",
            nodes.len(),
            nodes.iter().map(|n| n.layer.params().len()).sum::<usize>(),
            queues.len()
        );
        Ok(DependencyGraph {
            topology,
            nodes,
            order,
            sink,
            queues,
            cross_queue_waits: AtomicUsize::new(0),
        })
    }

    /// A graph of the same topology that runs every node on `queue`. Its parameters alias this
    /// graph's, so updates to either are seen by both; forward state and gradients are its own.
    /// Callers must drain the queues that last wrote the parameters before the replica reads them.
    pub fn replica(&self, queue: &Queue) -> DependencyGraph {
        let nodes = self
            .nodes
            .iter()
            .map(|node| Node {
                id: node.id,
                layer: node.layer.share(),
                parents: node.parents.clone(),
                children: node.children.clone(),
                queue: queue.clone(),
                storage: None,
                gradients: Vec::new(),
            })
            .collect();
        DependencyGraph {
            topology: self.topology.clone(),
            nodes,
            order: self.order.clone(),
            sink: self.sink,
            queues: QueueSet::new(vec![queue.clone()]),
            cross_queue_waits: AtomicUsize::new(0),
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
    pub fn node(&self, id: usize) -> Result<&Node> {
        self.nodes.get(id).ok_or(Error::IndexOutOfRange {
            index: id,
            len: self.nodes.len(),
        })
    }
    /// Node ids, parents before children.
    pub fn order(&self) -> &[usize] {
        &self.order
    }
    /// The node whose output is the network output.
    pub fn sink(&self) -> usize {
        self.sink
    }
    pub fn queues(&self) -> &QueueSet {
        &self.queues
    }
    /// The queue the network output is produced on.
    pub fn output_queue(&self) -> &Queue {
        &self.nodes[self.sink].queue
    }
    pub fn input_geometry(&self) -> ImageGeometry {
        self.topology.input()
    }
    pub fn output_geometry(&self) -> ImageGeometry {
        self.nodes[self.sink].layer.output_geometry()
    }
    /// Number of times a node had to wait for another queue to drain.
    pub fn cross_queue_waits(&self) -> usize {
        self.cross_queue_waits.load(Ordering::SeqCst)
    }

    /// Makes `tensor` safe to consume on `queue` by draining the queue it was produced on.
    fn sync(&self, tensor: &AccelTensor, queue: &Queue) -> Result<()> {
        if tensor.queue() != queue {
            trace!(
                "\t↳ wait for queue {} before queue {}",
                tensor.queue().id(),
                queue.id()
            );
            tensor.queue().finish()?;
            self.cross_queue_waits.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn run(
        &self,
        input: &AccelTensor,
        record: bool,
    ) -> Result<(AccelTensor, Vec<Option<BackpropStorage>>)> {
        batch_of(input, &self.topology.input())?;
        let mut outputs: Vec<Option<AccelTensor>> = (0..self.nodes.len()).map(|_| None).collect();
        let mut storages: Vec<Option<BackpropStorage>> =
            (0..self.nodes.len()).map(|_| None).collect();

        for &idx in &self.order {
            let node = &self.nodes[idx];
            trace!("forward node {} on queue {}", idx, node.queue.id());
            let mut inputs = Vec::with_capacity(node.parents.len());
            for parent in &node.parents {
                let tensor = match *parent {
                    InputRef::Network => input,
                    InputRef::Node(p) => outputs[p].as_ref().ok_or_else(|| {
                        Error::Topology(format!("node {} ran before its parent {}", idx, p))
                    })?,
                };
                self.sync(tensor, &node.queue)?;
                inputs.push(tensor);
            }

            if record {
                let (output, storage) = node.layer.forward_train(&inputs, &node.queue)?;
                storages[idx] = Some(storage);
                outputs[idx] = Some(output);
            } else {
                let output = node.layer.forward(&inputs, &node.queue)?;
                outputs[idx] = Some(output);
            }
        }
        let output = outputs[self.sink]
            .take()
            .ok_or_else(|| Error::Topology("the output node produced nothing".to_owned()))?;
        Ok((output, storages))
    }

    /// Training forward pass over a batch `(rows, cols, batch * channels)`. Every node keeps the
    /// storage its backward pass needs until the next forward pass.
    pub fn forward(&mut self, input: &AccelTensor) -> Result<AccelTensor> {
        let (output, storages) = self.run(input, true)?;
        for (node, storage) in self.nodes.iter_mut().zip(storages) {
            node.storage = storage;
        }
        Ok(output)
    }

    /// Inference forward pass; nothing is stored in the graph.
    pub fn predict(&self, input: &AccelTensor) -> Result<AccelTensor> {
        Ok(self.run(input, false)?.0)
    }

    /// Propagates `loss_gradient` (shaped like the output of `forward`) back through the graph in
    /// reverse sorted order. A node receives the sum of the gradients of all its children before
    /// its own backward runs. Consumes the stored forward state.
    pub fn backward(&mut self, loss_gradient: &AccelTensor) -> Result<()> {
        let mut incoming: Vec<Option<AccelTensor>> = (0..self.nodes.len()).map(|_| None).collect();
        incoming[self.sink] = Some(loss_gradient.view());

        for &idx in self.order.iter().rev() {
            let storage = self.nodes[idx].storage.take().ok_or_else(|| {
                Error::Topology(format!("node {} has no stored forward pass", idx))
            })?;
            let gradient = incoming[idx]
                .take()
                .ok_or_else(|| Error::Topology(format!("node {} received no gradient", idx)))?;
            let node = &self.nodes[idx];
            trace!("backward node {} on queue {}", idx, node.queue.id());
            self.sync(&gradient, &node.queue)?;
            let (input_gradient, param_gradients) =
                node.layer.backward(&gradient, storage, &node.queue)?;

            for parent in &node.parents {
                if let InputRef::Node(p) = *parent {
                    let parent_queue = &self.nodes[p].queue;
                    self.sync(&input_gradient, parent_queue)?;
                    incoming[p] = Some(match incoming[p].take() {
                        None => input_gradient.view(),
                        Some(sum) => {
                            self.sync(&sum, parent_queue)?;
                            sum.add(&input_gradient, parent_queue, false)?
                        }
                    });
                }
            }
            self.nodes[idx].gradients = param_gradients;
        }
        Ok(())
    }

    /// Runs `forward` and `backward` once; returns the network output.
    pub fn forward_backward<F>(&mut self, input: &AccelTensor, loss: F) -> Result<AccelTensor>
    where
        F: FnOnce(&AccelTensor) -> Result<AccelTensor>,
    {
        let output = self.forward(input)?;
        let gradient = loss(&output)?;
        self.backward(&gradient)?;
        Ok(output)
    }

    /// Every parameter in sorted-node, slot order.
    pub fn params(&self) -> Vec<&AccelTensor> {
        self.order
            .iter()
            .flat_map(|&idx| self.nodes[idx].layer.params())
            .collect()
    }

    pub fn param_shapes(&self) -> Vec<TensorShape> {
        self.params().iter().map(|p| p.shape()).collect()
    }

    /// Latest gradient of every parameter, in the order of `params`.
    pub fn gradients(&self) -> Vec<&AccelTensor> {
        self.order
            .iter()
            .flat_map(|&idx| self.nodes[idx].gradients.iter())
            .collect()
    }

    /// Every parameter with its gradient and queue, in the order of `params`. The gradient is
    /// `None` until a backward pass has run.
    pub fn param_slots(&mut self) -> Vec<ParamSlot> {
        let mut by_id = self.nodes.iter_mut().map(Some).collect::<Vec<_>>();
        let mut slots = Vec::new();
        for &idx in &self.order {
            if let Some(Node {
                layer,
                gradients,
                queue,
                ..
            }) = by_id[idx].take()
            {
                let queue = &*queue;
                let gradients = &*gradients;
                for (slot, param) in layer.params_mut().into_iter().enumerate() {
                    slots.push(ParamSlot {
                        param,
                        gradient: gradients.get(slot),
                        queue,
                    });
                }
            }
        }
        slots
    }

    /// Overwrites every parameter, given in the order of `params`, from host data.
    pub fn load_params(&mut self, params: &[Vec<f32>]) -> Result<()> {
        let expected = self.params().len();
        if params.len() != expected {
            return Err(Error::TopologyMismatch(format!(
                "expected {} parameter(s), found {}",
                expected,
                params.len()
            )));
        }
        for (slot, data) in self.param_slots().into_iter().zip(params) {
            if slot.param.len() != data.len() {
                return Err(Error::TopologyMismatch(format!(
                    "parameter of shape {:?} cannot hold {} value(s)",
                    slot.param.shape(),
                    data.len()
                )));
            }
            slot.param.write_host(data, slot.queue)?;
        }
        Ok(())
    }

    /// Blocks until every queue of the graph has drained.
    pub fn finish(&self) -> Result<()> {
        self.queues.finish_all()
    }
}
