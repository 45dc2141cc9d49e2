use super::{Optimization, ParamState};
use crate::error::{Error, Result};
use crate::math::AccelTensor;
use crate::network::DependencyGraph;

/// When accumulated gradients are turned into a parameter update.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BatchPolicy {
    /// After every sample
    Stochastic,
    /// After every `n` samples; a partial batch is applied at the end of the epoch
    MiniBatch(usize),
    /// Once per epoch, over every sample seen
    FullBatch,
}

impl BatchPolicy {
    /// Samples per update, or `None` when updates happen only at the end of an epoch.
    pub fn threshold(&self) -> Option<usize> {
        match *self {
            BatchPolicy::Stochastic => Some(1),
            BatchPolicy::MiniBatch(n) => Some(n.max(1)),
            BatchPolicy::FullBatch => None,
        }
    }
}

/// Drives an `Optimization` over the parameters of a graph. Owns the per-parameter state and the
/// gradient accumulators, both indexed like `DependencyGraph::params`.
#[derive(Debug)]
pub struct Optimizer {
    optimization: Optimization,
    policy: BatchPolicy,
    states: Vec<ParamState>,
    accumulators: Vec<Option<AccelTensor>>,
    pending: usize,
    updates: usize,
}

impl Optimizer {
    pub fn new(optimization: Optimization, policy: BatchPolicy) -> Optimizer {
        Optimizer {
            optimization,
            policy,
            states: Vec::new(),
            accumulators: Vec::new(),
            pending: 0,
            updates: 0,
        }
    }

    pub fn stochastic(optimization: Optimization) -> Optimizer {
        Optimizer::new(optimization, BatchPolicy::Stochastic)
    }
    pub fn mini_batch(optimization: Optimization, batch_size: usize) -> Optimizer {
        Optimizer::new(optimization, BatchPolicy::MiniBatch(batch_size))
    }
    pub fn full_batch(optimization: Optimization) -> Optimizer {
        Optimizer::new(optimization, BatchPolicy::FullBatch)
    }

    pub fn optimization(&self) -> &Optimization {
        &self.optimization
    }
    pub fn policy(&self) -> BatchPolicy {
        self.policy
    }
    /// Samples whose gradients are accumulated but not yet applied.
    pub fn pending(&self) -> usize {
        self.pending
    }
    /// Parameter updates applied so far.
    pub fn updates(&self) -> usize {
        self.updates
    }
    pub fn states(&self) -> &[ParamState] {
        &self.states
    }

    /// The largest number of samples the next backward pass may cover without crossing an update
    /// boundary.
    pub fn chunk_size(&self, available: usize) -> usize {
        match self.policy.threshold() {
            Some(threshold) => available.min(threshold.saturating_sub(self.pending).max(1)),
            None => available,
        }
    }

    /// Drops all state and pending gradients, as for a freshly bound optimizer.
    pub fn reset(&mut self) {
        self.states.clear();
        self.accumulators.clear();
        self.pending = 0;
    }

    /// Adds the gradients of the last backward pass over `samples` samples to the accumulators
    /// and applies an update when the policy says so. Returns whether parameters changed.
    pub fn step(&mut self, graph: &mut DependencyGraph, samples: usize) -> Result<bool> {
        let gradients = graph
            .param_slots()
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.gradient.map(AccelTensor::view).ok_or_else(|| {
                    Error::Topology(format!("parameter {} has no gradient", idx))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.accumulate(graph, &gradients, samples)?;
        self.commit(graph)
    }

    /// Adds `gradients`, given in the order of `graph.params()` and summed over `samples`
    /// samples, to the accumulators without applying anything. The gradients may come from a
    /// replica of `graph`; their queues must be drained.
    pub fn accumulate(
        &mut self,
        graph: &mut DependencyGraph,
        gradients: &[AccelTensor],
        samples: usize,
    ) -> Result<()> {
        let slots = graph.param_slots();
        if gradients.len() != slots.len() {
            return Err(Error::shape_mismatch(
                "accumulated gradients",
                slots.len(),
                gradients.len(),
            ));
        }
        if self.accumulators.len() != slots.len() {
            self.accumulators = (0..slots.len()).map(|_| None).collect();
        }
        for (idx, (slot, gradient)) in slots.into_iter().zip(gradients).enumerate() {
            if !slot.param.same_shape(gradient) {
                return Err(Error::shape_mismatch(
                    "accumulated gradient",
                    slot.param.shape(),
                    gradient.shape(),
                ));
            }
            match &mut self.accumulators[idx] {
                Some(sum) => sum.ipadd(1.0, gradient, slot.queue, false)?,
                empty => *empty = Some(AccelTensor::copy_of(gradient, slot.queue, false)?),
            }
        }
        self.pending += samples;
        Ok(())
    }

    /// Applies an update if the pending samples reached the policy's threshold. Returns whether
    /// parameters changed.
    pub fn commit(&mut self, graph: &mut DependencyGraph) -> Result<bool> {
        match self.policy.threshold() {
            Some(threshold) if self.pending >= threshold => {
                self.apply(graph)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Applies the averaged accumulated gradients to the parameters and clears the accumulators.
    pub fn apply(&mut self, graph: &mut DependencyGraph) -> Result<()> {
        if self.pending == 0 {
            return Ok(());
        }
        let slots = graph.param_slots();
        if self.accumulators.len() != slots.len() {
            return Err(Error::shape_mismatch(
                "optimizer accumulators",
                slots.len(),
                self.accumulators.len(),
            ));
        }
        if self.states.len() != slots.len() {
            self.states = (0..slots.len()).map(|_| ParamState::Empty).collect();
        }
        let scale = 1.0 / self.pending as f32;
        for (idx, slot) in slots.into_iter().enumerate() {
            let sum = self.accumulators[idx].take().ok_or_else(|| {
                Error::Topology(format!("parameter {} accumulated nothing", idx))
            })?;
            let gradient = sum.scale(scale, slot.queue, false)?;
            self.optimization
                .optimize(slot.param, &gradient, &mut self.states[idx], slot.queue)?;
        }
        trace!(
            "{} update #{} over {} sample(s)",
            self.optimization,
            self.updates + 1,
            self.pending
        );
        self.pending = 0;
        self.updates += 1;
        Ok(())
    }

    /// Applies what is still pending and advances the optimization schedule.
    pub fn end_epoch(&mut self, graph: &mut DependencyGraph) -> Result<()> {
        self.apply(graph)?;
        self.optimization.update();
        Ok(())
    }
}
