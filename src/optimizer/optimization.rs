use crate::cl_util::{KernelCall, Program, Queue};
use crate::error::{Error, Result};
use crate::math::AccelTensor;
use std::fmt;

/// Step-size adaptation constants of resilient backpropagation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RPropParams {
    pub eta_plus: f32,
    pub eta_minus: f32,
    pub delta_max: f32,
    pub delta_min: f32,
    pub initial_delta: f32,
}

impl Default for RPropParams {
    fn default() -> RPropParams {
        RPropParams {
            eta_plus: 1.2,
            eta_minus: 0.5,
            delta_max: 50.0,
            delta_min: 1e-6,
            initial_delta: 0.1,
        }
    }
}

/// A parameter update rule. Decay schedules compute the learning rate as
/// `learning_rate / (1 + decay * epoch)`; `update` advances the epoch.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Optimization {
    Sgd {
        learning_rate: f32,
    },
    Momentum {
        learning_rate: f32,
        momentum: f32,
    },
    Decay {
        learning_rate: f32,
        decay: f32,
        epoch: usize,
    },
    DecayMomentum {
        learning_rate: f32,
        decay: f32,
        momentum: f32,
        epoch: usize,
    },
    RPropP(RPropParams),
}

/// Per-parameter auxiliary values of an update rule, shaped like the parameter.
#[derive(Debug)]
pub enum ParamState {
    /// Nothing allocated yet
    Empty,
    Velocity(AccelTensor),
    RProp {
        old_gradient: AccelTensor,
        delta: AccelTensor,
        last_change: AccelTensor,
    },
}

impl ParamState {
    pub fn is_empty(&self) -> bool {
        match self {
            ParamState::Empty => true,
            _ => false,
        }
    }
}

impl Optimization {
    pub fn sgd(learning_rate: f32) -> Optimization {
        Optimization::Sgd { learning_rate }
    }

    pub fn momentum(learning_rate: f32, momentum: f32) -> Optimization {
        Optimization::Momentum {
            learning_rate,
            momentum,
        }
    }

    pub fn decay(learning_rate: f32, decay: f32) -> Optimization {
        Optimization::Decay {
            learning_rate,
            decay,
            epoch: 0,
        }
    }

    pub fn decay_momentum(learning_rate: f32, decay: f32, momentum: f32) -> Optimization {
        Optimization::DecayMomentum {
            learning_rate,
            decay,
            momentum,
            epoch: 0,
        }
    }

    pub fn rprop() -> Optimization {
        Optimization::RPropP(RPropParams::default())
    }

    pub fn name(&self) -> &'static str {
        match self {
            Optimization::Sgd { .. } => "sgd",
            Optimization::Momentum { .. } => "momentum",
            Optimization::Decay { .. } => "decay",
            Optimization::DecayMomentum { .. } => "decay-momentum",
            Optimization::RPropP(_) => "rprop+",
        }
    }

    /// The learning rate the next update uses; RProp has none.
    pub fn learning_rate(&self) -> Option<f32> {
        let decayed = |lr: f32, decay: f32, epoch: usize| lr / (1.0 + decay * epoch as f32);
        match *self {
            Optimization::Sgd { learning_rate } | Optimization::Momentum { learning_rate, .. } => {
                Some(learning_rate)
            }
            Optimization::Decay {
                learning_rate,
                decay,
                epoch,
            }
            | Optimization::DecayMomentum {
                learning_rate,
                decay,
                epoch,
                ..
            } => Some(decayed(learning_rate, decay, epoch)),
            Optimization::RPropP(_) => None,
        }
    }

    /// Advances the schedule by one epoch. Only decay rules have a schedule.
    pub fn update(&mut self) {
        match self {
            Optimization::Decay { epoch, .. } | Optimization::DecayMomentum { epoch, .. } => {
                *epoch += 1
            }
            _ => return,
        }
        trace!("{} schedule at epoch {}", self.name(), self.epoch());
    }

    pub fn epoch(&self) -> usize {
        match *self {
            Optimization::Decay { epoch, .. } | Optimization::DecayMomentum { epoch, .. } => epoch,
            _ => 0,
        }
    }

    /// Allocates the auxiliary state this rule keeps for `param`.
    pub fn init_state(&self, param: &AccelTensor, queue: &Queue) -> Result<ParamState> {
        let (rows, cols, depth) = param.shape();
        Ok(match self {
            Optimization::Sgd { .. } | Optimization::Decay { .. } => ParamState::Empty,
            Optimization::Momentum { .. } | Optimization::DecayMomentum { .. } => {
                ParamState::Velocity(AccelTensor::zeros(rows, cols, depth, queue)?)
            }
            Optimization::RPropP(params) => {
                let mut delta = AccelTensor::zeros(rows, cols, depth, queue)?;
                delta.fill(params.initial_delta, queue, false)?;
                ParamState::RProp {
                    old_gradient: AccelTensor::zeros(rows, cols, depth, queue)?,
                    delta,
                    last_change: AccelTensor::zeros(rows, cols, depth, queue)?,
                }
            }
        })
    }

    /// Applies one update of `param` by `gradient` on `queue`, mutating both the parameter and
    /// its state in place.
    pub fn optimize(
        &self,
        param: &mut AccelTensor,
        gradient: &AccelTensor,
        state: &mut ParamState,
        queue: &Queue,
    ) -> Result<()> {
        if !param.same_shape(gradient) {
            return Err(Error::shape_mismatch(
                "optimize",
                param.shape(),
                gradient.shape(),
            ));
        }
        if state.is_empty() {
            *state = self.init_state(param, queue)?;
        }
        let n = param.len();
        match (self, state) {
            (Optimization::Sgd { .. }, _) | (Optimization::Decay { .. }, _) => {
                let lr = self.learning_rate().unwrap_or(0.0);
                param.ipadd(-lr, gradient, queue, false)
            }
            (Optimization::Momentum { momentum, .. }, ParamState::Velocity(velocity))
            | (Optimization::DecayMomentum { momentum, .. }, ParamState::Velocity(velocity)) => {
                let lr = self.learning_rate().unwrap_or(0.0);
                let (w_buf, w_off, _) = param.arg();
                let (g_buf, g_off, _) = gradient.arg();
                let (v_buf, v_off, _) = velocity.arg();
                let call = KernelCall::new(Program::Optimization, "momentum_update")
                    .global([n, 1, 1])
                    .buffer(w_buf, w_off, n)
                    .buffer(g_buf, g_off, n)
                    .buffer(v_buf, v_off, n)
                    .float(lr)
                    .float(*momentum)
                    .uint(n);
                queue.run(call, false)
            }
            (
                Optimization::RPropP(params),
                ParamState::RProp {
                    old_gradient,
                    delta,
                    last_change,
                },
            ) => {
                let (w_buf, w_off, _) = param.arg();
                let (g_buf, g_off, _) = gradient.arg();
                let (o_buf, o_off, _) = old_gradient.arg();
                let (d_buf, d_off, _) = delta.arg();
                let (l_buf, l_off, _) = last_change.arg();
                let call = KernelCall::new(Program::Optimization, "rprop_update")
                    .global([n, 1, 1])
                    .buffer(w_buf, w_off, n)
                    .buffer(g_buf, g_off, n)
                    .buffer(o_buf, o_off, n)
                    .buffer(d_buf, d_off, n)
                    .buffer(l_buf, l_off, n)
                    .float(params.eta_plus)
                    .float(params.eta_minus)
                    .float(params.delta_max)
                    .float(params.delta_min)
                    .uint(n);
                queue.run(call, false)
            }
            (rule, state) => Err(Error::Device(format!(
                "{} cannot use optimizer state {:?}",
                rule.name(),
                state
            ))),
        }
    }
}

impl fmt::Display for Optimization {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.learning_rate() {
            Some(lr) => write!(f, "{} (lr: {})", self.name(), lr),
            None => f.write_str(self.name()),
        }
    }
}
