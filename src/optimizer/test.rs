use super::*;
use crate::cl_util::{DeviceContext, Queue};
use crate::layers::Activation;
use crate::math::AccelTensor;
use crate::network::{mse, DependencyGraph, Topology};
use crate::util::verify;
use rand::rngs::StdRng;
use rand::SeedableRng;

const MARGIN: f32 = 1e-6;

fn all_rules() -> Vec<Optimization> {
    vec![
        Optimization::sgd(0.1),
        Optimization::momentum(0.1, 0.9),
        Optimization::decay(0.1, 0.5),
        Optimization::decay_momentum(0.1, 0.5, 0.9),
        Optimization::rprop(),
    ]
}

fn tensor(data: &[f32], queue: &Queue) -> AccelTensor {
    AccelTensor::from_host(data, data.len(), 1, 1, queue).unwrap()
}

fn graph(context: &DeviceContext) -> DependencyGraph {
    Topology::mlp(&[2, 3, 1], Activation::Sigmoid)
        .unwrap()
        .build_with_rng(context, &mut StdRng::seed_from_u64(5))
        .unwrap()
}

fn backprop(graph: &mut DependencyGraph, sample: usize, queue: &Queue) {
    let inputs = [[0.0, 1.0], [1.0, 0.0], [1.0, 1.0]];
    let input = AccelTensor::from_host(&inputs[sample % 3], 2, 1, 1, queue).unwrap();
    let target = AccelTensor::from_host(&[1.0], 1, 1, 1, queue).unwrap();
    graph
        .forward_backward(&input, |output| Ok(mse(output, &target, 1, queue)?.1))
        .unwrap();
}

fn params(graph: &DependencyGraph) -> Vec<Vec<f32>> {
    graph.params().iter().map(|p| p.to_vec().unwrap()).collect()
}

#[test]
fn zero_gradients_leave_fresh_parameters_alone() {
    let context = DeviceContext::host(1);
    let queue = context.default_queue();
    for rule in all_rules() {
        let mut param = tensor(&[1.0, -2.0, 0.5], queue);
        let zero = tensor(&[0.0; 3], queue);
        let mut state = ParamState::Empty;
        for _ in 0..3 {
            rule.optimize(&mut param, &zero, &mut state, queue).unwrap();
        }
        verify(&param.to_vec().unwrap(), &[1.0, -2.0, 0.5], MARGIN);
    }
}

#[test]
fn mismatched_gradients_are_rejected() {
    let context = DeviceContext::host(1);
    let queue = context.default_queue();
    let mut param = tensor(&[1.0, 2.0], queue);
    let gradient = tensor(&[1.0, 2.0, 3.0], queue);
    let mut state = ParamState::Empty;
    assert!(Optimization::sgd(0.1)
        .optimize(&mut param, &gradient, &mut state, queue)
        .is_err());
}

#[test]
fn decay_changes_the_rate_but_not_the_weights() {
    let context = DeviceContext::host(1);
    let queue = context.default_queue();
    let mut rule = Optimization::decay(0.1, 1.0);
    let param = tensor(&[0.25, 0.75], queue);
    let before = param.to_vec().unwrap();

    assert_eq!(rule.learning_rate(), Some(0.1));
    rule.update();
    rule.update();
    assert_eq!(rule.epoch(), 2);
    assert!((rule.learning_rate().unwrap() - 0.1 / 3.0).abs() < MARGIN);
    assert_eq!(param.to_vec().unwrap(), before);

    // Rules without a schedule ignore epochs.
    let mut sgd = Optimization::sgd(0.1);
    sgd.update();
    assert_eq!(sgd, Optimization::sgd(0.1));
    assert_eq!(Optimization::rprop().learning_rate(), None);
}

#[test]
fn sgd_and_momentum_steps() {
    let context = DeviceContext::host(1);
    let queue = context.default_queue();
    let gradient = tensor(&[1.0, -2.0], queue);

    let mut param = tensor(&[0.0, 0.0], queue);
    let mut state = ParamState::Empty;
    let sgd = Optimization::sgd(0.5);
    sgd.optimize(&mut param, &gradient, &mut state, queue).unwrap();
    verify(&param.to_vec().unwrap(), &[-0.5, 1.0], MARGIN);

    let mut param = tensor(&[0.0, 0.0], queue);
    let mut state = ParamState::Empty;
    let momentum = Optimization::momentum(0.5, 0.5);
    momentum
        .optimize(&mut param, &gradient, &mut state, queue)
        .unwrap();
    verify(&param.to_vec().unwrap(), &[-0.5, 1.0], MARGIN);
    // v = 0.5 * v + 0.5 * g
    momentum
        .optimize(&mut param, &gradient, &mut state, queue)
        .unwrap();
    verify(&param.to_vec().unwrap(), &[-1.25, 2.5], MARGIN);
    match state {
        ParamState::Velocity(v) => verify(&v.to_vec().unwrap(), &[0.75, -1.5], MARGIN),
        other => panic!("unexpected state {:?}", other),
    }
}

#[test]
fn rprop_adapts_the_step_to_gradient_signs() {
    let context = DeviceContext::host(1);
    let queue = context.default_queue();
    let rule = Optimization::rprop();
    let mut param = tensor(&[0.0], queue);
    let mut state = ParamState::Empty;
    let mut step = |g: f32, expected: f32| {
        rule.optimize(&mut param, &tensor(&[g], queue), &mut state, queue)
            .unwrap();
        verify(&param.to_vec().unwrap(), &[expected], MARGIN);
    };
    // First step uses the initial delta, agreeing signs grow it.
    step(1.0, -0.1);
    step(1.0, -0.22);
    // A sign change reverts the last step and shrinks the delta.
    step(-1.0, -0.1);
    step(-1.0, -0.04);
}

#[test]
fn chunks_never_cross_an_update() {
    let sgd = Optimization::sgd(0.1);
    assert_eq!(Optimizer::stochastic(sgd).chunk_size(5), 1);
    assert_eq!(Optimizer::mini_batch(sgd, 3).chunk_size(5), 3);
    assert_eq!(Optimizer::mini_batch(sgd, 3).chunk_size(2), 2);
    assert_eq!(Optimizer::mini_batch(sgd, 0).chunk_size(2), 1);
    assert_eq!(Optimizer::full_batch(sgd).chunk_size(50), 50);
}

#[test]
fn mini_batches_apply_every_n_samples() {
    let context = DeviceContext::host(1);
    let queue = context.default_queue().clone();
    let mut graph = graph(&context);
    let mut optimizer = Optimizer::mini_batch(Optimization::sgd(0.5), 3);

    let initial = params(&graph);
    for sample in 0..5 {
        backprop(&mut graph, sample, &queue);
        let applied = optimizer.step(&mut graph, 1).unwrap();
        assert_eq!(applied, sample == 2);
    }
    assert_eq!(optimizer.updates(), 1);
    assert_eq!(optimizer.pending(), 2);
    assert_eq!(optimizer.chunk_size(10), 1);
    assert!(params(&graph) != initial);

    optimizer.end_epoch(&mut graph).unwrap();
    assert_eq!(optimizer.updates(), 2);
    assert_eq!(optimizer.pending(), 0);
    assert_eq!(optimizer.states().len(), graph.params().len());
}

#[test]
fn full_batch_waits_for_the_epoch() {
    let context = DeviceContext::host(1);
    let queue = context.default_queue().clone();
    let mut graph = graph(&context);
    let mut optimizer = Optimizer::full_batch(Optimization::decay(0.5, 1.0));

    let initial = params(&graph);
    for sample in 0..4 {
        backprop(&mut graph, sample, &queue);
        assert!(!optimizer.step(&mut graph, 1).unwrap());
    }
    assert_eq!(params(&graph), initial);
    optimizer.end_epoch(&mut graph).unwrap();
    assert!(params(&graph) != initial);
    assert_eq!(optimizer.updates(), 1);
    assert_eq!(optimizer.optimization().epoch(), 1);

    // Nothing pending: the epoch only advances the schedule.
    let after = params(&graph);
    optimizer.end_epoch(&mut graph).unwrap();
    assert_eq!(params(&graph), after);
    assert_eq!(optimizer.updates(), 1);
}

#[test]
fn accumulated_gradients_are_averaged() {
    let context = DeviceContext::host(1);
    let queue = context.default_queue().clone();

    // The same sample twice in one mini-batch moves the parameters as far as once stochastically.
    let mut twice = graph(&context);
    let mut optimizer = Optimizer::mini_batch(Optimization::sgd(0.5), 2);
    for _ in 0..2 {
        backprop(&mut twice, 0, &queue);
        optimizer.step(&mut twice, 1).unwrap();
    }
    assert_eq!(optimizer.updates(), 1);

    let mut once = graph(&context);
    let mut optimizer = Optimizer::stochastic(Optimization::sgd(0.5));
    backprop(&mut once, 0, &queue);
    optimizer.step(&mut once, 1).unwrap();

    for (a, b) in params(&twice).iter().zip(params(&once).iter()) {
        verify(a, b, MARGIN);
    }
}

#[test]
fn stepping_before_backward_fails() {
    let context = DeviceContext::host(1);
    let mut graph = graph(&context);
    let mut optimizer = Optimizer::stochastic(Optimization::sgd(0.1));
    assert!(optimizer.step(&mut graph, 1).is_err());
    assert_eq!(optimizer.pending(), 0);
}

#[test]
fn accumulated_gradients_wait_for_commit() {
    let context = DeviceContext::host(1);
    let queue = context.default_queue().clone();
    let mut graph = graph(&context);
    let mut optimizer = Optimizer::mini_batch(Optimization::sgd(0.1), 2);

    backprop(&mut graph, 0, &queue);
    let gradients = graph.gradients().into_iter().map(AccelTensor::view).collect::<Vec<_>>();
    assert!(optimizer.accumulate(&mut graph, &gradients[1..], 1).is_err());
    assert_eq!(optimizer.pending(), 0);

    let before = graph.params().iter().map(|p| p.to_vec().unwrap()).collect::<Vec<_>>();
    optimizer.accumulate(&mut graph, &gradients, 1).unwrap();
    assert!(!optimizer.commit(&mut graph).unwrap());
    let unchanged = graph.params().iter().map(|p| p.to_vec().unwrap()).collect::<Vec<_>>();
    assert_eq!(before, unchanged);

    optimizer.accumulate(&mut graph, &gradients, 1).unwrap();
    assert!(optimizer.commit(&mut graph).unwrap());
    assert_eq!(optimizer.updates(), 1);
    assert_eq!(optimizer.pending(), 0);
    // Two copies of one gradient average back to that gradient.
    for ((param, old), gradient) in graph.params().iter().zip(&before).zip(&gradients) {
        let expected = old
            .iter()
            .zip(gradient.to_vec().unwrap())
            .map(|(w, g)| w - 0.1 * g)
            .collect::<Vec<_>>();
        verify(&param.to_vec().unwrap(), &expected, MARGIN);
    }
}
