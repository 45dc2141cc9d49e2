use super::*;
use crate::network::InputRef;
use crate::util::verify;

const EPOCHS: usize = 200;

fn xor_batch(queue: &Queue) -> (AccelTensor, AccelTensor) {
    (
        AccelTensor::from_host(&XOR_INPUTS, 2, 1, 4, queue).unwrap(),
        AccelTensor::from_host(&XOR_TARGETS, 1, 1, 4, queue).unwrap(),
    )
}

fn train_xor(optimizer: Optimizer) -> (f32, f32) {
    init_logging();
    let context = DeviceContext::host(1);
    let queue = context.default_queue();
    let topology = Topology::mlp(&[2, 3, 3, 1], Activation::Sigmoid).unwrap();
    let mut model = seeded(&topology, &context, 7);
    model.bind_optimizer(optimizer);

    let (input, target) = xor_batch(queue);
    let before = model.loss(&input, &target).unwrap();
    for _ in 0..EPOCHS {
        model.train(&input, &target).unwrap();
        model.end_epoch().unwrap();
    }
    (before, model.loss(&input, &target).unwrap())
}

#[test]
fn xor_with_every_rule_and_policy() {
    for optimizer in vec![
        Optimizer::stochastic(Optimization::sgd(0.5)),
        Optimizer::stochastic(Optimization::momentum(0.2, 0.9)),
        Optimizer::mini_batch(Optimization::decay(0.5, 0.001), 2),
        Optimizer::mini_batch(Optimization::decay_momentum(0.2, 0.001, 0.9), 2),
        Optimizer::full_batch(Optimization::rprop()),
    ] {
        let name = optimizer.optimization().name();
        let (before, after) = train_xor(optimizer);
        assert!(
            after < before,
            "{}: loss went from {} to {}",
            name,
            before,
            after
        );
    }
}

/// `in -> 0 -> {1, 2} -> 3`, where node 3 consumes the sum of both branches.
fn residual() -> Topology {
    let mut topology = Topology::new(ImageGeometry::vector(2));
    let trunk = topology.push(LayerSpec::Dense {
        outputs: 4,
        activation: Activation::Tanh,
    });
    let left = topology.push_with_inputs(
        LayerSpec::Dense {
            outputs: 4,
            activation: Activation::Tanh,
        },
        vec![InputRef::Node(trunk)],
    );
    topology.push_with_inputs(
        LayerSpec::Dense {
            outputs: 1,
            activation: Activation::Sigmoid,
        },
        vec![InputRef::Node(trunk), InputRef::Node(left)],
    );
    topology
}

#[test]
fn results_do_not_depend_on_the_queue_count() {
    init_logging();
    let mut params = Vec::new();
    for &queues in &[1, 3] {
        let context = DeviceContext::host(queues);
        let queue = context.default_queue();
        let mut model = seeded(&residual(), &context, 21);
        model.bind_optimizer(Optimizer::mini_batch(Optimization::momentum(0.1, 0.5), 2));
        let (input, target) = xor_batch(queue);
        for _ in 0..5 {
            model.train(&input, &target).unwrap();
            model.end_epoch().unwrap();
        }
        if queues > 1 {
            assert!(model.graph().cross_queue_waits() > 0);
        }
        params.push(model.params().unwrap());
    }
    for ((shape, a), (other, b)) in params[0].iter().zip(params[1].iter()) {
        assert_eq!(shape, other);
        verify(a, b, 1e-6);
    }
}

#[test]
fn a_small_cnn_learns() {
    init_logging();
    let context = DeviceContext::host(2);
    let queue = context.default_queue();
    let features = "input 1 6 6
                    convolution 3 3 3 1 1 relu
                    pooling max 2 2 2
                    convolution 2 3 3 1 0 tanh"
        .parse::<Topology>()
        .unwrap();
    let topology = {
        let mut topology = features.clone();
        topology.push(LayerSpec::Dense {
            outputs: 2,
            activation: Activation::Sigmoid,
        });
        topology
    };
    let mut model = seeded(&topology, &context, 13);
    assert_eq!(model.output_geometry(), ImageGeometry::vector(2));
    model.bind_optimizer(Optimizer::mini_batch(Optimization::momentum(0.05, 0.9), 4));

    // A bright left half or a bright right half.
    let mut images = Vec::new();
    let mut targets = Vec::new();
    for i in 0..8 {
        let left = i % 2 == 0;
        for _ in 0..6 {
            for x in 0..6 {
                let bright = (x < 3) == left;
                images.push(if bright { 1.0 } else { 0.1 * (i as f32) / 8.0 });
            }
        }
        targets.extend_from_slice(if left { &[1.0, 0.0] } else { &[0.0, 1.0] });
    }
    let input = AccelTensor::from_host(&images, 6, 6, 8, queue).unwrap();
    let target = AccelTensor::from_host(&targets, 2, 1, 8, queue).unwrap();

    let before = model.loss(&input, &target).unwrap();
    for _ in 0..30 {
        model.train(&input, &target).unwrap();
        model.end_epoch().unwrap();
    }
    let after = model.loss(&input, &target).unwrap();
    assert!(after < before, "loss went from {} to {}", before, after);
}
