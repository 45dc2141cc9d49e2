use super::*;
use crate::layers::PoolingKind;
use crate::optimizer::Optimization;
use crate::util::verify;
use rand::rngs::StdRng;
use rand::SeedableRng;
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Cursor;

const MARGIN: f32 = 1e-5;

fn mlp(context: &DeviceContext, sizes: &[usize], seed: u64) -> Model {
    let topology = Topology::mlp(sizes, Activation::Sigmoid).unwrap();
    Model::with_rng(&topology, context, &mut StdRng::seed_from_u64(seed)).unwrap()
}

fn features() -> Topology {
    "input 1 6 6
     convolution 2 3 3 1 0 relu
     pooling avg 2 2 2"
        .parse()
        .unwrap()
}

#[test]
fn serialized_models_predict_the_same() {
    let context = DeviceContext::host(1);
    let queue = context.default_queue();
    let model = Model::cnn(&context, &features(), &[5, 3], Activation::Tanh).unwrap();

    let mut bytes = Vec::new();
    model.serialize(&mut bytes).unwrap();
    assert_eq!(&bytes[..4], serialize::MAGIC);

    let restored = Model::deserialize(&mut Cursor::new(&bytes), &context).unwrap();
    assert_eq!(restored.topology(), model.topology());
    for ((shape, data), (restored_shape, restored_data)) in
        model.params().unwrap().iter().zip(restored.params().unwrap().iter())
    {
        assert_eq!(shape, restored_shape);
        verify(data, restored_data, MARGIN);
    }

    let input = (0..72).map(|i| (i % 7) as f32 / 7.0).collect::<Vec<_>>();
    let input = AccelTensor::from_host(&input, 6, 6, 2, queue).unwrap();
    verify(
        &restored.predict(&input).unwrap().to_vec().unwrap(),
        &model.predict(&input).unwrap().to_vec().unwrap(),
        MARGIN,
    );
}

#[test]
fn weights_load_into_an_equal_topology_only() {
    let context = DeviceContext::host(1);
    let source = mlp(&context, &[4, 3, 2], 1);
    let mut bytes = Vec::new();
    source.serialize(&mut bytes).unwrap();

    let mut same = mlp(&context, &[4, 3, 2], 2);
    same.read_weights(&mut Cursor::new(&bytes)).unwrap();
    assert_eq!(same.params().unwrap(), source.params().unwrap());

    let mut other = mlp(&context, &[4, 5, 2], 3);
    match other.read_weights(&mut Cursor::new(&bytes)) {
        Err(Error::TopologyMismatch(_)) => {}
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn truncated_or_foreign_files_are_rejected() {
    let context = DeviceContext::host(1);
    let model = mlp(&context, &[2, 2], 1);
    let mut bytes = Vec::new();
    model.serialize(&mut bytes).unwrap();

    let mut foreign = bytes.clone();
    foreign[0] = b'X';
    assert!(match Model::deserialize(&mut Cursor::new(&foreign), &context) {
        Err(Error::Format(_)) => true,
        _ => false,
    });

    let truncated = &bytes[..bytes.len() - 2];
    assert!(match Model::deserialize(&mut Cursor::new(truncated), &context) {
        Err(Error::Io(_)) => true,
        _ => false,
    });
}

/// A valid header and topology of `model`, followed by `tail` as raw little-endian words.
fn with_param_section(model: &Model, tail: &[u32]) -> Vec<u8> {
    let mut bytes = Vec::new();
    serialize::write_header(&mut bytes).unwrap();
    serialize::write_topology(&mut bytes, model.topology()).unwrap();
    for &word in tail {
        bytes.write_u32::<LittleEndian>(word).unwrap();
    }
    bytes
}

#[test]
fn parameter_counts_and_shapes_are_checked_before_reading() {
    let context = DeviceContext::host(1);
    let mut model = mlp(&context, &[2, 2], 1);

    let huge_count = with_param_section(&model, &[u32::MAX]);
    assert!(match Model::deserialize(&mut Cursor::new(&huge_count), &context) {
        Err(Error::TopologyMismatch(_)) => true,
        _ => false,
    });
    assert!(match model.read_weights(&mut Cursor::new(&huge_count)) {
        Err(Error::TopologyMismatch(_)) => true,
        _ => false,
    });

    let huge_shape = with_param_section(&model, &[2, u32::MAX, u32::MAX, u32::MAX]);
    assert!(match Model::deserialize(&mut Cursor::new(&huge_shape), &context) {
        Err(Error::TopologyMismatch(_)) => true,
        _ => false,
    });

    let max = u32::MAX as usize;
    assert!(match serialize::element_count((max, max, max)) {
        Err(Error::Format(_)) => true,
        _ => false,
    });
    assert_eq!(serialize::element_count((2, 3, 4)).unwrap(), 24);
}

#[test]
fn oversized_layers_in_a_file_are_rejected() {
    let context = DeviceContext::host(1);
    let mut topology = Topology::new(ImageGeometry::vector(1));
    topology.push(LayerSpec::Dense {
        outputs: u32::MAX as usize,
        activation: Activation::Sigmoid,
    });
    let mut bytes = Vec::new();
    serialize::write_header(&mut bytes).unwrap();
    serialize::write_topology(&mut bytes, &topology).unwrap();
    assert!(match Model::deserialize(&mut Cursor::new(&bytes), &context) {
        Err(Error::Topology(_)) => true,
        _ => false,
    });

    let mut bytes = Vec::new();
    serialize::write_header(&mut bytes).unwrap();
    // An input of u32::MAX^3 elements feeding one dense layer of 2 outputs
    for &word in &[u32::MAX, u32::MAX, u32::MAX, 1, 0, 2, 0, 1, u32::MAX] {
        bytes.write_u32::<LittleEndian>(word).unwrap();
    }
    assert!(match Model::deserialize(&mut Cursor::new(&bytes), &context) {
        Err(Error::Topology(_)) => true,
        _ => false,
    });
}

#[test]
fn pooling_kind_survives_the_file_format() {
    let text = "input 2 4 4\npooling max 2 2 2\n";
    let topology = text.parse::<Topology>().unwrap();
    let mut bytes = Vec::new();
    serialize::write_topology(&mut bytes, &topology).unwrap();
    let restored = serialize::read_topology(&mut Cursor::new(&bytes)).unwrap();
    assert_eq!(restored, topology);
    match restored.nodes()[0].layer {
        LayerSpec::Pooling { kind, .. } => assert_eq!(kind, PoolingKind::Max),
        other => panic!("unexpected layer {:?}", other),
    }
}

#[test]
fn a_gradient_step_reduces_the_loss() {
    let context = DeviceContext::host(1);
    let queue = context.default_queue();
    let mut model = mlp(&context, &[4, 3, 2], 4);
    model.bind_optimizer(Optimizer::stochastic(Optimization::sgd(0.1)));

    let input = AccelTensor::from_host(&[0.5, -0.25, 1.0, 0.0], 4, 1, 1, queue).unwrap();
    let target = AccelTensor::from_host(&[1.0, 0.0], 2, 1, 1, queue).unwrap();
    let before = model.loss(&input, &target).unwrap();
    let reported = model.train(&input, &target).unwrap();
    assert!((reported - before).abs() < MARGIN);
    let after = model.loss(&input, &target).unwrap();
    assert!(after < before, "loss went from {} to {}", before, after);
    assert_eq!(model.optimizer().unwrap().updates(), 1);
}

#[test]
fn batches_are_split_at_update_boundaries() {
    let context = DeviceContext::host(1);
    let queue = context.default_queue();
    let mut model = mlp(&context, &[2, 3, 1], 5);
    model.bind_optimizer(Optimizer::mini_batch(Optimization::momentum(0.1, 0.5), 2));

    let input =
        AccelTensor::from_host(&[0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0, 0.5, 0.5], 2, 1, 5, queue)
            .unwrap();
    let target = AccelTensor::from_host(&[0.0, 1.0, 1.0, 0.0, 0.5], 1, 1, 5, queue).unwrap();
    model.train(&input, &target).unwrap();
    let optimizer = model.optimizer().unwrap();
    assert_eq!(optimizer.updates(), 2);
    assert_eq!(optimizer.pending(), 1);

    model.end_epoch().unwrap();
    assert_eq!(model.optimizer().unwrap().updates(), 3);
}

#[test]
fn batch_parallel_training_matches_a_single_queue() {
    let single = DeviceContext::host(1);
    let pooled = DeviceContext::host(3);
    let mut sequential = mlp(&single, &[3, 4, 2], 12);
    let mut parallel = mlp(&pooled, &[3, 4, 2], 12);
    assert_eq!(sequential.params().unwrap(), parallel.params().unwrap());
    for model in &mut [&mut sequential, &mut parallel] {
        model.bind_optimizer(Optimizer::mini_batch(Optimization::momentum(0.2, 0.5), 4));
    }

    let input = (0..21).map(|i| ((i * 5) % 11) as f32 / 11.0 - 0.5).collect::<Vec<_>>();
    let target = (0..14).map(|i| (i % 3 == 0) as u8 as f32).collect::<Vec<_>>();
    for epoch in 0..3 {
        let expected = {
            let queue = single.default_queue();
            let x = AccelTensor::from_host(&input, 3, 1, 7, queue).unwrap();
            let t = AccelTensor::from_host(&target, 2, 1, 7, queue).unwrap();
            sequential.train(&x, &t).unwrap()
        };
        let actual = {
            let queue = pooled.default_queue();
            let x = AccelTensor::from_host(&input, 3, 1, 7, queue).unwrap();
            let t = AccelTensor::from_host(&target, 2, 1, 7, queue).unwrap();
            parallel.train_parallel(&x, &t, 3).unwrap()
        };
        assert!(
            (expected - actual).abs() < MARGIN,
            "epoch {}: loss {} against {}",
            epoch,
            actual,
            expected
        );
        sequential.end_epoch().unwrap();
        parallel.end_epoch().unwrap();
    }

    let (expected, actual) = (sequential.optimizer().unwrap(), parallel.optimizer().unwrap());
    assert_eq!(expected.updates(), actual.updates());
    assert_eq!(actual.updates(), 6);
    assert_eq!(actual.pending(), 0);
    for ((shape, data), (parallel_shape, parallel_data)) in sequential
        .params()
        .unwrap()
        .iter()
        .zip(parallel.params().unwrap().iter())
    {
        assert_eq!(shape, parallel_shape);
        verify(data, parallel_data, MARGIN);
    }
}

#[test]
fn training_needs_an_optimizer_and_matching_targets() {
    let context = DeviceContext::host(1);
    let queue = context.default_queue();
    let mut model = mlp(&context, &[2, 1], 6);
    let input = AccelTensor::from_host(&[0.0, 1.0], 2, 1, 1, queue).unwrap();
    let target = AccelTensor::from_host(&[1.0], 1, 1, 1, queue).unwrap();
    assert!(model.train(&input, &target).is_err());

    model.bind_optimizer(Optimizer::stochastic(Optimization::sgd(0.1)));
    let wrong = AccelTensor::from_host(&[1.0, 0.0], 2, 1, 1, queue).unwrap();
    assert!(match model.train(&input, &wrong) {
        Err(Error::ShapeMismatch { .. }) => true,
        _ => false,
    });
    assert!(model.train(&input, &target).is_ok());
}

#[test]
fn empty_batches_are_rejected() {
    let context = DeviceContext::host(1);
    let queue = context.default_queue();
    let mut model = mlp(&context, &[2, 1], 6);
    model.bind_optimizer(Optimizer::stochastic(Optimization::sgd(0.1)));
    let input = AccelTensor::zeros(2, 1, 0, queue).unwrap();
    let target = AccelTensor::zeros(1, 1, 0, queue).unwrap();
    assert!(match model.train(&input, &target) {
        Err(Error::ShapeMismatch { .. }) => true,
        _ => false,
    });
    assert_eq!(model.optimizer().unwrap().updates(), 0);
}

#[test]
fn models_survive_a_trip_through_the_file_system() {
    let context = DeviceContext::host(1);
    let model = mlp(&context, &[3, 2], 8);
    let path = std::env::temp_dir().join(format!("rusty-nnet-model-{}.bin", std::process::id()));
    model.save(&path).unwrap();

    let loaded = Model::load(&path, &context).unwrap();
    assert_eq!(loaded.params().unwrap(), model.params().unwrap());
    let mut fresh = mlp(&context, &[3, 2], 9);
    fresh.load_weights(&path).unwrap();
    assert_eq!(fresh.params().unwrap(), model.params().unwrap());
    std::fs::remove_file(&path).unwrap();
}
