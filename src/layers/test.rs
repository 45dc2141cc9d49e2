use super::*;
use crate::cl_util::DeviceContext;
use crate::error::Error;
use crate::util::verify;
use rand::rngs::StdRng;
use rand::SeedableRng;

const MARGIN: f32 = 1e-5;
const EPSILON: f32 = 1e-2;
const GRADIENT_MARGIN: f32 = 2e-3;

fn layer(spec: LayerSpec, input: ImageGeometry, context: &DeviceContext) -> Layer {
    Layer::new(
        &spec,
        input,
        context.default_queue(),
        &mut StdRng::seed_from_u64(3),
    )
    .unwrap()
}

/// `sum(output * weights)`, a scalar function of the layer output.
fn objective(layer: &Layer, input: &AccelTensor, weights: &[f32], queue: &Queue) -> f32 {
    let output = layer.forward(&[input], queue).unwrap().to_vec().unwrap();
    output.iter().zip(weights).map(|(o, w)| o * w).sum()
}

fn ramp(len: usize, scale: f32) -> Vec<f32> {
    (0..len)
        .map(|i| ((i * 7 % 11) as f32 - 5.0) * scale)
        .collect()
}

/// Compares the analytic gradients of `objective` with central differences for every
/// parameter and every input element.
fn check_gradients(mut layer: Layer, input: Vec<f32>, shape: (usize, usize, usize)) {
    let context = DeviceContext::host(1);
    let queue = context.default_queue();
    let (rows, cols, depth) = shape;
    let x = AccelTensor::from_host(&input, rows, cols, depth, queue).unwrap();

    let (output, storage) = layer.forward_train(&[&x], queue).unwrap();
    let weights = ramp(output.len(), 0.1);
    let upstream = AccelTensor::from_host(
        &weights,
        output.rows(),
        output.cols(),
        output.depth(),
        queue,
    )
    .unwrap();
    let (input_grad, param_grads) = layer.backward(&upstream, storage, queue).unwrap();
    assert_eq!(input_grad.shape(), x.shape());

    let param_grads = param_grads
        .iter()
        .map(|g| g.to_vec().unwrap())
        .collect::<Vec<_>>();
    let params = layer
        .params()
        .iter()
        .map(|p| p.to_vec().unwrap())
        .collect::<Vec<_>>();
    for (slot, values) in params.iter().enumerate() {
        for i in 0..values.len() {
            let mut nudged = values.clone();
            nudged[i] = values[i] + EPSILON;
            layer.load_param(slot, &nudged, queue).unwrap();
            let plus = objective(&layer, &x, &weights, queue);
            nudged[i] = values[i] - EPSILON;
            layer.load_param(slot, &nudged, queue).unwrap();
            let minus = objective(&layer, &x, &weights, queue);
            layer.load_param(slot, values, queue).unwrap();

            let numeric = (plus - minus) / (2.0 * EPSILON);
            assert!(
                (numeric - param_grads[slot][i]).abs() < GRADIENT_MARGIN,
                "param {}[{}]: numeric {} vs. analytic {}",
                slot,
                i,
                numeric,
                param_grads[slot][i]
            );
        }
    }

    let input_grad = input_grad.to_vec().unwrap();
    for i in 0..input.len() {
        let mut nudged = input.clone();
        nudged[i] += EPSILON;
        let plus = objective(
            &layer,
            &AccelTensor::from_host(&nudged, rows, cols, depth, queue).unwrap(),
            &weights,
            queue,
        );
        nudged[i] -= 2.0 * EPSILON;
        let minus = objective(
            &layer,
            &AccelTensor::from_host(&nudged, rows, cols, depth, queue).unwrap(),
            &weights,
            queue,
        );
        let numeric = (plus - minus) / (2.0 * EPSILON);
        assert!(
            (numeric - input_grad[i]).abs() < GRADIENT_MARGIN,
            "input[{}]: numeric {} vs. analytic {}",
            i,
            numeric,
            input_grad[i]
        );
    }
}

#[test]
fn identity_kernel_convolution_crops_the_center() {
    let context = DeviceContext::host(1);
    let queue = context.default_queue();
    let spec = LayerSpec::Convolution {
        features: 1,
        window: Window::new(3, 3, 1, 0),
        activation: Activation::Identity,
    };
    let mut conv = layer(spec, ImageGeometry::new(5, 5, 1), &context);
    let mut kernel = vec![0f32; 9];
    kernel[4] = 1.0;
    conv.load_param(0, &kernel, queue).unwrap();

    let image = (0..25).map(|i| i as f32).collect::<Vec<_>>();
    let input = AccelTensor::from_host(&image, 5, 5, 1, queue).unwrap();
    let output = conv.forward(&[&input], queue).unwrap();
    assert_eq!(output.shape(), (3, 3, 1));

    let crop = (1..4)
        .flat_map(|y| (1..4).map(move |x| (y * 5 + x) as f32))
        .collect::<Vec<_>>();
    verify(&output.to_vec().unwrap(), &crop, MARGIN);
}

#[test]
fn average_pooling_backward_spreads_the_gradient() {
    let context = DeviceContext::host(1);
    let queue = context.default_queue();
    let spec = LayerSpec::Pooling {
        kind: PoolingKind::Avg,
        window: Window::square(2, 2),
    };
    let pool = layer(spec, ImageGeometry::new(4, 4, 1), &context);
    let input = AccelTensor::from_host(&ramp(16, 1.0), 4, 4, 1, queue).unwrap();
    let (output, storage) = pool.forward_train(&[&input], queue).unwrap();
    assert_eq!(output.shape(), (2, 2, 1));

    let upstream = [1.0, -2.0, 0.5, 4.0];
    let g = AccelTensor::from_host(&upstream, 2, 2, 1, queue).unwrap();
    let (dx, params) = pool.backward(&g, storage, queue).unwrap();
    assert!(params.is_empty());
    let dx = dx.to_array3().unwrap();
    for (w, &u) in upstream.iter().enumerate() {
        let (oy, ox) = (w / 2, w % 2);
        let window = dx.slice(ndarray::s![0, oy * 2..oy * 2 + 2, ox * 2..ox * 2 + 2]);
        assert!((window.sum() - u).abs() < MARGIN);
        assert!(window.iter().all(|&v| (v - u / 4.0).abs() < MARGIN));
    }
}

#[test]
fn max_pooling_backward_routes_the_gradient_to_the_maximum() {
    let context = DeviceContext::host(1);
    let queue = context.default_queue();
    let spec = LayerSpec::Pooling {
        kind: PoolingKind::Max,
        window: Window::square(2, 2),
    };
    let pool = layer(spec, ImageGeometry::new(4, 4, 2), &context);
    // Two samples with two channels each
    let values = ramp(64, 1.0)
        .iter()
        .enumerate()
        .map(|(i, v)| v + i as f32 * 0.01)
        .collect::<Vec<_>>();
    let input = AccelTensor::from_host(&values, 4, 4, 4, queue).unwrap();
    let (output, storage) = pool.forward_train(&[&input], queue).unwrap();
    assert_eq!(output.shape(), (2, 2, 4));

    let upstream = ramp(16, 0.5)
        .iter()
        .map(|v| v + 10.0)
        .collect::<Vec<_>>();
    let g = AccelTensor::from_host(&upstream, 2, 2, 4, queue).unwrap();
    let (dx, _) = pool.backward(&g, storage, queue).unwrap();
    let (dx, x, y) = (
        dx.to_array3().unwrap(),
        input.to_array3().unwrap(),
        output.to_array3().unwrap(),
    );
    for (z, oy, ox) in itertools::iproduct!(0..4, 0..2, 0..2) {
        let s = ndarray::s![z, oy * 2..oy * 2 + 2, ox * 2..ox * 2 + 2];
        let receivers = dx.slice(s).iter().filter(|&&v| v != 0.0).count();
        assert_eq!(receivers, 1);
        let u = upstream[(z * 2 + oy) * 2 + ox];
        assert!((dx.slice(s).sum() - u).abs() < MARGIN);
        // The receiving cell holds the maximum of the window.
        let max = x.slice(s).iter().cloned().fold(std::f32::MIN, f32::max);
        assert!((max - y[[z, oy, ox]]).abs() < MARGIN);
        let (cell, _) = dx
            .slice(s)
            .indexed_iter()
            .find(|&(_, &v)| v != 0.0)
            .unwrap();
        assert!((x.slice(s)[cell] - max).abs() < MARGIN);
    }
}

#[test]
fn pooling_drops_what_no_window_reaches() {
    let spec = LayerSpec::Pooling {
        kind: PoolingKind::Max,
        window: Window::square(2, 2),
    };
    assert_eq!(
        spec.output_geometry(&ImageGeometry::new(6, 4, 3)).unwrap(),
        ImageGeometry::new(3, 2, 3)
    );
    assert_eq!(
        spec.output_geometry(&ImageGeometry::new(5, 5, 1)).unwrap(),
        ImageGeometry::new(2, 2, 1)
    );
    let is_topology_error = |input: ImageGeometry, spec: LayerSpec| {
        match spec.output_geometry(&input) {
            Err(Error::Topology(_)) => true,
            _ => false,
        }
    };
    // Larger than the input, padded, or a plane too large for the recorded arg-max
    assert!(is_topology_error(ImageGeometry::new(1, 5, 1), spec));
    let padded = LayerSpec::Pooling {
        kind: PoolingKind::Avg,
        window: Window::new(2, 2, 2, 1),
    };
    assert!(is_topology_error(ImageGeometry::new(4, 4, 1), padded));
    assert!(is_topology_error(
        ImageGeometry::new(MAX_POOLING_PLANE, 2, 1),
        spec
    ));

    let context = DeviceContext::host(1);
    let queue = context.default_queue();
    let pool = layer(
        LayerSpec::Pooling {
            kind: PoolingKind::Avg,
            window: Window::square(2, 2),
        },
        ImageGeometry::new(5, 5, 1),
        &context,
    );
    let x = AccelTensor::from_host(&ramp(25, 1.0), 5, 5, 1, queue).unwrap();
    let (output, storage) = pool.forward_train(&[&x], queue).unwrap();
    assert_eq!(output.shape(), (2, 2, 1));
    let g = AccelTensor::from_host(&[4.0; 4], 2, 2, 1, queue).unwrap();
    let (dx, params) = pool.backward(&g, storage, queue).unwrap();
    assert!(params.is_empty());
    let dx = dx.to_array3().unwrap();
    for y in 0..5 {
        for x in 0..5 {
            let expected = if y < 4 && x < 4 { 1.0 } else { 0.0 };
            assert_eq!(dx[[0, y, x]], expected, "at ({}, {})", y, x);
        }
    }
}

#[test]
fn dense_batch_matches_single_samples() {
    let context = DeviceContext::host(1);
    let queue = context.default_queue();
    let spec = LayerSpec::Dense {
        outputs: 3,
        activation: Activation::Tanh,
    };
    let dense = layer(spec, ImageGeometry::vector(4), &context);
    let samples = ramp(8, 0.3);
    let batch = AccelTensor::from_host(&samples, 4, 1, 2, queue).unwrap();
    let together = dense.forward(&[&batch], queue).unwrap();
    assert_eq!(together.shape(), (3, 1, 2));

    let mut apart = Vec::new();
    for sample in samples.chunks(4) {
        let x = AccelTensor::from_host(sample, 4, 1, 1, queue).unwrap();
        apart.extend(dense.forward(&[&x], queue).unwrap().to_vec().unwrap());
    }
    verify(&together.to_vec().unwrap(), &apart, MARGIN);
}

#[test]
fn merged_inputs_are_summed() {
    let context = DeviceContext::host(1);
    let queue = context.default_queue();
    let a = AccelTensor::from_host(&[1.0, 2.0], 2, 1, 1, queue).unwrap();
    let b = AccelTensor::from_host(&[10.0, 20.0], 2, 1, 1, queue).unwrap();
    let merged = merge_inputs(&[&a, &b], queue).unwrap();
    assert_eq!(merged.to_vec().unwrap(), vec![11.0, 22.0]);
    assert!(merge_inputs(&[], queue).is_err());
}

#[test]
fn dense_gradients_match_central_differences() {
    let context = DeviceContext::host(1);
    let spec = LayerSpec::Dense {
        outputs: 3,
        activation: Activation::Sigmoid,
    };
    let dense = layer(spec, ImageGeometry::vector(4), &context);
    check_gradients(dense, ramp(8, 0.2), (4, 1, 2));
}

#[test]
fn convolution_gradients_match_central_differences() {
    let context = DeviceContext::host(1);
    let spec = LayerSpec::Convolution {
        features: 2,
        window: Window::new(3, 3, 2, 1),
        activation: Activation::Tanh,
    };
    let conv = layer(spec, ImageGeometry::new(4, 5, 2), &context);
    check_gradients(conv, ramp(40, 0.1), (4, 5, 2));
}

#[test]
fn activations_parse_and_print() {
    for name in &["identity", "sigmoid", "relu", "leaky_relu", "tanh", "square"] {
        let activation = name.parse::<Activation>().unwrap();
        assert_eq!(activation.to_string(), *name);
        assert_eq!(Activation::from_code(activation.code()), Some(activation));
    }
    assert!("softmax".parse::<Activation>().is_err());
    assert_eq!(Activation::Relu.derivative(0.0), 0.0);
    assert!((Activation::LeakyRelu.apply(-1.0) + LEAKY_SLOPE).abs() < MARGIN);
}
