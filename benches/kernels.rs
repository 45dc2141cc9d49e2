#[macro_use]
extern crate criterion;

use criterion::{BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rusty_nnet::*;

const SAMPLE_SIZE: usize = 20;
const SEED: u64 = 42;

// Every benchmark allocates its operands once; the measured closure enqueues the work and waits
// for it.

fn bench_gemm(c: &mut Criterion) {
    let context = DeviceContext::host(1);
    let queue = context.default_queue();
    let mut rng = StdRng::seed_from_u64(SEED);

    let mut group = c.benchmark_group("batched-gemm");
    group.sample_size(SAMPLE_SIZE);
    for &d in &[16usize, 32, 64, 128] {
        let a = AccelTensor::uniform(d, d, 1, 1.0, &mut rng, queue).unwrap();
        let b = AccelTensor::uniform(d, d, 8, 1.0, &mut rng, queue).unwrap();
        group.throughput(Throughput::Elements((2 * d * d * d * 8) as u64));
        group.bench_with_input(BenchmarkId::new("host", d), &d, |bench, _| {
            bench.iter(|| {
                AccelTensor::batched_gemm(1.0, &a, false, &b, false, queue, true).unwrap()
            })
        });
    }
    group.finish();
}

fn bench_layers(c: &mut Criterion) {
    let context = DeviceContext::host(1);
    let queue = context.default_queue();
    let topology = "input 3 32 32
                    convolution 8 3 3 1 1 relu
                    pooling max 2 2 2
                    convolution 16 3 3 1 1 relu
                    pooling avg 2 2 2
                    dense 10 sigmoid"
        .parse::<Topology>()
        .unwrap();
    let mut model =
        Model::with_rng(&topology, &context, &mut StdRng::seed_from_u64(SEED)).unwrap();
    model.bind_optimizer(Optimizer::full_batch(Optimization::sgd(0.01)));

    let batch = 4;
    let mut rng = StdRng::seed_from_u64(SEED);
    let input = AccelTensor::uniform(32, 32, 3 * batch, 1.0, &mut rng, queue).unwrap();
    let target = AccelTensor::zeros(10, 1, batch, queue).unwrap();

    let mut group = c.benchmark_group("cnn");
    group.sample_size(SAMPLE_SIZE);
    group.bench_function("predict", |bench| {
        bench.iter(|| model.predict(&input).unwrap())
    });
    group.bench_function("train", |bench| {
        bench.iter(|| model.train(&input, &target).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_gemm, bench_layers);
criterion_main!(benches);
