#[macro_use]
extern crate log;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rusty_nnet::*;

const SIZES: [usize; 4] = [2, 3, 3, 1];
const MAX_ITERATIONS: usize = 600;
const TARGET_ERROR: f32 = 0.05;
const SEED: u64 = 7;

const XOR_INPUTS: [f32; 8] = [0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0];
const XOR_TARGETS: [f32; 4] = [0.0, 1.0, 1.0, 0.0];

fn main() {
    env_logger::init();

    match run() {
        Ok(_) => info!("Exited great."),
        Err(err) => {
            error!("Exited with error: {}.", err);
            std::process::exit(1);
        }
    }
}

fn run() -> Result<()> {
    let context = DeviceContext::from_config(&DeviceConfig::from_env()?)?;
    info!("Training XOR on {}.", context.platform());

    for optimizer in vec![
        Optimizer::stochastic(Optimization::sgd(0.2)),
        Optimizer::stochastic(Optimization::momentum(0.1, 0.9)),
    ] {
        let name = optimizer.optimization().to_string();
        let iterations = train_xor(&context, optimizer)?;
        println!("{}: done after {} iteration(s)", name, iterations);
    }
    Ok(())
}

/// Trains a fresh network until the mean absolute error drops below `TARGET_ERROR`. Returns the
/// number of iterations it took.
fn train_xor(context: &DeviceContext, optimizer: Optimizer) -> Result<usize> {
    let topology = Topology::mlp(&SIZES, Activation::Sigmoid)?;
    let mut model = Model::with_rng(&topology, context, &mut StdRng::seed_from_u64(SEED))?;
    model.bind_optimizer(optimizer);

    let queue = context.default_queue();
    let input = AccelTensor::from_host(&XOR_INPUTS, 2, 1, 4, queue)?;
    let target = AccelTensor::from_host(&XOR_TARGETS, 1, 1, 4, queue)?;

    for iteration in 1..=MAX_ITERATIONS {
        model.train(&input, &target)?;
        model.end_epoch()?;

        let output = model.predict(&input)?.to_vec()?;
        let error = output
            .iter()
            .zip(XOR_TARGETS.iter())
            .map(|(o, t)| (o - t).abs())
            .sum::<f32>()
            / XOR_TARGETS.len() as f32;
        println!("{:>4}: mean absolute error {:.4}", iteration, error);
        if error < TARGET_ERROR {
            return Ok(iteration);
        }
    }
    Ok(MAX_ITERATIONS)
}
