mod training;

use super::*;
use crate::dataset::MemoryInputSet;
use rand::rngs::StdRng;
use rand::SeedableRng;

pub const XOR_INPUTS: [f32; 8] = [0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0];
pub const XOR_TARGETS: [f32; 4] = [0.0, 1.0, 1.0, 0.0];

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn seeded(topology: &Topology, context: &DeviceContext, seed: u64) -> Model {
    Model::with_rng(topology, context, &mut StdRng::seed_from_u64(seed)).unwrap()
}

/// Points left of `x = 0.5` belong to class 0, the rest to class 1.
pub fn halves(count: usize, queue: &Queue) -> MemoryInputSet {
    let mut set = MemoryInputSet::new(ImageGeometry::vector(2), queue);
    for i in 0..count {
        let x = (i * 37 % 100) as f32 / 100.0;
        let y = (i * 61 % 100) as f32 / 100.0;
        let label = if x < 0.5 { 0 } else { 1 };
        set.push(vec![x, y], Some(label)).unwrap();
    }
    set
}
