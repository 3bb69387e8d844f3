use crate::state::Sample;
use rand::Rng;

const CPU_SPIKE_PROBABILITY: f64 = 0.1;
const CPU_SPIKE: f64 = 20.0;

/// Plausible readings used while the live source is unreachable. Values are
/// whole numbers; cpu occasionally jumps by 20 to imitate a load burst.
pub fn synthesize<R: Rng>(rng: &mut R, timestamp: String) -> Sample {
    let mut cpu = rng.random_range(30_u32..60) as f64;
    if rng.random_bool(CPU_SPIKE_PROBABILITY) {
        cpu += CPU_SPIKE;
    }

    Sample {
        timestamp,
        cpu,
        memory: rng.random_range(60_u32..70) as f64,
        disk: rng.random_range(10_u32..15) as f64,
        network: rng.random_range(20_u32..70) as f64,
    }
}
