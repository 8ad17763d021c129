// Deterministic, portable pseudo-random number generator.
//
// Implements xoshiro256++ (Blackman & Vigna, 2019) with SplitMix64 seeding.
// Hand-rolled (serde derives only, so generator state can be saved) so that a
// given seed yields the same world on every platform and toolchain.
//
// This crate is the single PRNG used by `blockweave_gen`: the collapse engine
// owns exactly one `WorldRng` for the whole session and draws every weighted
// module choice from it. Re-running generation with the same seed, catalog,
// and request sequence reproduces the same module assignments.
//
// **Critical constraint: determinism.** Every method on `WorldRng` must produce
// identical output given the same prior state, regardless of platform, compiler
// version, or optimization level. The core generator is integer-only; the
// float helpers derive from fixed bit slices of `next_u64`.

use serde::{Deserialize, Serialize};

/// Xoshiro256++ PRNG, the generator's sole source of randomness.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorldRng {
    s: [u64; 4],
}

impl WorldRng {
    /// Create a new PRNG seeded from a `u64`.
    ///
    /// Uses SplitMix64 to expand the seed into the 256-bit internal state.
    pub fn new(seed: u64) -> Self {
        let mut sm = seed;
        Self {
            s: [
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
            ],
        }
    }

    /// Generate the next `u64` in the sequence.
    pub fn next_u64(&mut self) -> u64 {
        let result = (self.s[0].wrapping_add(self.s[3]))
            .rotate_left(23)
            .wrapping_add(self.s[0]);

        let t = self.s[1] << 17;

        self.s[2] ^= self.s[0];
        self.s[3] ^= self.s[1];
        self.s[1] ^= self.s[2];
        self.s[0] ^= self.s[3];

        self.s[2] ^= t;
        self.s[3] = self.s[3].rotate_left(45);

        result
    }

    /// Uniform `f64` in [0, 1) from the upper 53 bits.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Pick an index with probability proportional to its weight.
    ///
    /// Walks the weights in order, accumulating until the running total meets
    /// or exceeds a roll in `[0, total)`. If rounding exhausts the walk without
    /// a pick, the first positive weight wins. Returns `None` only when no
    /// weight is positive.
    pub fn pick_weighted(&mut self, weights: &[f64]) -> Option<usize> {
        let total: f64 = weights.iter().filter(|w| **w > 0.0).sum();
        if total <= 0.0 {
            return None;
        }
        let roll = self.next_f64() * total;
        let mut running = 0.0;
        for (i, &w) in weights.iter().enumerate() {
            if w <= 0.0 {
                continue;
            }
            running += w;
            if running >= roll {
                return Some(i);
            }
        }
        weights.iter().position(|w| *w > 0.0)
    }
}

/// SplitMix64, used only for seeding xoshiro256++ from a single `u64`.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let mut a = WorldRng::new(42);
        let mut b = WorldRng::new(42);
        for _ in 0..1000 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn different_seeds_diverge() {
        let mut a = WorldRng::new(42);
        let mut b = WorldRng::new(43);
        assert_ne!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn f64_in_unit_range() {
        let mut rng = WorldRng::new(12345);
        for _ in 0..10_000 {
            let v = rng.next_f64();
            assert!((0.0..1.0).contains(&v), "f64 out of range: {v}");
        }
    }

    #[test]
    fn pick_weighted_respects_zero_weights() {
        let mut rng = WorldRng::new(9);
        for _ in 0..1000 {
            let i = rng.pick_weighted(&[0.0, 1.0, 0.0, 2.0]).unwrap();
            assert!(i == 1 || i == 3);
        }
        assert_eq!(rng.pick_weighted(&[0.0, 0.0]), None);
        assert_eq!(rng.pick_weighted(&[]), None);
    }

    #[test]
    fn pick_weighted_distribution() {
        let mut rng = WorldRng::new(42);
        let mut counts = [0u32; 2];
        let n = 20_000;
        for _ in 0..n {
            counts[rng.pick_weighted(&[1.0, 3.0]).unwrap()] += 1;
        }
        let frac = counts[1] as f64 / n as f64;
        assert!(
            (0.72..0.78).contains(&frac),
            "weight 3 of 4 should win ~75%, got {:.1}%",
            frac * 100.0
        );
    }

    #[test]
    fn serialization_roundtrip_continues_stream() {
        let mut rng = WorldRng::new(42);
        for _ in 0..100 {
            rng.next_u64();
        }
        let json = serde_json::to_string(&rng).unwrap();
        let mut restored: WorldRng = serde_json::from_str(&json).unwrap();
        for _ in 0..100 {
            assert_eq!(rng.next_u64(), restored.next_u64());
        }
    }
}
