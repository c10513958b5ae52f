use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

/// Random source behind the `random` opcode.
///
/// Plays uniformly by default; `random` with a negative operand switches to
/// the predictable seeded sequence the Z-machine defines for testing, and a
/// zero operand switches back to an unpredictable state.
pub struct ZRand {
    rng: Box<dyn RngCore>,
    predictable: bool,
}

impl ZRand {
    pub fn new_uniform() -> ZRand {
        ZRand {
            rng: Box::new(rand::thread_rng()),
            predictable: false,
        }
    }

    pub fn new_predictable(seed: u64) -> ZRand {
        ZRand {
            rng: Box::new(StdRng::seed_from_u64(seed)),
            predictable: true,
        }
    }

    /// Reseed to the fixed sequence for `random(-n)`
    pub fn reseed(&mut self, seed: u64) {
        self.rng = Box::new(StdRng::seed_from_u64(seed));
        self.predictable = true;
    }

    /// Return to unpredictable output for `random(0)`
    pub fn reseed_random(&mut self) {
        self.rng = Box::new(rand::thread_rng());
        self.predictable = false;
    }

    pub fn is_predictable(&self) -> bool {
        self.predictable
    }

    /// Uniform value in 1..=bound. A zero bound is treated as 1 so a
    /// malformed `random` call cannot panic the range sampler.
    pub fn next(&mut self, bound: u16) -> u16 {
        let bound = bound.max(1);
        self.rng.gen_range(1..=bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_stays_in_range() {
        let mut rng = ZRand::new_uniform();
        for _ in 0..1000 {
            let v = rng.next(7);
            assert!((1..=7).contains(&v));
        }
    }

    #[test]
    fn test_predictable_sequences_repeat() {
        let mut a = ZRand::new_predictable(99);
        let mut b = ZRand::new_predictable(99);
        let seq_a: Vec<u16> = (0..32).map(|_| a.next(100)).collect();
        let seq_b: Vec<u16> = (0..32).map(|_| b.next(100)).collect();
        assert_eq!(seq_a, seq_b);
    }

    #[test]
    fn test_reseed_restarts_the_sequence() {
        let mut rng = ZRand::new_predictable(7);
        let first: Vec<u16> = (0..8).map(|_| rng.next(50)).collect();
        rng.reseed(7);
        let second: Vec<u16> = (0..8).map(|_| rng.next(50)).collect();
        assert_eq!(first, second);
        assert!(rng.is_predictable());
    }
}
