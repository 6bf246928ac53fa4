//! Seeded pseudo-random source for `rand`, `randnn`, `randvec`, `randmat`.
//!
//! Exercises must be reproducible from a seed, so the generator is an
//! injectable service owned by the engine rather than process-global state.

use rand::Rng;

/// Deterministic uniform source.
pub trait Random {
    fn seed(&self) -> f64;
    fn set_seed(&mut self, seed: f64);

    /// Next value in `[0, 1)`.
    fn next_uniform(&mut self) -> f64;

    /// Next value in `[min, max)`.
    fn next_float(&mut self, min: f64, max: f64) -> f64 {
        self.next_uniform() * (max - min) + min
    }

    /// Next integer in `[min, max_exclusive)`.
    fn next_int(&mut self, min: f64, max_exclusive: f64) -> f64 {
        self.next_float(min, max_exclusive).floor()
    }
}

/// `x = sin(seed++) * 10000; x - floor(x)`.
///
/// Poor statistically, but every exercise ever generated was drawn from it,
/// so a stored seed must keep producing the same numbers.
#[derive(Debug, Clone)]
pub struct SineRandom {
    seed: f64,
}

impl SineRandom {
    pub fn new(seed: f64) -> Self {
        Self { seed }
    }

    /// Seed drawn from the thread RNG.
    pub fn from_entropy() -> Self {
        Self::new(rand::thread_rng().gen_range(0..1u64 << 40) as f64)
    }
}

impl Random for SineRandom {
    fn seed(&self) -> f64 {
        self.seed
    }

    fn set_seed(&mut self, seed: f64) {
        self.seed = seed;
    }

    fn next_uniform(&mut self) -> f64 {
        let x = self.seed.sin() * 10000.0;
        self.seed += 1.0;
        x - x.floor()
    }
}

impl<R: Random + ?Sized> Random for Box<R> {
    fn seed(&self) -> f64 {
        (**self).seed()
    }

    fn set_seed(&mut self, seed: f64) {
        (**self).set_seed(seed)
    }

    fn next_uniform(&mut self) -> f64 {
        (**self).next_uniform()
    }
}
