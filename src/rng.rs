//! Seeded Linear-Congruential Generator
//!
//! Deterministic pseudo-random source used wherever the engine needs a
//! stochastic but reproducible choice (price perturbation, slippage,
//! failure rolls, gradual-fill jitter). Each component that needs
//! nondeterministic choices owns its own seeded instance so that call
//! order in one component never perturbs another's sequence.

/// Linear-congruential generator: `state <- (state*9301 + 49297) mod 233280`.
#[derive(Debug, Clone)]
pub struct Lcg {
    state: u64,
}

const LCG_MULTIPLIER: u64 = 9301;
const LCG_INCREMENT: u64 = 49297;
const LCG_MODULUS: u64 = 233280;

impl Lcg {
    /// Create a generator seeded with the given value.
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed % LCG_MODULUS,
        }
    }

    /// Next pseudo-random value in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        self.state = (self.state.wrapping_mul(LCG_MULTIPLIER).wrapping_add(LCG_INCREMENT))
            % LCG_MODULUS;
        self.state as f64 / LCG_MODULUS as f64
    }

    /// Next pseudo-random value in `[-1, 1)`.
    pub fn next_signed(&mut self) -> f64 {
        2.0 * self.next_f64() - 1.0
    }
}
