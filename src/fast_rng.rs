// Fast random number generator using the PCG-LCG construction.
//
// Every propagation call takes its random stream explicitly; there is no
// global generator. Independent particles get independent streams through
// `FastRng::for_particle`, which skips the LCG ahead by a fixed stride per
// particle index so that streams never overlap in practice.

use rand::{RngCore, SeedableRng};

/// LCG multiplier
const PRN_MULT: u64 = 6364136223846793005;
/// LCG additive constant
const PRN_ADD: u64 = 1442695040888963407;
/// Number of draws reserved for one particle history
const PRN_STRIDE: u64 = 152917;

/// Fast RNG using a PCG-LCG algorithm.
///
/// An LCG base generator with an RXS-M-XS output permutation. The state is
/// a single `u64`, so copying a stream to replay it is trivial.
///
/// Reference: Melissa E. O'Neill, "PCG: A Family of Simple Fast Space-Efficient
/// Statistically Good Algorithms for Random Number Generation"
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FastRng {
    seed: u64,
}

impl FastRng {
    /// Create a new FastRng with the given seed
    #[inline]
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Stream for particle `index` of a run seeded with `seed`.
    ///
    /// The LCG is jumped ahead by `index * PRN_STRIDE` steps in O(log n)
    /// using the standard affine-map exponentiation.
    pub fn for_particle(seed: u64, index: u64) -> Self {
        let mut rng = Self::new(seed);
        rng.advance(index.wrapping_mul(PRN_STRIDE));
        rng
    }

    /// Jump the LCG ahead by `n` steps.
    pub fn advance(&mut self, mut n: u64) {
        let mut cur_mult = PRN_MULT;
        let mut cur_add = PRN_ADD;
        let mut acc_mult: u64 = 1;
        let mut acc_add: u64 = 0;
        while n > 0 {
            if n & 1 == 1 {
                acc_mult = acc_mult.wrapping_mul(cur_mult);
                acc_add = acc_add.wrapping_mul(cur_mult).wrapping_add(cur_add);
            }
            cur_add = cur_mult.wrapping_add(1).wrapping_mul(cur_add);
            cur_mult = cur_mult.wrapping_mul(cur_mult);
            n >>= 1;
        }
        self.seed = acc_mult.wrapping_mul(self.seed).wrapping_add(acc_add);
    }

    #[inline(always)]
    fn step(&mut self) -> u64 {
        self.seed = PRN_MULT.wrapping_mul(self.seed).wrapping_add(PRN_ADD);
        let word = ((self.seed >> ((self.seed >> 59) + 5)) ^ self.seed)
            .wrapping_mul(12605985483714917081);
        (word >> 43) ^ word
    }

    /// Generate a random f64 in [0, 1)
    #[inline(always)]
    pub fn random(&mut self) -> f64 {
        // equivalent to ldexp(result, -64)
        (self.step() as f64) * 5.421010862427522e-20
    }

    /// Generate a random f64 in (0, 1), safe to take the logarithm of
    #[inline]
    pub fn random_open(&mut self) -> f64 {
        loop {
            let u = self.random();
            if u > 0.0 {
                return u;
            }
        }
    }
}

impl SeedableRng for FastRng {
    type Seed = [u8; 8];

    fn from_seed(seed: Self::Seed) -> Self {
        Self {
            seed: u64::from_le_bytes(seed),
        }
    }
}

impl RngCore for FastRng {
    #[inline(always)]
    fn next_u32(&mut self) -> u32 {
        self.next_u64() as u32
    }

    #[inline(always)]
    fn next_u64(&mut self) -> u64 {
        self.step()
    }

    #[inline]
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        let mut left = dest;
        while left.len() >= 8 {
            let bytes = self.next_u64().to_le_bytes();
            left[..8].copy_from_slice(&bytes);
            left = &mut left[8..];
        }
        if !left.is_empty() {
            let bytes = self.next_u64().to_le_bytes();
            left.copy_from_slice(&bytes[..left.len()]);
        }
    }

    #[inline]
    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}
