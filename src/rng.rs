//! Injectable Random Sources
//!
//! Every stochastic decision the engine makes (arpeggiator timing jitter, voice
//! choice, octave shifts, envelope peaks, pan nudges) draws from a
//! [`RandomSource`]. Production code uses an entropy-seeded generator; tests hand
//! the engine a seeded [`Rng`] or a [`Scripted`] source to replay exact
//! trajectories.

use rand::rngs::StdRng;
use rand::{Rng as _, SeedableRng as _};
use std::collections::VecDeque;

/// Source of uniformly distributed values in `[0.0, 1.0)`.
///
/// Only [`next_f64`](RandomSource::next_f64) is required; the derived helpers are
/// what the control code actually calls.
pub trait RandomSource: Send {
    /// Generate the next random f64 in [0.0, 1.0).
    fn next_f64(&mut self) -> f64;

    /// Uniform value in `[lo, hi)`.
    fn range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }

    /// Uniform value in [-1.0, 1.0).
    fn bipolar(&mut self) -> f64 {
        self.next_f64() * 2.0 - 1.0
    }

    /// True with the given probability.
    fn chance(&mut self, probability: f64) -> bool {
        self.next_f64() < probability
    }

    /// Uniform index in `0..len`. `len` must be non-zero.
    fn index(&mut self, len: usize) -> usize {
        ((self.next_f64() * len as f64) as usize).min(len - 1)
    }
}

/// A seedable random number generator using Xorshift128+.
///
/// Fast, period 2^128 - 1, and deterministic for a given seed, which is what the
/// arpeggiator tests rely on.
#[derive(Debug, Clone, Copy)]
pub struct Rng {
    s0: u64,
    s1: u64,
}

impl Rng {
    /// Create a new RNG with the given seed values.
    ///
    /// The seeds should not both be zero.
    #[inline]
    pub const fn new(s0: u64, s1: u64) -> Self {
        let s0 = if s0 == 0 && s1 == 0 { 1 } else { s0 };
        Self { s0, s1 }
    }

    /// Create a new RNG from a single 64-bit seed.
    #[inline]
    pub fn from_seed(seed: u64) -> Self {
        let s0 = splitmix64(seed);
        let s1 = splitmix64(seed.wrapping_add(0x9e3779b97f4a7c15));
        Self::new(s0, s1)
    }

    /// Generate the next u64 value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.s0;
        let mut s1 = self.s1;
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.s0 = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.s1 = s1.rotate_left(37);

        result
    }
}

impl RandomSource for Rng {
    #[inline]
    fn next_f64(&mut self) -> f64 {
        // Upper 53 bits for the mantissa
        (self.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }
}

impl RandomSource for StdRng {
    fn next_f64(&mut self) -> f64 {
        self.gen::<f64>()
    }
}

/// Entropy-seeded generator used when the composition root doesn't inject one.
pub fn entropy_source() -> Box<dyn RandomSource> {
    Box::new(StdRng::from_entropy())
}

/// Splitmix64 mixing function for deriving state from seeds.
#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e3779b97f4a7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);
    x ^ (x >> 31)
}

/// Replays a fixed list of draws, then repeats the last one (or 0.5 if empty).
///
/// Lets a test pin an arpeggiator firing down to the exact voice, octave and peak.
#[derive(Debug, Clone, Default)]
pub struct Scripted {
    values: VecDeque<f64>,
    last: Option<f64>,
}

impl Scripted {
    pub fn new(values: impl IntoIterator<Item = f64>) -> Self {
        Self {
            values: values.into_iter().collect(),
            last: None,
        }
    }

    /// Number of scripted draws not yet consumed.
    pub fn remaining(&self) -> usize {
        self.values.len()
    }
}

impl RandomSource for Scripted {
    fn next_f64(&mut self) -> f64 {
        match self.values.pop_front() {
            Some(v) => {
                let v = v.clamp(0.0, 1.0 - f64::EPSILON);
                self.last = Some(v);
                v
            }
            None => self.last.unwrap_or(0.5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_deterministic() {
        let mut rng1 = Rng::from_seed(12345);
        let mut rng2 = Rng::from_seed(12345);

        for _ in 0..100 {
            assert_eq!(rng1.next_u64(), rng2.next_u64());
        }
    }

    #[test]
    fn test_rng_different_seeds() {
        let mut rng1 = Rng::from_seed(12345);
        let mut rng2 = Rng::from_seed(54321);
        assert_ne!(rng1.next_u64(), rng2.next_u64());
    }

    #[test]
    fn test_rng_f64_range() {
        let mut rng = Rng::from_seed(42);

        for _ in 0..1000 {
            let v = rng.next_f64();
            assert!((0.0..1.0).contains(&v), "Value {} out of range", v);
        }
    }

    #[test]
    fn test_range_and_index_bounds() {
        let mut rng = Rng::from_seed(7);
        for _ in 0..1000 {
            let v = rng.range(0.7, 1.3);
            assert!((0.7..1.3).contains(&v));
            assert!(rng.index(4) < 4);
            let b = rng.bipolar();
            assert!((-1.0..1.0).contains(&b));
        }
    }

    #[test]
    fn test_chance_distribution() {
        let mut rng = Rng::from_seed(42);
        let count = 10000;
        let hits = (0..count).filter(|_| rng.chance(0.3)).count();
        let ratio = hits as f64 / count as f64;
        assert!((ratio - 0.3).abs() < 0.03, "Ratio {} too far from 0.3", ratio);
    }

    #[test]
    fn test_scripted_replays_then_holds() {
        let mut src = Scripted::new([0.1, 0.9]);
        assert_eq!(src.next_f64(), 0.1);
        assert_eq!(src.next_f64(), 0.9);
        assert_eq!(src.remaining(), 0);
        assert_eq!(src.next_f64(), 0.9);
    }

    #[test]
    fn test_scripted_index_of_one_stays_in_bounds() {
        let mut src = Scripted::new([1.0]);
        assert_eq!(src.index(4), 3);
    }

    #[test]
    fn test_zero_seed_handling() {
        let mut rng = Rng::new(0, 0);
        let v = rng.next_f64();
        assert!((0.0..1.0).contains(&v));
    }
}
