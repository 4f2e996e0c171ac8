use std::sync::atomic::{AtomicU64, Ordering};

const WEYL_CONSTANT: u64 = 0x9E3779B97F4A7C15;

/// A fast, non-cryptographically secure pseudo-random number generator
/// using a Weyl sequence on an atomic integer.
#[derive(Debug)]
pub(crate) struct FastRng {
  state: AtomicU64,
}

impl FastRng {
  pub(crate) fn new(seed: u64) -> Self {
    Self {
      state: AtomicU64::new(if seed == 0 { 1 } else { seed }),
    }
  }

  #[inline(always)]
  fn next_weyl(&self) -> u64 {
    // Relaxed is enough: only this one value needs atomicity.
    self.state.fetch_add(WEYL_CONSTANT, Ordering::Relaxed)
  }

  /// Returns true with a probability of 1 in `denominator_pow2`.
  /// The denominator MUST be a power of two.
  #[inline(always)]
  pub(crate) fn should_run(&self, denominator_pow2: u32) -> bool {
    let mask = (denominator_pow2 - 1) as u64;
    (self.next_weyl() & mask) == 0
  }

  /// Returns a value in `0..bound`. `bound` must be non-zero.
  #[inline]
  pub(crate) fn below(&self, bound: usize) -> usize {
    // Finalize the Weyl state so consecutive calls are not correlated.
    let mut x = self.next_weyl();
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51afd7ed558ccd);
    x ^= x >> 33;
    (x % bound as u64) as usize
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn denominator_of_one_always_runs() {
    let rng = FastRng::new(7);
    assert!((0..100).all(|_| rng.should_run(1)));
  }

  #[test]
  fn below_stays_in_range() {
    let rng = FastRng::new(42);
    assert!((0..1000).all(|_| rng.below(5) < 5));
  }
}
