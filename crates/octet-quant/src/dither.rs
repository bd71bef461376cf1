//! Seeded uniform stream for stochastic rounding.

use std::fmt;
use std::sync::Arc;

use octet_core::{OctetError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Immutable, shareable sequence of uniform `[0, 1)` draws.
///
/// Indexing wraps, so a short stream serves tensors of any length. Two
/// streams with the same seed and length are identical.
#[derive(Clone)]
pub struct RandomStream {
    seed: u64,
    values: Arc<[f32]>,
}

impl RandomStream {
    /// Default number of draws.
    pub const DEFAULT_LEN: usize = 4096;
    /// Shortest stream accepted.
    pub const MIN_LEN: usize = 1024;

    /// Stream of [`Self::DEFAULT_LEN`] draws.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::generate(seed, Self::DEFAULT_LEN)
    }

    /// Stream of `len` draws.
    ///
    /// # Errors
    ///
    /// Returns [`OctetError::InvalidArgument`] when `len < MIN_LEN`.
    pub fn with_len(seed: u64, len: usize) -> Result<Self> {
        if len < Self::MIN_LEN {
            return Err(OctetError::InvalidArgument(format!(
                "random stream needs at least {} values, got {}",
                Self::MIN_LEN,
                len
            )));
        }
        Ok(Self::generate(seed, len))
    }

    fn generate(seed: u64, len: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let values: Vec<f32> = (0..len).map(|_| rng.gen::<f32>()).collect();
        Self {
            seed,
            values: values.into(),
        }
    }

    /// Seed the stream was generated from.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Number of draws before the stream wraps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Always false; streams hold at least [`Self::MIN_LEN`] draws.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Draw at `index`, wrapping around the stream.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> f32 {
        self.values[index % self.values.len()]
    }

    /// The draws.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }
}

impl fmt::Debug for RandomStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomStream")
            .field("seed", &self.seed)
            .field("len", &self.values.len())
            .finish()
    }
}
