//! 256-entry lookup tables for the static codec.

use std::fmt;
use std::sync::Arc;

use octet_core::{OctetError, Result};

use crate::codec::{nearest_index, stochastic_index};
use crate::{BlockCodec, QuantScheme};

/// Number of entries in a codebook (one per byte value).
pub const CODEBOOK_LEN: usize = 256;

/// An immutable table mapping each byte to a normalized value.
///
/// Entries are finite and non-decreasing. Cloning shares the table.
#[derive(Clone, PartialEq)]
pub struct Codebook {
    values: Arc<[f32]>,
}

impl Codebook {
    /// Build a codebook from caller-supplied values.
    ///
    /// # Errors
    ///
    /// Returns [`OctetError::InvalidShape`] unless exactly 256 values are
    /// given, and [`OctetError::InvalidArgument`] for non-finite or
    /// decreasing entries.
    pub fn from_values(values: impl Into<Vec<f32>>) -> Result<Self> {
        let values = values.into();
        if values.len() != CODEBOOK_LEN {
            return Err(OctetError::shape("codebook", CODEBOOK_LEN, values.len()));
        }
        if let Some(i) = values.iter().position(|v| !v.is_finite()) {
            return Err(OctetError::InvalidArgument(format!(
                "codebook entry {i} is not finite"
            )));
        }
        if let Some(i) = values.windows(2).position(|w| w[1] < w[0]) {
            return Err(OctetError::InvalidArgument(format!(
                "codebook entries must be non-decreasing (entry {} > entry {})",
                i,
                i + 1
            )));
        }
        Ok(Self {
            values: values.into(),
        })
    }

    /// Dynamic tree map: seven decades of interval midpoints plus `0` and `1`.
    ///
    /// Signed maps hold 127 positive and 127 negative midpoints; unsigned maps
    /// spend the sign bit on one more fraction bit per decade.
    #[must_use]
    pub fn dynamic(signed: bool) -> Self {
        const DECADES: i32 = 7;
        let mut data = Vec::with_capacity(CODEBOOK_LEN);
        for i in 0..DECADES {
            let bins = if signed { 1usize << i } else { 1usize << (i + 1) };
            let scale = 10f64.powi(i - (DECADES - 1));
            for k in 0..bins {
                let lo = 0.1 + 0.9 * k as f64 / bins as f64;
                let hi = 0.1 + 0.9 * (k + 1) as f64 / bins as f64;
                let mean = (scale * (lo + hi) / 2.0) as f32;
                data.push(mean);
                if signed {
                    data.push(-mean);
                }
            }
        }
        data.push(0.0);
        data.push(1.0);
        data.sort_by(f32::total_cmp);
        Self {
            values: data.into(),
        }
    }

    /// Evenly spaced map over `[-1, 1]` (signed) or `[0, 1]` (unsigned).
    #[must_use]
    pub fn linear(signed: bool) -> Self {
        let (start, end) = if signed { (-1.0f64, 1.0f64) } else { (0.0, 1.0) };
        let step = (end - start) / (CODEBOOK_LEN - 1) as f64;
        let values: Vec<f32> = (0..CODEBOOK_LEN)
            .map(|i| {
                if i == CODEBOOK_LEN - 1 {
                    end as f32
                } else {
                    (start + step * i as f64) as f32
                }
            })
            .collect();
        Self {
            values: values.into(),
        }
    }

    /// The table.
    #[must_use]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Value for `code`.
    #[inline]
    #[must_use]
    pub fn get(&self, code: u8) -> f32 {
        self.values[code as usize]
    }

    /// Smallest entry.
    #[must_use]
    pub fn min(&self) -> f32 {
        self.values[0]
    }

    /// Largest entry.
    #[must_use]
    pub fn max(&self) -> f32 {
        self.values[CODEBOOK_LEN - 1]
    }

    /// Nearest code for a normalized value (ties toward the lower index).
    #[inline]
    #[must_use]
    pub fn nearest(&self, x: f32) -> u8 {
        nearest_index(&self.values, x) as u8
    }

    /// Worst-case rounding error for a normalized value: the gap between the
    /// entries bracketing `x`, or the distance to the nearest end outside the
    /// table's range.
    #[must_use]
    pub fn resolution_at(&self, x: f32) -> f32 {
        let hi = self.values.partition_point(|&t| t < x);
        if hi == 0 {
            return (self.min() - x).max(0.0);
        }
        if hi == CODEBOOK_LEN {
            return x - self.max();
        }
        self.values[hi] - self.values[hi - 1]
    }
}

impl BlockCodec for Codebook {
    #[inline]
    fn encode(&self, normalized: f32, dither: Option<f32>) -> u8 {
        match dither {
            None => nearest_index(&self.values, normalized) as u8,
            Some(u) => stochastic_index(&self.values, normalized, u) as u8,
        }
    }

    #[inline]
    fn decode(&self, code: u8) -> f32 {
        self.get(code)
    }

    fn signed(&self) -> bool {
        self.min() < 0.0
    }

    fn scheme(&self) -> QuantScheme {
        QuantScheme::Static
    }
}

impl fmt::Debug for Codebook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codebook")
            .field("min", &self.min())
            .field("max", &self.max())
            .finish()
    }
}
