//! The per-element codec interface shared by the static and dynamic schemes.

use serde::{Deserialize, Serialize};

use crate::{Codebook, DynamicCodec, RandomStream};

/// Quantization scheme identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantScheme {
    /// Dynamic mapping with a sign bit.
    DynamicSigned,
    /// Dynamic mapping over non-negative values.
    DynamicUnsigned,
    /// Caller-supplied codebook.
    Static,
}

impl QuantScheme {
    /// Whether the scheme needs a codebook to decode.
    #[must_use]
    pub const fn needs_codebook(self) -> bool {
        matches!(self, Self::Static)
    }
}

/// How a normalized value is rounded to a code.
#[derive(Debug, Clone, Copy, Default)]
pub enum Rounding<'a> {
    /// Nearest representable value, ties toward the smaller one.
    #[default]
    Nearest,
    /// Round up with probability proportional to the distance from the lower
    /// neighbour. Element `i` of a call uses `stream[(offset + i) mod len]`.
    Stochastic {
        /// Uniform `[0, 1)` source.
        stream: &'a RandomStream,
        /// Starting position in the stream.
        offset: usize,
    },
}

impl Rounding<'_> {
    /// Uniform draw for flat element `index`, or `None` for nearest rounding.
    #[inline]
    #[must_use]
    pub fn dither(&self, index: usize) -> Option<f32> {
        match self {
            Self::Nearest => None,
            Self::Stochastic { stream, offset } => Some(stream.get(offset.wrapping_add(index))),
        }
    }

    /// The same rounding with its stream position moved forward by `by`.
    #[must_use]
    pub fn shifted(&self, by: usize) -> Self {
        match *self {
            Self::Nearest => Self::Nearest,
            Self::Stochastic { stream, offset } => Self::Stochastic {
                stream,
                offset: offset.wrapping_add(by),
            },
        }
    }

    /// Whether this is the stochastic mode.
    #[must_use]
    pub fn is_stochastic(&self) -> bool {
        matches!(self, Self::Stochastic { .. })
    }
}

/// Common interface for byte codecs over normalized values.
///
/// Values handed to [`BlockCodec::encode`] are already divided by their
/// block's absmax, so they lie in `[-1, 1]`.
pub trait BlockCodec: Send + Sync {
    /// Encode one normalized value. `dither` selects stochastic rounding.
    fn encode(&self, normalized: f32, dither: Option<f32>) -> u8;

    /// Decode one code to its normalized value.
    fn decode(&self, code: u8) -> f32;

    /// Whether negative values are representable.
    fn signed(&self) -> bool;

    /// Get the quantization scheme.
    fn scheme(&self) -> QuantScheme;
}

/// A codec chosen at runtime: the dynamic mapping or a static codebook.
#[derive(Debug, Clone, PartialEq)]
pub enum Codec {
    /// Dynamic mapping.
    Dynamic(DynamicCodec),
    /// Static codebook (linear, dynamic-tree or fitted quantiles).
    Static(Codebook),
}

impl Codec {
    /// Dynamic codec with the given signedness.
    #[must_use]
    pub const fn dynamic(signed: bool) -> Self {
        Self::Dynamic(DynamicCodec::new(signed))
    }

    /// The codebook, for static codecs.
    #[must_use]
    pub fn codebook(&self) -> Option<&Codebook> {
        match self {
            Self::Dynamic(_) => None,
            Self::Static(codebook) => Some(codebook),
        }
    }
}

impl From<Codebook> for Codec {
    fn from(codebook: Codebook) -> Self {
        Self::Static(codebook)
    }
}

impl From<DynamicCodec> for Codec {
    fn from(codec: DynamicCodec) -> Self {
        Self::Dynamic(codec)
    }
}

impl BlockCodec for Codec {
    #[inline]
    fn encode(&self, normalized: f32, dither: Option<f32>) -> u8 {
        match self {
            Self::Dynamic(c) => c.encode(normalized, dither),
            Self::Static(c) => c.encode(normalized, dither),
        }
    }

    #[inline]
    fn decode(&self, code: u8) -> f32 {
        match self {
            Self::Dynamic(c) => c.decode(code),
            Self::Static(c) => c.decode(code),
        }
    }

    fn signed(&self) -> bool {
        match self {
            Self::Dynamic(c) => c.signed(),
            Self::Static(c) => c.signed(),
        }
    }

    fn scheme(&self) -> QuantScheme {
        match self {
            Self::Dynamic(c) => c.scheme(),
            Self::Static(c) => c.scheme(),
        }
    }
}

/// First index holding the same value as `table[i]`.
#[inline]
fn first_of_run(table: &[f32], i: usize) -> usize {
    let v = table[i];
    table.partition_point(|&t| t < v)
}

/// Index of the nearest entry of a non-decreasing table.
///
/// Ties go to the lower index; within a run of equal entries the first one is
/// returned.
#[inline]
pub(crate) fn nearest_index(table: &[f32], x: f32) -> usize {
    let hi = table.partition_point(|&t| t < x);
    if hi == 0 {
        return 0;
    }
    if hi == table.len() {
        return first_of_run(table, hi - 1);
    }
    let lo = hi - 1;
    if x - table[lo] <= table[hi] - x {
        first_of_run(table, lo)
    } else {
        hi
    }
}

/// Stochastic choice between the entries bracketing `x`.
///
/// Picks the upper neighbour when `u < (x - lo) / (hi - lo)`, so that the
/// expected decoded value is `x`. Values outside the table clamp to its ends.
#[inline]
pub(crate) fn stochastic_index(table: &[f32], x: f32, u: f32) -> usize {
    let hi = table.partition_point(|&t| t < x);
    if hi == 0 {
        return 0;
    }
    if hi == table.len() {
        return first_of_run(table, hi - 1);
    }
    if table[hi] == x {
        return hi;
    }
    let lo = hi - 1;
    let p = (x - table[lo]) / (table[hi] - table[lo]);
    if u < p {
        hi
    } else {
        first_of_run(table, lo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: [f32; 6] = [-1.0, -0.5, 0.0, 0.0, 0.5, 1.0];

    #[test]
    fn test_nearest_index() {
        assert_eq!(nearest_index(&TABLE, -2.0), 0);
        assert_eq!(nearest_index(&TABLE, 2.0), 5);
        assert_eq!(nearest_index(&TABLE, 0.6), 4);
        // tie between 0.0 and 0.5 goes low, to the first of the zero run
        assert_eq!(nearest_index(&TABLE, 0.25), 2);
        assert_eq!(nearest_index(&TABLE, 0.0), 2);
        assert_eq!(nearest_index(&TABLE, -0.75), 0);
    }

    #[test]
    fn test_stochastic_index() {
        assert_eq!(stochastic_index(&TABLE, 0.5, 0.0), 4);
        assert_eq!(stochastic_index(&TABLE, 0.4, 0.79), 4);
        assert_eq!(stochastic_index(&TABLE, 0.4, 0.81), 2);
        assert_eq!(stochastic_index(&TABLE, 1.5, 0.5), 5);
    }

    #[test]
    fn test_rounding_dither_wraps() {
        let stream = RandomStream::new(7);
        let r = Rounding::Stochastic {
            stream: &stream,
            offset: 5,
        };
        assert_eq!(r.dither(stream.len()), Some(stream.get(5)));
        assert_eq!(Rounding::Nearest.dither(3), None);
        assert!(r.is_stochastic());
    }

    #[test]
    fn test_codec_enum_dispatch() {
        let codec = Codec::dynamic(true);
        assert!(codec.signed());
        assert_eq!(codec.scheme(), QuantScheme::DynamicSigned);
        assert!(codec.codebook().is_none());

        let codec: Codec = Codebook::linear(false).into();
        assert!(!codec.signed());
        assert_eq!(codec.scheme(), QuantScheme::Static);
        assert_eq!(codec.decode(255), 1.0);
    }
}
