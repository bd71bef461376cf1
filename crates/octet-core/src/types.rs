//! Common type definitions.

use std::fmt;

use half::{bf16, f16};
use serde::{Deserialize, Serialize};

use crate::{OctetError, Result};

/// Data type of gradient and parameter elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    /// 32-bit floating point.
    #[default]
    Float32,
    /// 16-bit floating point.
    Float16,
    /// Brain floating point (16-bit).
    BFloat16,
}

impl Dtype {
    /// Size of the dtype in bytes.
    #[must_use]
    pub const fn size_bytes(&self) -> usize {
        match self {
            Self::Float32 => 4,
            Self::Float16 | Self::BFloat16 => 2,
        }
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Float32 => "f32",
            Self::Float16 => "f16",
            Self::BFloat16 => "bf16",
        };
        f.write_str(name)
    }
}

/// Element precision a kernel can read and write.
///
/// All arithmetic happens in `f32`; elements are widened on load and narrowed
/// on store. Elements are plain old data so raw buffers can be viewed as bytes.
pub trait Element: bytemuck::Pod + Send + Sync + PartialEq + fmt::Debug {
    /// Runtime tag for this element type.
    const DTYPE: Dtype;

    /// Widen to `f32`.
    fn to_f32(self) -> f32;

    /// Narrow from `f32` (round to nearest even for 16-bit types).
    fn from_f32(value: f32) -> Self;
}

impl Element for f32 {
    const DTYPE: Dtype = Dtype::Float32;

    #[inline(always)]
    fn to_f32(self) -> f32 {
        self
    }

    #[inline(always)]
    fn from_f32(value: f32) -> Self {
        value
    }
}

impl Element for f16 {
    const DTYPE: Dtype = Dtype::Float16;

    #[inline(always)]
    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }

    #[inline(always)]
    fn from_f32(value: f32) -> Self {
        f16::from_f32(value)
    }
}

impl Element for bf16 {
    const DTYPE: Dtype = Dtype::BFloat16;

    #[inline(always)]
    fn to_f32(self) -> f32 {
        bf16::to_f32(self)
    }

    #[inline(always)]
    fn from_f32(value: f32) -> Self {
        bf16::from_f32(value)
    }
}

/// Number of contiguous elements that share one absmax scale.
///
/// Valid sizes are powers of two between [`BlockSize::MIN`] and
/// [`BlockSize::MAX`]; 2048 and 4096 are the canonical sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct BlockSize(usize);

impl BlockSize {
    /// Smallest supported block.
    pub const MIN: usize = 2;
    /// Largest supported block.
    pub const MAX: usize = 4096;
    /// Canonical block size for optimizer state.
    pub const B2048: BlockSize = BlockSize(2048);
    /// Canonical block size for standalone tensor compression.
    pub const B4096: BlockSize = BlockSize(4096);

    /// Validate a block size.
    ///
    /// # Errors
    ///
    /// Returns [`OctetError::UnsupportedConfig`] when `size` is not a power of
    /// two in `[MIN, MAX]`.
    pub fn new(size: usize) -> Result<Self> {
        if !size.is_power_of_two() || !(Self::MIN..=Self::MAX).contains(&size) {
            return Err(OctetError::UnsupportedConfig(format!(
                "block size {} is not a power of two in [{}, {}]",
                size,
                Self::MIN,
                Self::MAX
            )));
        }
        Ok(Self(size))
    }

    /// Block length in elements.
    #[inline]
    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }

    /// Number of blocks (and absmax entries) covering `n` elements.
    #[inline]
    #[must_use]
    pub const fn num_blocks(self, n: usize) -> usize {
        n.div_ceil(self.0)
    }
}

impl Default for BlockSize {
    fn default() -> Self {
        Self::B2048
    }
}

impl TryFrom<usize> for BlockSize {
    type Error = OctetError;

    fn try_from(size: usize) -> Result<Self> {
        Self::new(size)
    }
}

impl From<BlockSize> for usize {
    fn from(block: BlockSize) -> Self {
        block.0
    }
}

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Optimizer family, the closed set of recurrences the kernels implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerFamily {
    /// SGD with momentum: one signed moment.
    Momentum,
    /// Adam: signed first moment, unsigned second moment.
    #[default]
    Adam,
    /// RMSprop: one unsigned moment.
    RmsProp,
    /// Adagrad: one unsigned accumulator.
    Adagrad,
}

impl OptimizerFamily {
    /// All families, in declaration order.
    pub const ALL: [OptimizerFamily; 4] = [
        Self::Momentum,
        Self::Adam,
        Self::RmsProp,
        Self::Adagrad,
    ];

    /// Whether the family keeps a second moment.
    #[must_use]
    pub const fn needs_state2(self) -> bool {
        matches!(self, Self::Adam)
    }

    /// Whether the first moment can be negative.
    #[must_use]
    pub const fn state1_signed(self) -> bool {
        matches!(self, Self::Momentum | Self::Adam)
    }

    /// Whether the second moment can be negative (never, it is a squared mean).
    #[must_use]
    pub const fn state2_signed(self) -> bool {
        false
    }

    /// Lowercase family name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Momentum => "momentum",
            Self::Adam => "adam",
            Self::RmsProp => "rmsprop",
            Self::Adagrad => "adagrad",
        }
    }
}

impl fmt::Display for OptimizerFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Precision of persisted optimizer state.
///
/// Serialized as the bit width (`8` or `32`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "u8", into = "u8")]
pub enum StateBits {
    /// Full-precision `f32` moments.
    ThirtyTwo,
    /// Blockwise 8-bit moments.
    #[default]
    Eight,
}

impl TryFrom<u8> for StateBits {
    type Error = OctetError;

    fn try_from(bits: u8) -> Result<Self> {
        match bits {
            8 => Ok(Self::Eight),
            32 => Ok(Self::ThirtyTwo),
            other => Err(OctetError::UnsupportedConfig(format!(
                "optimizer state must be 8 or 32 bits, got {other}"
            ))),
        }
    }
}

impl From<StateBits> for u8 {
    fn from(bits: StateBits) -> Self {
        match bits {
            StateBits::ThirtyTwo => 32,
            StateBits::Eight => 8,
        }
    }
}

/// How 8-bit moments are coded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateCodecKind {
    /// Compiled-in dynamic tree mapping; needs only per-block absmax.
    #[default]
    Dynamic,
    /// Caller-fitted quantile codebooks, one per moment.
    Quantile,
}

/// Memory statistics for optimizer state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryStats {
    /// Number of parameter elements tracked.
    pub total_elements: usize,
    /// Bytes actually used by the stored state.
    pub state_bytes: usize,
    /// Bytes the same state would need in `f32`.
    pub state_bytes_fp32: usize,
}

impl MemoryStats {
    /// Fraction of memory saved relative to `f32` state (0.0 - 1.0).
    #[must_use]
    pub fn memory_saved(&self) -> f64 {
        if self.state_bytes_fp32 == 0 {
            0.0
        } else {
            1.0 - self.state_bytes as f64 / self.state_bytes_fp32 as f64
        }
    }

    /// Stored state in megabytes.
    #[must_use]
    pub fn state_mb(&self) -> f64 {
        self.state_bytes as f64 / 1_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_size_validation() {
        assert_eq!(BlockSize::new(2048).unwrap(), BlockSize::B2048);
        assert_eq!(BlockSize::new(4).unwrap().get(), 4);
        assert!(matches!(
            BlockSize::new(3000),
            Err(OctetError::UnsupportedConfig(_))
        ));
        assert!(BlockSize::new(8192).is_err());
        assert!(BlockSize::new(1).is_err());
        assert!(BlockSize::new(0).is_err());
    }

    #[test]
    fn test_num_blocks() {
        let b = BlockSize::B2048;
        assert_eq!(b.num_blocks(0), 0);
        assert_eq!(b.num_blocks(1), 1);
        assert_eq!(b.num_blocks(2048), 1);
        assert_eq!(b.num_blocks(2049), 2);
    }

    #[test]
    fn test_element_roundtrip() {
        assert_eq!(<f32 as Element>::from_f32(0.25).to_f32(), 0.25);
        assert_eq!(<f16 as Element>::from_f32(0.5).to_f32(), 0.5);
        assert_eq!(<bf16 as Element>::from_f32(-2.0).to_f32(), -2.0);
        assert_eq!(<f16 as Element>::DTYPE, Dtype::Float16);
    }

    #[test]
    fn test_family_state_layout() {
        assert!(OptimizerFamily::Adam.needs_state2());
        assert!(!OptimizerFamily::Momentum.needs_state2());
        assert!(OptimizerFamily::Momentum.state1_signed());
        assert!(!OptimizerFamily::Adagrad.state1_signed());
        assert!(!OptimizerFamily::RmsProp.state1_signed());
    }

    #[test]
    fn test_memory_saved() {
        let stats = MemoryStats {
            total_elements: 100,
            state_bytes: 200,
            state_bytes_fp32: 800,
        };
        assert!((stats.memory_saved() - 0.75).abs() < 1e-12);
        assert_eq!(MemoryStats::default().memory_saved(), 0.0);
    }
}
