//! Dynamic blockwise codec.
//!
//! A code's magnitude field (7 bits when signed, 8 bits when unsigned) is
//! read as a tiny float:
//!
//! - `r == 0` decodes to `0.0`
//! - otherwise let `z` be the number of leading zero bits of `r` within the
//!   field. The first set bit is an indicator; the `f = width - 1 - z` bits
//!   after it form a fraction `F`, and the magnitude is
//!   `10^-z * (0.1 + 0.9 * (F + 0.5) / 2^f)`
//! - the all-ones field decodes to exactly `1.0`
//!
//! Each leading zero drops one decade, so small moments keep relative
//! precision down to `1e-6` (signed) or `1e-7` (unsigned). The mapping is
//! strictly increasing in `r`. Signed codes carry the sign in bit 7.

use std::sync::OnceLock;

use octet_core::{BlockSize, Element, ExecutionContext, Result};

use crate::codec::{nearest_index, stochastic_index};
use crate::{
    dequantize_blockwise_into, quantize_blockwise_into, BlockCodec, QuantScheme, QuantizedBuffer,
    QuantizedView, QuantizedViewMut, Rounding,
};

const SIGN_BIT: u8 = 0x80;

/// Magnitude tables indexed by magnitude field, built on first use.
struct MagnitudeTables {
    signed: [f32; 128],
    unsigned: [f32; 256],
}

static TABLES: OnceLock<MagnitudeTables> = OnceLock::new();

fn tables() -> &'static MagnitudeTables {
    TABLES.get_or_init(|| {
        let mut signed = [0.0f32; 128];
        for (r, m) in signed.iter_mut().enumerate() {
            *m = field_magnitude(r as u32, 7);
        }
        let mut unsigned = [0.0f32; 256];
        for (r, m) in unsigned.iter_mut().enumerate() {
            *m = field_magnitude(r as u32, 8);
        }
        MagnitudeTables { signed, unsigned }
    })
}

fn field_magnitude(r: u32, width: u32) -> f32 {
    let all_ones = (1u32 << width) - 1;
    if r == 0 {
        return 0.0;
    }
    if r == all_ones {
        return 1.0;
    }
    let z = r.leading_zeros() - (32 - width);
    let f = width - 1 - z;
    let fraction = r & ((1u32 << f) - 1);
    let linear = 0.1 + 0.9 * (f64::from(fraction) + 0.5) / f64::from(1u32 << f);
    (10f64.powi(-(z as i32)) * linear) as f32
}

/// The dynamic byte mapping, signed or unsigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DynamicCodec {
    signed: bool,
}

impl DynamicCodec {
    /// Create a codec.
    #[must_use]
    pub const fn new(signed: bool) -> Self {
        Self { signed }
    }

    /// Magnitude table for this codec's field width.
    #[must_use]
    pub fn magnitudes(&self) -> &'static [f32] {
        let t = tables();
        if self.signed {
            &t.signed
        } else {
            &t.unsigned
        }
    }

    /// All 256 decoded values in code order.
    #[must_use]
    pub fn table(&self) -> Vec<f32> {
        (0..=u8::MAX).map(|c| self.decode(c)).collect()
    }
}

impl BlockCodec for DynamicCodec {
    #[inline]
    fn encode(&self, normalized: f32, dither: Option<f32>) -> u8 {
        let mags = self.magnitudes();
        if !self.signed && normalized <= 0.0 {
            return 0;
        }
        let m = normalized.abs().min(1.0);
        let r = match dither {
            None => nearest_index(mags, m),
            Some(u) => stochastic_index(mags, m, u),
        } as u8;
        if self.signed && normalized < 0.0 && r != 0 {
            SIGN_BIT | r
        } else {
            r
        }
    }

    #[inline]
    fn decode(&self, code: u8) -> f32 {
        let t = tables();
        if self.signed {
            let m = t.signed[(code & !SIGN_BIT) as usize];
            if code & SIGN_BIT != 0 {
                -m
            } else {
                m
            }
        } else {
            t.unsigned[code as usize]
        }
    }

    fn signed(&self) -> bool {
        self.signed
    }

    fn scheme(&self) -> QuantScheme {
        if self.signed {
            QuantScheme::DynamicSigned
        } else {
            QuantScheme::DynamicUnsigned
        }
    }
}

/// Quantize `values` with the dynamic codec.
///
/// Runs on the global [`ExecutionContext`].
///
/// # Errors
///
/// Returns [`octet_core::OctetError::InvalidArgument`] for non-finite input.
pub fn quantize_dynamic<T: Element>(
    values: &[T],
    block_size: BlockSize,
    signed: bool,
    rounding: Rounding<'_>,
) -> Result<QuantizedBuffer> {
    let ctx = ExecutionContext::global()?;
    let codec = DynamicCodec::new(signed);
    let mut out = QuantizedBuffer::zeros(values.len(), block_size, codec.into());
    let (view, codec) = out.parts_mut();
    quantize_blockwise_into(&ctx, values, codec, view, rounding)?;
    Ok(out)
}

/// Dequantize dynamic codes into a new vector.
///
/// # Errors
///
/// Returns [`octet_core::OctetError::InvalidShape`] if `absmax` does not have
/// one entry per block.
pub fn dequantize_dynamic<T: Element>(
    codes: &[u8],
    absmax: &[f32],
    block_size: BlockSize,
    signed: bool,
) -> Result<Vec<T>> {
    let ctx = ExecutionContext::global()?;
    let view = QuantizedView::new(codes, absmax, block_size)?;
    let mut out = vec![T::from_f32(0.0); codes.len()];
    dequantize_blockwise_into(&ctx, view, &DynamicCodec::new(signed), &mut out)?;
    Ok(out)
}

/// Quantize into caller-owned storage with the dynamic codec.
///
/// # Errors
///
/// See [`quantize_blockwise_into`].
pub fn quantize_dynamic_into<T: Element>(
    ctx: &ExecutionContext,
    values: &[T],
    signed: bool,
    out: QuantizedViewMut<'_>,
    rounding: Rounding<'_>,
) -> Result<()> {
    quantize_blockwise_into(ctx, values, &DynamicCodec::new(signed), out, rounding)
}
