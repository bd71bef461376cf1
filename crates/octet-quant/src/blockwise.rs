//! Blockwise quantization kernels.
//!
//! Each block of `block_size` elements is scaled by its own absmax, then every
//! normalized element is coded independently. Blocks are processed in
//! parallel; a block's absmax is always known before any of its elements is
//! coded.

use octet_core::{BlockSize, Element, ExecutionContext, OctetError, Result};
use rayon::prelude::*;
use tracing::trace;

use crate::buffer::check_absmax_len;
use crate::{
    all_finite, block_max_abs, BlockCodec, Codebook, QuantizedBuffer, QuantizedView,
    QuantizedViewMut, Rounding,
};

/// Code one block against an already computed `absmax`.
///
/// `base` is the flat index of the block's first element, used to pick the
/// dither draw. A zero absmax writes code 0 everywhere.
#[inline]
pub fn encode_block<T: Element, C: BlockCodec + ?Sized>(
    codec: &C,
    values: &[T],
    absmax: f32,
    codes: &mut [u8],
    rounding: &Rounding<'_>,
    base: usize,
) {
    if absmax == 0.0 {
        codes.fill(0);
        return;
    }
    let inv = 1.0 / absmax;
    for (i, (code, v)) in codes.iter_mut().zip(values).enumerate() {
        let normalized = (v.to_f32() * inv).clamp(-1.0, 1.0);
        *code = codec.encode(normalized, rounding.dither(base + i));
    }
}

/// Decode one block. A zero absmax yields exact zeros regardless of codes.
#[inline]
pub fn decode_block<T: Element, C: BlockCodec + ?Sized>(
    codec: &C,
    codes: &[u8],
    absmax: f32,
    out: &mut [T],
) {
    if absmax == 0.0 {
        out.fill(T::from_f32(0.0));
        return;
    }
    for (o, &c) in out.iter_mut().zip(codes) {
        *o = T::from_f32(codec.decode(c) * absmax);
    }
}

/// Quantize `values` into caller-owned codes and absmax.
///
/// # Errors
///
/// Returns [`OctetError::InvalidShape`] when the view does not match
/// `values`, [`OctetError::InvalidArgument`] for non-finite input, and
/// [`OctetError::ExecutionFault`] if a worker fails. Nothing is written on a
/// validation error.
pub fn quantize_blockwise_into<T: Element, C: BlockCodec + ?Sized>(
    ctx: &ExecutionContext,
    values: &[T],
    codec: &C,
    out: QuantizedViewMut<'_>,
    rounding: Rounding<'_>,
) -> Result<()> {
    if out.codes.len() != values.len() {
        return Err(OctetError::shape("codes", values.len(), out.codes.len()));
    }
    check_absmax_len(values.len(), out.absmax.len(), out.block_size)?;

    let bs = out.block_size.get();
    ctx.launch("quantize_blockwise", move || {
        if !all_finite(values) {
            return Err(OctetError::InvalidArgument(
                "cannot quantize non-finite values".into(),
            ));
        }
        trace!(
            n = values.len(),
            block_size = bs,
            scheme = ?codec.scheme(),
            stochastic = rounding.is_stochastic(),
            "quantize"
        );
        values
            .par_chunks(bs)
            .zip(out.codes.par_chunks_mut(bs))
            .zip(out.absmax.par_iter_mut())
            .enumerate()
            .for_each(|(b, ((src, codes), amax))| {
                *amax = block_max_abs(src);
                encode_block(codec, src, *amax, codes, &rounding, b * bs);
            });
        Ok(())
    })
}

/// Dequantize into a caller-owned slice.
///
/// # Errors
///
/// Returns [`OctetError::InvalidShape`] when `out` does not match the view.
pub fn dequantize_blockwise_into<T: Element, C: BlockCodec + ?Sized>(
    ctx: &ExecutionContext,
    input: QuantizedView<'_>,
    codec: &C,
    out: &mut [T],
) -> Result<()> {
    if out.len() != input.codes.len() {
        return Err(OctetError::shape("output", input.codes.len(), out.len()));
    }
    check_absmax_len(input.codes.len(), input.absmax.len(), input.block_size)?;

    let bs = input.block_size.get();
    ctx.launch("dequantize_blockwise", move || {
        out.par_chunks_mut(bs)
            .zip(input.codes.par_chunks(bs))
            .zip(input.absmax.par_iter())
            .for_each(|((dst, codes), &amax)| decode_block(codec, codes, amax, dst));
        Ok(())
    })
}

/// Quantize against a codebook into a new buffer.
///
/// Runs on the global [`ExecutionContext`].
///
/// # Errors
///
/// See [`quantize_blockwise_into`].
pub fn quantize_blockwise<T: Element>(
    values: &[T],
    codebook: &Codebook,
    block_size: BlockSize,
    rounding: Rounding<'_>,
) -> Result<QuantizedBuffer> {
    let ctx = ExecutionContext::global()?;
    let mut out = QuantizedBuffer::zeros(values.len(), block_size, codebook.clone().into());
    quantize_blockwise_into(&ctx, values, codebook, out.view_mut(), rounding)?;
    Ok(out)
}

/// Dequantize codebook codes into a new vector.
///
/// # Errors
///
/// Returns [`OctetError::InvalidShape`] if `absmax` does not have one entry
/// per block.
pub fn dequantize_blockwise<T: Element>(
    codes: &[u8],
    codebook: &Codebook,
    absmax: &[f32],
    block_size: BlockSize,
) -> Result<Vec<T>> {
    let ctx = ExecutionContext::global()?;
    let view = QuantizedView::new(codes, absmax, block_size)?;
    let mut out = vec![T::from_f32(0.0); codes.len()];
    dequantize_blockwise_into(&ctx, view, codebook, &mut out)?;
    Ok(out)
}

/// Dequantize a buffer with its own codec.
///
/// # Errors
///
/// See [`dequantize_blockwise_into`].
pub fn dequantize_buffer<T: Element>(buffer: &QuantizedBuffer) -> Result<Vec<T>> {
    let ctx = ExecutionContext::global()?;
    let mut out = vec![T::from_f32(0.0); buffer.len()];
    dequantize_blockwise_into(&ctx, buffer.view(), &buffer.codec, &mut out)?;
    Ok(out)
}

/// Map values straight to the nearest codebook entry, without any scaling.
///
/// # Errors
///
/// Returns [`OctetError::InvalidArgument`] for non-finite input.
pub fn quantize_unscaled<T: Element>(values: &[T], codebook: &Codebook) -> Result<Vec<u8>> {
    let ctx = ExecutionContext::global()?;
    ctx.launch("quantize_unscaled", || {
        if !all_finite(values) {
            return Err(OctetError::InvalidArgument(
                "cannot quantize non-finite values".into(),
            ));
        }
        Ok(values
            .par_iter()
            .map(|v| codebook.nearest(v.to_f32()))
            .collect())
    })
}

/// Look up codes in a codebook, without any scaling.
///
/// # Errors
///
/// Returns [`OctetError::ExecutionFault`] if a worker fails.
pub fn dequantize_unscaled<T: Element>(codes: &[u8], codebook: &Codebook) -> Result<Vec<T>> {
    let ctx = ExecutionContext::global()?;
    ctx.launch("dequantize_unscaled", || {
        Ok(codes
            .par_iter()
            .map(|&c| T::from_f32(codebook.get(c)))
            .collect())
    })
}
