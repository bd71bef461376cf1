//! Fused 8-bit blockwise optimizer update.
//!
//! Each block is decoded into per-worker scratch with its previous absmax, run
//! through the recurrence in `f32`, and requantized with the new block maximum
//! before the worker moves on. No full-precision copy of the moments is ever
//! materialized.

use octet_core::{Element, ExecutionContext, OctetError, OptimizerFamily, Result};
use octet_quant::{decode_block, encode_block, BlockCodec, Codec, QuantizedViewMut, Rounding};
use rayon::prelude::*;
use tracing::{debug, trace, warn};

use crate::chunks::{check_len, check_state2, split_quantized, unorm_scale, QuantBlock, QuantChunk};
use crate::family::advance;
use crate::{Hyperparams, StepConstants, StepReport};

/// Quantized optimizer moments and the codecs they are coded with.
#[derive(Debug)]
pub struct QuantizedMoments<'a> {
    /// First moment.
    pub state1: QuantizedViewMut<'a>,
    /// Codec of the first moment.
    pub codec1: &'a Codec,
    /// Second moment and its codec (Adam only).
    pub state2: Option<(QuantizedViewMut<'a>, &'a Codec)>,
}

impl<'a> QuantizedMoments<'a> {
    /// Moments for a single-state family.
    #[must_use]
    pub fn single(state1: QuantizedViewMut<'a>, codec1: &'a Codec) -> Self {
        Self {
            state1,
            codec1,
            state2: None,
        }
    }

    /// Moments for a two-state family.
    #[must_use]
    pub fn pair(
        state1: QuantizedViewMut<'a>,
        codec1: &'a Codec,
        state2: QuantizedViewMut<'a>,
        codec2: &'a Codec,
    ) -> Self {
        Self {
            state1,
            codec1,
            state2: Some((state2, codec2)),
        }
    }
}

struct Scratch {
    s1: Vec<f32>,
    s2: Vec<f32>,
}

impl Scratch {
    fn new(block_size: usize) -> Self {
        Self {
            s1: vec![0.0; block_size],
            s2: vec![0.0; block_size],
        }
    }
}

#[derive(Clone, Copy)]
struct Codecs<'a> {
    state1: &'a Codec,
    state2: Option<&'a Codec>,
}

/// Apply one optimizer step with blockwise 8-bit moments.
///
/// Rounding of the requantized state follows `rounding`; the first moment
/// draws dither from element `i` of the call and the second from `n + i`, so
/// the two moments never share a draw.
///
/// # Errors
///
/// - [`OctetError::InvalidShape`] if any code or absmax buffer does not match
///   `g.len()` and the block size
/// - [`OctetError::InvalidArgument`] for bad hyperparameters
/// - [`OctetError::UnsupportedConfig`] if `state2` does not match the family,
///   the two moments use different block sizes, or an unsigned codec is given
///   for a signed moment
///
/// No buffer is modified when one of these is returned.
pub fn update_8bit_blockwise<T: Element>(
    ctx: &ExecutionContext,
    family: OptimizerFamily,
    g: &[T],
    p: &mut [T],
    moments: QuantizedMoments<'_>,
    hp: &Hyperparams,
    rounding: Rounding<'_>,
) -> Result<StepReport> {
    hp.validate(family)?;
    let QuantizedMoments {
        state1,
        codec1,
        state2,
    } = moments;
    check_state2(family, state2.is_some())?;

    let n = g.len();
    let block_size = state1.block_size;
    check_len("parameters", n, p.len())?;
    check_len("state1", n, state1.codes.len())?;
    check_len("state1 absmax", block_size.num_blocks(n), state1.absmax.len())?;
    check_signedness("state1", family.state1_signed(), codec1)?;
    if let Some((s2, codec2)) = &state2 {
        if s2.block_size != block_size {
            return Err(OctetError::UnsupportedConfig(format!(
                "state2 block size {} differs from state1 block size {}",
                s2.block_size, block_size
            )));
        }
        check_len("state2", n, s2.codes.len())?;
        check_len("state2 absmax", block_size.num_blocks(n), s2.absmax.len())?;
        check_signedness("state2", family.state2_signed(), codec2)?;
    }

    let c = hp.constants(family);
    let (max_unorm, param_norm) = (hp.max_unorm, hp.param_norm);
    let codecs = Codecs {
        state1: codec1,
        state2: state2.as_ref().map(|(_, codec)| *codec),
    };
    let bs = block_size.get();
    let chunks = split_quantized(block_size, g, p, state1, state2.map(|(view, _)| view));
    let rounding2 = rounding.shifted(n);

    ctx.launch("update_8bit_blockwise", move || {
        trace!(
            n,
            block_size = bs,
            family = %family,
            stochastic = rounding.is_stochastic(),
            "update_8bit_blockwise"
        );
        let mut report = StepReport::default();
        if max_unorm > 0.0 {
            let partials: Vec<f64> = chunks
                .par_iter()
                .map_init(
                    || Scratch::new(bs),
                    |scratch, ch| block_update_sq(&c, codecs, ch, scratch),
                )
                .collect();
            let u = partials.into_iter().sum::<f64>().sqrt() as f32;
            report.update_norm = Some(u);
            report.unorm_scale = unorm_scale(u, max_unorm, param_norm);
            if report.unorm_scale < 1.0 {
                debug!(update_norm = u, scale = report.unorm_scale, "update norm capped");
            }
        }
        let scale = report.unorm_scale;
        let nonfinite: Vec<usize> = chunks
            .into_par_iter()
            .map_init(
                || Scratch::new(bs),
                |scratch, ch| {
                    let base = ch.index * bs;
                    apply_block(&c, codecs, ch, scratch, scale, &rounding, &rounding2, base)
                },
            )
            .collect();
        report.nonfinite = nonfinite.into_iter().sum();
        if report.nonfinite > 0 {
            warn!(
                count = report.nonfinite,
                "non-finite optimizer moments were quantized"
            );
        }
        Ok(report)
    })
}

fn check_signedness(what: &str, moment_signed: bool, codec: &Codec) -> Result<()> {
    if moment_signed && !codec.signed() {
        return Err(OctetError::UnsupportedConfig(format!(
            "{what} is signed but its codec ({:?}) is unsigned",
            codec.scheme()
        )));
    }
    Ok(())
}

/// Decode a block's moments into scratch, returning the filled prefixes.
fn load_block<'s>(
    codecs: Codecs<'_>,
    s1: &QuantBlock<'_>,
    s2: Option<&QuantBlock<'_>>,
    scratch: &'s mut Scratch,
    len: usize,
) -> (&'s mut [f32], &'s mut [f32]) {
    let Scratch { s1: m, s2: v } = scratch;
    let (m, v) = (&mut m[..len], &mut v[..len]);
    decode_block(codecs.state1, &*s1.codes, *s1.absmax, m);
    match (s2, codecs.state2) {
        (Some(b), Some(codec)) => decode_block(codec, &*b.codes, *b.absmax, v),
        _ => v.fill(0.0),
    }
    (m, v)
}

fn block_update_sq<T: Element>(
    c: &StepConstants,
    codecs: Codecs<'_>,
    ch: &QuantChunk<'_, T>,
    scratch: &mut Scratch,
) -> f64 {
    let (m, v) = load_block(codecs, &ch.s1, ch.s2.as_ref(), scratch, ch.g.len());
    let mut acc = 0.0f64;
    for i in 0..ch.g.len() {
        let a = advance(c, ch.g[i].to_f32(), ch.p[i].to_f32(), m[i], v[i]);
        acc += f64::from(a.update) * f64::from(a.update);
    }
    acc
}

/// Returns the number of moments that are not finite after the step.
#[allow(clippy::too_many_arguments)]
fn apply_block<T: Element>(
    c: &StepConstants,
    codecs: Codecs<'_>,
    ch: QuantChunk<'_, T>,
    scratch: &mut Scratch,
    scale: f32,
    rounding1: &Rounding<'_>,
    rounding2: &Rounding<'_>,
    base: usize,
) -> usize {
    let QuantChunk { g, p, s1, s2, .. } = ch;
    let (m, v) = load_block(codecs, &s1, s2.as_ref(), scratch, g.len());

    let mut max1 = 0.0f32;
    let mut max2 = 0.0f32;
    let mut nonfinite = 0;
    for i in 0..g.len() {
        let pv = p[i].to_f32();
        let a = advance(c, g[i].to_f32(), pv, m[i], v[i]);
        m[i] = a.s1;
        v[i] = a.s2;
        // f32::max drops NaN, so count it here
        nonfinite += usize::from(!a.s1.is_finite()) + usize::from(!a.s2.is_finite());
        max1 = max1.max(a.s1.abs());
        max2 = max2.max(a.s2.abs());
        p[i] = T::from_f32(pv + a.update * scale);
    }

    let QuantBlock { codes, absmax } = s1;
    *absmax = max1;
    encode_block(codecs.state1, &*m, max1, codes, rounding1, base);
    if let (Some(QuantBlock { codes, absmax }), Some(codec)) = (s2, codecs.state2) {
        *absmax = max2;
        encode_block(codec, &*v, max2, codes, rounding2, base);
    }
    nonfinite
}
