//! Fused 8-bit update with a single scale per tensor.
//!
//! Each moment holds one byte per element, coded against a codebook and one
//! maximum for the whole tensor. A read-only first pass finds the maximum of
//! the updated moments; the second pass decodes with the old maximum, reruns
//! the recurrence and codes the result against the new one. The stored
//! maximum is replaced when the call returns.

use octet_core::{Element, ExecutionContext, OctetError, OptimizerFamily, Result};
use octet_quant::{BlockCodec, Codebook, Rounding};
use rayon::prelude::*;
use tracing::{debug, trace, warn};

use crate::chunks::{check_len, check_state2, split_tensorwise, unorm_scale, TensorChunk};
use crate::family::advance;
use crate::{Hyperparams, StepConstants, StepReport, UPDATE_CHUNK};

/// One 8-bit moment scaled by a tensor-wide maximum.
#[derive(Debug)]
pub struct TensorwiseMoment<'a> {
    /// One code per element.
    pub codes: &'a mut [u8],
    /// Largest absolute moment value. Overwritten with the new maximum.
    pub max: &'a mut f32,
    /// Table the codes index into.
    pub codebook: &'a Codebook,
}

impl<'a> TensorwiseMoment<'a> {
    /// Bundle codes, scale and codebook.
    #[must_use]
    pub fn new(codes: &'a mut [u8], max: &'a mut f32, codebook: &'a Codebook) -> Self {
        Self {
            codes,
            max,
            codebook,
        }
    }
}

/// Moments of a tensorwise update.
#[derive(Debug)]
pub struct TensorwiseMoments<'a> {
    /// First moment.
    pub state1: TensorwiseMoment<'a>,
    /// Second moment (Adam only).
    pub state2: Option<TensorwiseMoment<'a>>,
}

impl<'a> TensorwiseMoments<'a> {
    /// Moments for a single-state family.
    #[must_use]
    pub fn single(state1: TensorwiseMoment<'a>) -> Self {
        Self {
            state1,
            state2: None,
        }
    }

    /// Moments for a two-state family.
    #[must_use]
    pub fn pair(state1: TensorwiseMoment<'a>, state2: TensorwiseMoment<'a>) -> Self {
        Self {
            state1,
            state2: Some(state2),
        }
    }
}

#[derive(Clone, Copy)]
struct Tables<'a> {
    state1: &'a Codebook,
    state2: Option<&'a Codebook>,
    max1: f32,
    max2: f32,
}

impl Tables<'_> {
    #[inline]
    fn load(&self, s1: &[u8], s2: Option<&[u8]>, i: usize) -> (f32, f32) {
        let m = decode(self.state1, s1[i], self.max1);
        let v = match (s2, self.state2) {
            (Some(codes), Some(codebook)) => decode(codebook, codes[i], self.max2),
            _ => 0.0,
        };
        (m, v)
    }
}

/// Result of the read-only pass.
#[derive(Debug, Default, Clone, Copy)]
struct Scan {
    max1: f32,
    max2: f32,
    update_sq: f64,
    nonfinite: usize,
}

impl Scan {
    fn merge(self, other: Scan) -> Scan {
        Scan {
            max1: self.max1.max(other.max1),
            max2: self.max2.max(other.max2),
            update_sq: self.update_sq + other.update_sq,
            nonfinite: self.nonfinite + other.nonfinite,
        }
    }
}

#[inline]
fn decode(codebook: &Codebook, code: u8, max: f32) -> f32 {
    if max == 0.0 {
        0.0
    } else {
        codebook.decode(code) * max
    }
}

#[inline]
fn encode(codebook: &Codebook, value: f32, max: f32, dither: Option<f32>) -> u8 {
    if max == 0.0 {
        return 0;
    }
    codebook.encode((value / max).clamp(-1.0, 1.0), dither)
}

/// Apply one optimizer step with 8-bit moments that share one scale per
/// tensor.
///
/// The first moment draws dither from element `i` of the call and the second
/// from `n + i`. On success each moment's `max` holds the scale its codes were
/// written with.
///
/// # Errors
///
/// - [`OctetError::InvalidShape`] if `p` or any code buffer differs from
///   `g.len()`
/// - [`OctetError::InvalidArgument`] for bad hyperparameters or a negative or
///   non-finite stored maximum
/// - [`OctetError::UnsupportedConfig`] if `state2` does not match the family
///   or an unsigned codebook is given for a signed moment
///
/// No buffer is modified when one of these is returned.
pub fn update_8bit_tensorwise<T: Element>(
    ctx: &ExecutionContext,
    family: OptimizerFamily,
    g: &[T],
    p: &mut [T],
    moments: TensorwiseMoments<'_>,
    hp: &Hyperparams,
    rounding: Rounding<'_>,
) -> Result<StepReport> {
    hp.validate(family)?;
    let TensorwiseMoments { state1, state2 } = moments;
    check_state2(family, state2.is_some())?;
    let n = g.len();
    check_len("parameters", n, p.len())?;
    check_moment("state1", n, family.state1_signed(), &state1)?;
    if let Some(s2) = &state2 {
        check_moment("state2", n, family.state2_signed(), s2)?;
    }

    let c = hp.constants(family);
    let (max_unorm, param_norm) = (hp.max_unorm, hp.param_norm);
    let TensorwiseMoment {
        codes: codes1,
        max: max1,
        codebook: codebook1,
    } = state1;
    let (codes2, max2, codebook2) = match state2 {
        Some(TensorwiseMoment {
            codes,
            max,
            codebook,
        }) => (Some(codes), Some(max), Some(codebook)),
        None => (None, None, None),
    };
    let tables = Tables {
        state1: codebook1,
        state2: codebook2,
        max1: *max1,
        max2: max2.as_deref().copied().unwrap_or(0.0),
    };
    let chunks = split_tensorwise(UPDATE_CHUNK, g, p, codes1, codes2);
    let rounding2 = rounding.shifted(n);

    let (report, new_max1, new_max2) = ctx.launch("update_8bit_tensorwise", move || {
        trace!(
            n,
            family = %family,
            stochastic = rounding.is_stochastic(),
            "update_8bit_tensorwise"
        );
        let partials: Vec<Scan> = chunks
            .par_iter()
            .map(|ch| scan_chunk(&c, tables, ch))
            .collect();
        let scan = partials.into_iter().fold(Scan::default(), Scan::merge);

        let mut report = StepReport {
            nonfinite: scan.nonfinite,
            ..StepReport::default()
        };
        if max_unorm > 0.0 {
            let u = scan.update_sq.sqrt() as f32;
            report.update_norm = Some(u);
            report.unorm_scale = unorm_scale(u, max_unorm, param_norm);
            if report.unorm_scale < 1.0 {
                debug!(update_norm = u, scale = report.unorm_scale, "update norm capped");
            }
        }
        let scale = report.unorm_scale;
        chunks.into_par_iter().for_each(|ch| {
            apply_chunk(&c, tables, (scan.max1, scan.max2), ch, scale, &rounding, &rounding2);
        });
        Ok((report, scan.max1, scan.max2))
    })?;

    *max1 = new_max1;
    if let Some(max2) = max2 {
        *max2 = new_max2;
    }
    if report.nonfinite > 0 {
        warn!(
            count = report.nonfinite,
            "non-finite optimizer moments were quantized"
        );
    }
    Ok(report)
}

fn check_moment(
    what: &'static str,
    n: usize,
    signed: bool,
    moment: &TensorwiseMoment<'_>,
) -> Result<()> {
    check_len(what, n, moment.codes.len())?;
    let max = *moment.max;
    if !max.is_finite() || max < 0.0 {
        return Err(OctetError::InvalidArgument(format!(
            "{what} max must be finite and non-negative, got {max}"
        )));
    }
    if signed && !moment.codebook.signed() {
        return Err(OctetError::UnsupportedConfig(format!(
            "{what} is signed but its codebook is unsigned"
        )));
    }
    Ok(())
}

fn scan_chunk<T: Element>(c: &StepConstants, t: Tables<'_>, ch: &TensorChunk<'_, T>) -> Scan {
    let mut scan = Scan::default();
    for i in 0..ch.g.len() {
        let (m, v) = t.load(ch.s1, ch.s2.as_deref(), i);
        let a = advance(c, ch.g[i].to_f32(), ch.p[i].to_f32(), m, v);
        scan.max1 = scan.max1.max(a.s1.abs());
        scan.max2 = scan.max2.max(a.s2.abs());
        scan.update_sq += f64::from(a.update) * f64::from(a.update);
        scan.nonfinite += usize::from(!a.s1.is_finite()) + usize::from(!a.s2.is_finite());
    }
    scan
}

fn apply_chunk<T: Element>(
    c: &StepConstants,
    t: Tables<'_>,
    (new_max1, new_max2): (f32, f32),
    ch: TensorChunk<'_, T>,
    scale: f32,
    rounding1: &Rounding<'_>,
    rounding2: &Rounding<'_>,
) {
    let TensorChunk {
        index,
        g,
        p,
        s1,
        mut s2,
    } = ch;
    let base = index * UPDATE_CHUNK;
    for i in 0..g.len() {
        let (m, v) = t.load(s1, s2.as_deref(), i);
        let pv = p[i].to_f32();
        let a = advance(c, g[i].to_f32(), pv, m, v);
        s1[i] = encode(t.state1, a.s1, new_max1, rounding1.dither(base + i));
        if let (Some(codes), Some(codebook)) = (s2.as_deref_mut(), t.state2) {
            codes[i] = encode(codebook, a.s2, new_max2, rounding2.dither(base + i));
        }
        p[i] = T::from_f32(pv + a.update * scale);
    }
}
