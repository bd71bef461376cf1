//! Empirical quantile codebooks.

use octet_core::{Element, ExecutionContext, OctetError, Result};
use rayon::prelude::*;
use tracing::debug;

use crate::{all_finite, Codebook, CODEBOOK_LEN};

/// Default trim from each tail of the distribution (`1/512`).
pub const DEFAULT_QUANTILE_OFFSET: f32 = 1.0 / 512.0;

/// Largest number of elements sorted when estimating quantiles.
pub const MAX_QUANTILE_SAMPLE: usize = 1 << 20;

/// Estimate 256 equidistant quantiles of `values`.
///
/// The quantiles sit at `linspace(offset, 1 - offset, 256)` of the empirical
/// CDF, computed over an evenly strided sample of at most
/// [`MAX_QUANTILE_SAMPLE`] elements (linear interpolation between order
/// statistics). With `normalize` the result is divided by its largest
/// magnitude so it lies in `[-1, 1]`.
///
/// # Errors
///
/// Returns [`OctetError::InvalidArgument`] for empty or non-finite input, or
/// an offset outside `[0, 0.5)`.
pub fn estimate_quantiles<T: Element>(
    values: &[T],
    offset: f32,
    normalize: bool,
) -> Result<Codebook> {
    if values.is_empty() {
        return Err(OctetError::InvalidArgument(
            "cannot estimate quantiles of an empty tensor".into(),
        ));
    }
    if !(0.0..0.5).contains(&offset) {
        return Err(OctetError::InvalidArgument(format!(
            "quantile offset must be in [0, 0.5), got {offset}"
        )));
    }

    let ctx = ExecutionContext::global()?;
    let stride = values.len().div_ceil(MAX_QUANTILE_SAMPLE);
    let mut sample: Vec<f32> = ctx.launch("estimate_quantiles", || {
        if !all_finite(values) {
            return Err(OctetError::InvalidArgument(
                "cannot estimate quantiles of non-finite values".into(),
            ));
        }
        Ok(values
            .par_iter()
            .step_by(stride)
            .map(|v| v.to_f32())
            .collect())
    })?;
    sample.par_sort_unstable_by(f32::total_cmp);
    debug!(
        n = values.len(),
        sample = sample.len(),
        offset,
        "estimating quantiles"
    );

    let last = (sample.len() - 1) as f64;
    let span = 1.0 - 2.0 * f64::from(offset);
    let mut quantiles: Vec<f32> = (0..CODEBOOK_LEN)
        .map(|k| {
            let q = f64::from(offset) + span * k as f64 / (CODEBOOK_LEN - 1) as f64;
            let pos = q * last;
            let lo = pos.floor() as usize;
            let hi = (lo + 1).min(sample.len() - 1);
            let frac = pos - lo as f64;
            let a = f64::from(sample[lo]);
            let b = f64::from(sample[hi]);
            (a + (b - a) * frac) as f32
        })
        .collect();

    if normalize {
        let scale = quantiles.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        if scale > 0.0 {
            for q in &mut quantiles {
                *q /= scale;
            }
        }
    }
    Codebook::from_values(quantiles)
}
