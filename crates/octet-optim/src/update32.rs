//! Full-precision optimizer update.

use octet_core::{Element, ExecutionContext, OptimizerFamily, Result};
use rayon::prelude::*;
use tracing::debug;

use crate::chunks::{check_len, check_state2, split_full, unorm_scale, FullChunk};
use crate::family::advance;
use crate::{Hyperparams, StepConstants};

/// Elements per work item of the full-precision update.
pub const UPDATE_CHUNK: usize = 2048;

/// Outcome of one kernel call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    /// Norm of the unclipped update, when update-norm clipping is enabled.
    pub update_norm: Option<f32>,
    /// Factor applied to the update (1 unless the norm was capped).
    pub unorm_scale: f32,
    /// Quantized moments that came out NaN or infinite and were coded
    /// anyway. Always zero for the full-precision engine.
    pub nonfinite: usize,
}

impl Default for StepReport {
    fn default() -> Self {
        Self {
            update_norm: None,
            unorm_scale: 1.0,
            nonfinite: 0,
        }
    }
}

/// Apply one optimizer step with `f32` moments.
///
/// `p`, `state1` and (for Adam) `state2` are updated in place. With
/// `hp.max_unorm > 0` a read-only pass first measures the update norm and the
/// whole update is scaled down if it exceeds `max_unorm * param_norm`.
///
/// # Errors
///
/// - [`octet_core::OctetError::InvalidShape`] if any buffer length differs
///   from `g.len()`
/// - [`octet_core::OctetError::InvalidArgument`] for bad hyperparameters
/// - [`octet_core::OctetError::UnsupportedConfig`] if `state2` is given for a
///   single-moment family or missing for Adam
///
/// No buffer is modified when one of these is returned.
pub fn update_32bit<T: Element>(
    ctx: &ExecutionContext,
    family: OptimizerFamily,
    g: &[T],
    p: &mut [T],
    state1: &mut [f32],
    state2: Option<&mut [f32]>,
    hp: &Hyperparams,
) -> Result<StepReport> {
    hp.validate(family)?;
    check_state2(family, state2.is_some())?;
    let n = g.len();
    check_len("parameters", n, p.len())?;
    check_len("state1", n, state1.len())?;
    if let Some(s2) = &state2 {
        check_len("state2", n, s2.len())?;
    }

    let c = hp.constants(family);
    let (max_unorm, param_norm) = (hp.max_unorm, hp.param_norm);
    let chunks = split_full(UPDATE_CHUNK, g, p, state1, state2);

    ctx.launch("update_32bit", move || {
        let mut report = StepReport::default();
        if max_unorm > 0.0 {
            let partials: Vec<f64> = chunks.par_iter().map(|ch| chunk_update_sq(&c, ch)).collect();
            let u = partials.into_iter().sum::<f64>().sqrt() as f32;
            report.update_norm = Some(u);
            report.unorm_scale = unorm_scale(u, max_unorm, param_norm);
            if report.unorm_scale < 1.0 {
                debug!(update_norm = u, scale = report.unorm_scale, "update norm capped");
            }
        }
        let scale = report.unorm_scale;
        chunks
            .into_par_iter()
            .for_each(|ch| apply_chunk(&c, ch, scale));
        Ok(report)
    })
}

fn chunk_update_sq<T: Element>(c: &StepConstants, ch: &FullChunk<'_, T>) -> f64 {
    let mut acc = 0.0f64;
    for i in 0..ch.g.len() {
        let s2 = ch.s2.as_ref().map_or(0.0, |s| s[i]);
        let a = advance(c, ch.g[i].to_f32(), ch.p[i].to_f32(), ch.s1[i], s2);
        acc += f64::from(a.update) * f64::from(a.update);
    }
    acc
}

fn apply_chunk<T: Element>(c: &StepConstants, ch: FullChunk<'_, T>, scale: f32) {
    let FullChunk { g, p, s1, mut s2 } = ch;
    for i in 0..g.len() {
        let pv = p[i].to_f32();
        let old2 = s2.as_ref().map_or(0.0, |s| s[i]);
        let a = advance(c, g[i].to_f32(), pv, s1[i], old2);
        s1[i] = a.s1;
        if let Some(s) = s2.as_mut() {
            s[i] = a.s2;
        }
        p[i] = T::from_f32(pv + a.update * scale);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use octet_core::OctetError;

    fn ctx() -> std::sync::Arc<ExecutionContext> {
        ExecutionContext::global().unwrap()
    }

    #[test]
    fn test_adam_step() {
        let g = vec![0.5f32; 4096 + 3];
        let mut p = vec![1.0f32; g.len()];
        let mut m = vec![0.0f32; g.len()];
        let mut v = vec![0.0f32; g.len()];
        let report = update_32bit(
            &ctx(),
            OptimizerFamily::Adam,
            &g,
            &mut p,
            &mut m,
            Some(&mut v[..]),
            &Hyperparams::default(),
        )
        .unwrap();
        assert_eq!(report.update_norm, None);
        for &x in &p {
            assert_relative_eq!(x, 0.999, max_relative = 1e-5);
        }
        assert!(m.iter().all(|&x| (x - 0.05).abs() < 1e-6));
    }

    #[test]
    fn test_state2_must_match_family() {
        let g = [1.0f32; 4];
        let mut p = [0.0f32; 4];
        let mut s1 = [0.0f32; 4];
        let mut s2 = [0.0f32; 4];
        let err = update_32bit(
            &ctx(),
            OptimizerFamily::Momentum,
            &g,
            &mut p,
            &mut s1,
            Some(&mut s2[..]),
            &Hyperparams::default(),
        )
        .unwrap_err();
        assert!(matches!(err, OctetError::UnsupportedConfig(_)));

        let err = update_32bit(
            &ctx(),
            OptimizerFamily::Adam,
            &g,
            &mut p,
            &mut s1,
            None,
            &Hyperparams::default(),
        )
        .unwrap_err();
        assert!(matches!(err, OctetError::UnsupportedConfig(_)));
    }

    #[test]
    fn test_rejects_before_writing() {
        let g = [1.0f32; 4];
        let mut p = [3.0f32; 4];
        let mut s1 = [0.0f32; 3];
        let err = update_32bit(
            &ctx(),
            OptimizerFamily::Adagrad,
            &g,
            &mut p,
            &mut s1,
            None,
            &Hyperparams::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            OctetError::InvalidShape {
                what: "state1",
                expected: 4,
                actual: 3
            }
        ));
        assert_eq!(p, [3.0; 4]);

        let mut s1 = [0.0f32; 4];
        let hp = Hyperparams {
            step: 0,
            ..Hyperparams::default()
        };
        let err =
            update_32bit(&ctx(), OptimizerFamily::Adagrad, &g, &mut p, &mut s1, None, &hp).unwrap_err();
        assert!(err.is_rejected_call());
        assert_eq!(p, [3.0; 4]);
    }

    #[test]
    fn test_max_unorm_caps_update() {
        let n = 5000;
        let g = vec![1.0f32; n];
        let mut p = vec![1.0f32; n];
        let mut s1 = vec![0.0f32; n];
        let param_norm = (n as f32).sqrt();
        let hp = Hyperparams {
            lr: 0.1,
            beta1: 0.0,
            max_unorm: 0.01,
            param_norm,
            ..Hyperparams::default()
        };
        let report =
            update_32bit(&ctx(), OptimizerFamily::Momentum, &g, &mut p, &mut s1, None, &hp).unwrap();
        // unclipped update is -0.1 everywhere, norm 0.1 * sqrt(n)
        let u = report.update_norm.unwrap();
        assert_relative_eq!(u, 0.1 * param_norm, max_relative = 1e-5);
        assert_relative_eq!(report.unorm_scale, 0.1, max_relative = 1e-5);
        for &x in &p {
            assert_relative_eq!(x, 0.99, max_relative = 1e-5);
        }
        // state is advanced with the unscaled recurrence
        assert!(s1.iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_half_precision_params() {
        use half::f16;
        let g: Vec<f16> = vec![f16::from_f32(0.25); 8];
        let mut p: Vec<f16> = vec![f16::from_f32(1.0); 8];
        let mut s1 = vec![0.0f32; 8];
        let hp = Hyperparams {
            lr: 0.5,
            ..Hyperparams::default()
        };
        update_32bit(&ctx(), OptimizerFamily::Momentum, &g, &mut p, &mut s1, None, &hp).unwrap();
        assert!(p.iter().all(|x| x.to_f32() == 0.875));
    }
}
