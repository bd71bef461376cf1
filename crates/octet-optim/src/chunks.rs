//! Disjoint per-block work items.
//!
//! Buffers are split sequentially into blocks before any parallel work is
//! launched, so each worker owns its block's slices outright.

use octet_core::{BlockSize, OctetError, OptimizerFamily, Result};
use octet_quant::QuantizedViewMut;

/// One block of a full-precision update.
pub(crate) struct FullChunk<'a, T> {
    pub g: &'a [T],
    pub p: &'a mut [T],
    pub s1: &'a mut [f32],
    pub s2: Option<&'a mut [f32]>,
}

pub(crate) fn split_full<'a, T>(
    chunk: usize,
    g: &'a [T],
    p: &'a mut [T],
    s1: &'a mut [f32],
    s2: Option<&'a mut [f32]>,
) -> Vec<FullChunk<'a, T>> {
    let mut s2_chunks = s2.map(|s| s.chunks_mut(chunk));
    g.chunks(chunk)
        .zip(p.chunks_mut(chunk))
        .zip(s1.chunks_mut(chunk))
        .map(|((g, p), s1)| FullChunk {
            g,
            p,
            s1,
            s2: s2_chunks.as_mut().and_then(Iterator::next),
        })
        .collect()
}

/// One block of a quantized moment.
pub(crate) struct QuantBlock<'a> {
    pub codes: &'a mut [u8],
    pub absmax: &'a mut f32,
}

/// One block of a fused 8-bit update.
pub(crate) struct QuantChunk<'a, T> {
    pub index: usize,
    pub g: &'a [T],
    pub p: &'a mut [T],
    pub s1: QuantBlock<'a>,
    pub s2: Option<QuantBlock<'a>>,
}

pub(crate) fn split_quantized<'a, T>(
    block_size: BlockSize,
    g: &'a [T],
    p: &'a mut [T],
    s1: QuantizedViewMut<'a>,
    s2: Option<QuantizedViewMut<'a>>,
) -> Vec<QuantChunk<'a, T>> {
    let bs = block_size.get();
    let mut s2_blocks = s2.map(|QuantizedViewMut { codes, absmax, .. }| {
        codes.chunks_mut(bs).zip(absmax.iter_mut())
    });
    let QuantizedViewMut { codes, absmax, .. } = s1;
    g.chunks(bs)
        .zip(p.chunks_mut(bs))
        .zip(codes.chunks_mut(bs).zip(absmax.iter_mut()))
        .enumerate()
        .map(|(index, ((g, p), (codes, absmax)))| QuantChunk {
            index,
            g,
            p,
            s1: QuantBlock { codes, absmax },
            s2: s2_blocks
                .as_mut()
                .and_then(Iterator::next)
                .map(|(codes, absmax)| QuantBlock { codes, absmax }),
        })
        .collect()
}

/// One chunk of a tensorwise 8-bit update.
pub(crate) struct TensorChunk<'a, T> {
    pub index: usize,
    pub g: &'a [T],
    pub p: &'a mut [T],
    pub s1: &'a mut [u8],
    pub s2: Option<&'a mut [u8]>,
}

pub(crate) fn split_tensorwise<'a, T>(
    chunk: usize,
    g: &'a [T],
    p: &'a mut [T],
    s1: &'a mut [u8],
    s2: Option<&'a mut [u8]>,
) -> Vec<TensorChunk<'a, T>> {
    let mut s2_chunks = s2.map(|s| s.chunks_mut(chunk));
    g.chunks(chunk)
        .zip(p.chunks_mut(chunk))
        .zip(s1.chunks_mut(chunk))
        .enumerate()
        .map(|(index, ((g, p), s1))| TensorChunk {
            index,
            g,
            p,
            s1,
            s2: s2_chunks.as_mut().and_then(Iterator::next),
        })
        .collect()
}

/// Reject a second state buffer that does not match the family.
pub(crate) fn check_state2(family: OptimizerFamily, present: bool) -> Result<()> {
    match (family.needs_state2(), present) {
        (true, false) => Err(OctetError::UnsupportedConfig(format!(
            "{family} requires a second state buffer"
        ))),
        (false, true) => Err(OctetError::UnsupportedConfig(format!(
            "{family} does not use a second state buffer"
        ))),
        _ => Ok(()),
    }
}

/// Check that a buffer has one element per parameter.
pub(crate) fn check_len(what: &'static str, n: usize, actual: usize) -> Result<()> {
    if actual != n {
        return Err(OctetError::shape(what, n, actual));
    }
    Ok(())
}

/// Scale that caps an update of norm `u` at `max_unorm * param_norm`.
pub(crate) fn unorm_scale(update_norm: f32, max_unorm: f32, param_norm: f32) -> f32 {
    let limit = max_unorm * param_norm;
    if update_norm > limit {
        limit / update_norm
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_full_covers_tail() {
        let g = [1.0f32; 5];
        let mut p = [0.0f32; 5];
        let mut s1 = [0.0f32; 5];
        let mut s2 = [0.0f32; 5];
        let chunks = split_full(2, &g, &mut p, &mut s1, Some(&mut s2[..]));
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].g.len(), 1);
        assert!(chunks.iter().all(|c| c.s2.is_some()));
    }

    #[test]
    fn test_check_state2() {
        assert!(check_state2(OptimizerFamily::Adam, true).is_ok());
        assert!(matches!(
            check_state2(OptimizerFamily::Adam, false),
            Err(OctetError::UnsupportedConfig(_))
        ));
        assert!(check_state2(OptimizerFamily::Adagrad, true).is_err());
        assert!(check_state2(OptimizerFamily::RmsProp, false).is_ok());
    }

    #[test]
    fn test_unorm_scale() {
        assert_eq!(unorm_scale(1.0, 0.5, 4.0), 1.0);
        assert_eq!(unorm_scale(4.0, 0.5, 4.0), 0.5);
    }
}
