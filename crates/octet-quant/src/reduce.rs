//! Deterministic parallel reductions.
//!
//! Partials are computed per fixed-size chunk, collected in chunk order and
//! combined sequentially, so the result does not depend on how rayon
//! schedules the chunks.

use octet_core::Element;
use rayon::prelude::*;

/// Elements per reduction chunk.
pub const REDUCE_CHUNK: usize = 1 << 14;

/// Largest absolute value in a slice (serial).
#[inline]
pub fn block_max_abs<T: Element>(values: &[T]) -> f32 {
    values.iter().fold(0.0f32, |m, v| m.max(v.to_f32().abs()))
}

/// Largest absolute value (0 for an empty slice).
pub fn max_abs<T: Element>(values: &[T]) -> f32 {
    let partials: Vec<f32> = values.par_chunks(REDUCE_CHUNK).map(block_max_abs).collect();
    partials.into_iter().fold(0.0f32, f32::max)
}

/// Sum of squares accumulated in `f64`.
pub fn sum_squares<T: Element>(values: &[T]) -> f64 {
    let partials: Vec<f64> = values
        .par_chunks(REDUCE_CHUNK)
        .map(|chunk| {
            chunk
                .iter()
                .map(|v| {
                    let x = f64::from(v.to_f32());
                    x * x
                })
                .sum::<f64>()
        })
        .collect();
    partials.into_iter().sum()
}

/// Euclidean norm.
pub fn l2_norm<T: Element>(values: &[T]) -> f32 {
    sum_squares(values).sqrt() as f32
}

/// Whether every element is finite.
pub fn all_finite<T: Element>(values: &[T]) -> bool {
    values.par_iter().all(|v| v.to_f32().is_finite())
}
