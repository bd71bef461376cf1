//! Percentile gradient clipping.
//!
//! The tracker keeps the gradient norms of the last `capacity` steps. Once the
//! history is full, each new norm is compared against the chosen percentile of
//! the history and the gradient is scaled down to that threshold if it is
//! larger.

use octet_core::{Element, ExecutionContext, OctetError, PercentileClipConfig, Result};
use octet_quant::l2_norm;
use tracing::debug;

/// Gradient norms kept by default.
pub const DEFAULT_CAPACITY: usize = 100;

/// Default clipping percentile.
pub const DEFAULT_PERCENTILE: f32 = 95.0;

/// Result of observing one step's gradient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipReport {
    /// L2 norm of the gradient.
    pub norm: f32,
    /// Percentile of the history, once the history is full.
    pub threshold: Option<f32>,
    /// Factor to multiply the gradient by (`gnorm_scale`).
    pub scale: f32,
}

/// Rolling history of gradient norms.
#[derive(Debug, Clone)]
pub struct GradientNormHistory {
    norms: Vec<f32>,
    percentile: f32,
    observed: u64,
}

impl Default for GradientNormHistory {
    fn default() -> Self {
        Self {
            norms: vec![0.0; DEFAULT_CAPACITY],
            percentile: DEFAULT_PERCENTILE,
            observed: 0,
        }
    }
}

impl GradientNormHistory {
    /// Create a tracker with `capacity` slots clipping at `percentile`.
    ///
    /// # Errors
    ///
    /// Returns [`OctetError::InvalidArgument`] if `capacity` is zero or
    /// `percentile` is outside `(0, 100]`.
    pub fn new(capacity: usize, percentile: f32) -> Result<Self> {
        if capacity == 0 {
            return Err(OctetError::InvalidArgument(
                "clipping history must hold at least one norm".into(),
            ));
        }
        if !(percentile > 0.0 && percentile <= 100.0) {
            return Err(OctetError::InvalidArgument(format!(
                "clipping percentile must be in (0, 100], got {percentile}"
            )));
        }
        Ok(Self {
            norms: vec![0.0; capacity],
            percentile,
            observed: 0,
        })
    }

    /// Create a tracker from configuration.
    ///
    /// # Errors
    ///
    /// See [`GradientNormHistory::new`].
    pub fn from_config(config: &PercentileClipConfig) -> Result<Self> {
        Self::new(config.history, config.percentile)
    }

    /// Compute the norm of `grad` and record it for `step`.
    ///
    /// # Errors
    ///
    /// Returns [`OctetError::InvalidArgument`] if the gradient is not finite,
    /// or [`OctetError::ExecutionFault`] if the reduction fails.
    pub fn observe<T: Element>(
        &mut self,
        ctx: &ExecutionContext,
        grad: &[T],
        step: u64,
    ) -> Result<ClipReport> {
        let norm = ctx.launch("gradient_norm", || Ok(l2_norm(grad)))?;
        self.observe_norm(norm, step)
    }

    /// Record a precomputed norm for `step`.
    ///
    /// Used when several tensors share one global norm.
    ///
    /// # Errors
    ///
    /// Returns [`OctetError::InvalidArgument`] for a negative or non-finite
    /// norm. The history is unchanged in that case.
    pub fn observe_norm(&mut self, norm: f32, step: u64) -> Result<ClipReport> {
        if !norm.is_finite() || norm < 0.0 {
            return Err(OctetError::InvalidArgument(format!(
                "gradient norm must be finite and non-negative, got {norm}"
            )));
        }
        let k = self.norms.len();
        self.norms[(step % k as u64) as usize] = norm;
        self.observed += 1;

        let threshold = self.threshold();
        let scale = match threshold {
            Some(t) if norm > 0.0 => (t / norm).min(1.0),
            _ => 1.0,
        };
        if scale < 1.0 {
            debug!(step, norm, threshold = ?threshold, scale, "gradient clipped");
        }
        Ok(ClipReport {
            norm,
            threshold,
            scale,
        })
    }

    /// Current percentile of the history, or `None` until it is full.
    #[must_use]
    pub fn threshold(&self) -> Option<f32> {
        if !self.is_full() {
            return None;
        }
        let mut sorted = self.norms.clone();
        sorted.sort_unstable_by(f32::total_cmp);
        let k = sorted.len();
        let rank = (self.percentile / 100.0 * k as f32).ceil() as usize;
        Some(sorted[rank.clamp(1, k) - 1])
    }

    /// Whether enough norms have been observed to clip.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.observed >= self.norms.len() as u64
    }

    /// Number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.norms.len()
    }

    /// Number of norms observed since creation or the last reset.
    #[must_use]
    pub fn observed(&self) -> u64 {
        self.observed
    }

    /// Clipping percentile.
    #[must_use]
    pub fn percentile(&self) -> f32 {
        self.percentile
    }

    /// Raw history slots, indexed by `step % capacity`.
    #[must_use]
    pub fn history(&self) -> &[f32] {
        &self.norms
    }

    /// Forget every observation.
    pub fn reset(&mut self) {
        self.norms.fill(0.0);
        self.observed = 0;
    }
}
