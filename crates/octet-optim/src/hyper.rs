//! Per-call optimizer hyperparameters.

use octet_core::{OctetError, OptimizerConfig, OptimizerFamily, Result};

/// Scalar inputs to one optimizer kernel call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hyperparams {
    /// First moment decay.
    pub beta1: f32,
    /// Second moment decay (Adam only).
    pub beta2: f32,
    /// Denominator epsilon.
    pub eps: f32,
    /// L2 weight decay, folded into the gradient.
    pub weight_decay: f32,
    /// 1-based optimizer step, used for bias correction.
    pub step: u32,
    /// Learning rate.
    pub lr: f32,
    /// Gradient multiplier, typically from percentile clipping.
    pub gnorm_scale: f32,
    /// Update-norm cap relative to `param_norm`; zero disables it.
    pub max_unorm: f32,
    /// Norm of the parameter tensor before the update.
    pub param_norm: f32,
    /// Leave state untouched where the gradient is exactly zero.
    pub skip_zeros: bool,
}

impl Default for Hyperparams {
    fn default() -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
            step: 1,
            lr: 1e-3,
            gnorm_scale: 1.0,
            max_unorm: 0.0,
            param_norm: 0.0,
            skip_zeros: false,
        }
    }
}

impl Hyperparams {
    /// Hyperparameters for `step` taken from a configuration.
    #[must_use]
    pub fn from_config(config: &OptimizerConfig, step: u32) -> Self {
        Self {
            beta1: config.beta1,
            beta2: config.beta2,
            eps: config.eps,
            weight_decay: config.weight_decay,
            step,
            lr: config.lr,
            gnorm_scale: 1.0,
            max_unorm: config.max_unorm,
            param_norm: 0.0,
            skip_zeros: config.skip_zeros,
        }
    }

    /// Check ranges for `family`.
    ///
    /// # Errors
    ///
    /// Returns [`OctetError::InvalidArgument`] for step 0, non-finite scalars,
    /// betas outside `[0, 1]`, or an Adam bias correction of zero.
    pub fn validate(&self, family: OptimizerFamily) -> Result<()> {
        if self.step == 0 {
            return Err(OctetError::InvalidArgument("step must be >= 1".into()));
        }
        let finite = [
            ("lr", self.lr),
            ("eps", self.eps),
            ("gnorm_scale", self.gnorm_scale),
            ("weight_decay", self.weight_decay),
            ("max_unorm", self.max_unorm),
            ("param_norm", self.param_norm),
        ];
        for (name, value) in finite {
            if !value.is_finite() {
                return Err(OctetError::InvalidArgument(format!(
                    "{name} must be finite, got {value}"
                )));
            }
        }
        for (name, beta) in [("beta1", self.beta1), ("beta2", self.beta2)] {
            if !(0.0..=1.0).contains(&beta) {
                return Err(OctetError::InvalidArgument(format!(
                    "{name} must be in [0, 1], got {beta}"
                )));
            }
        }
        if self.max_unorm < 0.0 {
            return Err(OctetError::InvalidArgument(format!(
                "max_unorm must be >= 0, got {}",
                self.max_unorm
            )));
        }
        if family == OptimizerFamily::Adam {
            let c = self.constants(family);
            if c.correction1 == 0.0 || c.correction2 == 0.0 {
                return Err(OctetError::InvalidArgument(
                    "Adam bias correction is zero; betas must be < 1".into(),
                ));
            }
        }
        Ok(())
    }

    /// Constants shared by every element of the call.
    #[must_use]
    pub fn constants(&self, family: OptimizerFamily) -> StepConstants {
        let t = i32::try_from(self.step).unwrap_or(i32::MAX);
        StepConstants {
            family,
            beta1: self.beta1,
            beta2: self.beta2,
            eps: self.eps,
            weight_decay: self.weight_decay,
            lr: self.lr,
            gnorm_scale: self.gnorm_scale,
            skip_zeros: self.skip_zeros,
            correction1: (1.0 - f64::from(self.beta1).powi(t)) as f32,
            correction2: (1.0 - f64::from(self.beta2).powi(t)) as f32,
        }
    }
}

/// Precomputed per-call constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepConstants {
    /// Recurrence to run.
    pub family: OptimizerFamily,
    /// First moment decay.
    pub beta1: f32,
    /// Second moment decay.
    pub beta2: f32,
    /// Denominator epsilon.
    pub eps: f32,
    /// L2 weight decay.
    pub weight_decay: f32,
    /// Learning rate.
    pub lr: f32,
    /// Gradient multiplier.
    pub gnorm_scale: f32,
    /// Skip exact-zero gradients.
    pub skip_zeros: bool,
    /// `1 - beta1^step`.
    pub correction1: f32,
    /// `1 - beta2^step`.
    pub correction2: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation() {
        let hp = Hyperparams::default();
        assert!(hp.validate(OptimizerFamily::Adam).is_ok());

        let bad = Hyperparams { step: 0, ..hp };
        assert!(matches!(
            bad.validate(OptimizerFamily::Adam),
            Err(OctetError::InvalidArgument(_))
        ));

        let bad = Hyperparams { lr: f32::NAN, ..hp };
        assert!(bad.validate(OptimizerFamily::Momentum).is_err());

        let bad = Hyperparams { beta1: 1.2, ..hp };
        assert!(bad.validate(OptimizerFamily::RmsProp).is_err());

        let unit = Hyperparams { beta1: 1.0, ..hp };
        assert!(unit.validate(OptimizerFamily::Adam).is_err());
        assert!(unit.validate(OptimizerFamily::Momentum).is_ok());
    }

    #[test]
    fn test_bias_correction() {
        let hp = Hyperparams {
            step: 2,
            ..Hyperparams::default()
        };
        let c = hp.constants(OptimizerFamily::Adam);
        assert!((c.correction1 - 0.19).abs() < 1e-6);
        assert!((c.correction2 - 0.001999).abs() < 1e-7);
    }

    #[test]
    fn test_from_config() {
        let mut config = OptimizerConfig::for_family(OptimizerFamily::RmsProp);
        config.skip_zeros = true;
        let hp = Hyperparams::from_config(&config, 7);
        assert_eq!(hp.step, 7);
        assert_eq!(hp.beta1, 0.99);
        assert!(hp.skip_zeros);
        assert_eq!(hp.gnorm_scale, 1.0);
    }
}
