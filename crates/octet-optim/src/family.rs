//! The per-element recurrences.
//!
//! ```text
//! g  = g * gnorm_scale
//! g' = g + weight_decay * p
//!
//! Momentum: s1 = beta1 * s1 + g'                      u = -lr * s1
//! Adam:     s1 = beta1 * s1 + (1 - beta1) * g'
//!           s2 = beta2 * s2 + (1 - beta2) * g'^2
//!           u  = -lr * (s1 / c1) / (sqrt(s2 / c2) + eps)
//! RMSprop:  s1 = beta1 * s1 + (1 - beta1) * g'^2      u = -lr * g' / (sqrt(s1) + eps)
//! Adagrad:  s1 = s1 + g'^2                            u = -lr * g' / (sqrt(s1) + eps)
//! ```
//!
//! With `skip_zeros`, an element whose gradient is exactly zero keeps its
//! moments and only receives the weight-decay step `-lr * weight_decay * p`.

use octet_core::OptimizerFamily;

use crate::StepConstants;

/// Moments of one element after a step, and the update to add to `p`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Advanced {
    /// New first moment.
    pub s1: f32,
    /// New second moment (unchanged for single-moment families).
    pub s2: f32,
    /// Unscaled parameter delta.
    pub update: f32,
}

/// Run one step of the recurrence for a single element.
#[inline(always)]
#[must_use]
pub fn advance(c: &StepConstants, g: f32, p: f32, s1: f32, s2: f32) -> Advanced {
    let g = g * c.gnorm_scale;
    if c.skip_zeros && g == 0.0 {
        return Advanced {
            s1,
            s2,
            update: -c.lr * c.weight_decay * p,
        };
    }
    let g = if c.weight_decay != 0.0 {
        g + c.weight_decay * p
    } else {
        g
    };

    match c.family {
        OptimizerFamily::Momentum => {
            let s1 = c.beta1 * s1 + g;
            Advanced {
                s1,
                s2,
                update: -c.lr * s1,
            }
        }
        OptimizerFamily::Adam => {
            let s1 = c.beta1 * s1 + (1.0 - c.beta1) * g;
            let s2 = c.beta2 * s2 + (1.0 - c.beta2) * g * g;
            let m_hat = s1 / c.correction1;
            let v_hat = s2 / c.correction2;
            Advanced {
                s1,
                s2,
                update: -c.lr * m_hat / (v_hat.sqrt() + c.eps),
            }
        }
        OptimizerFamily::RmsProp => {
            let s1 = c.beta1 * s1 + (1.0 - c.beta1) * g * g;
            Advanced {
                s1,
                s2,
                update: -c.lr * g / (s1.sqrt() + c.eps),
            }
        }
        OptimizerFamily::Adagrad => {
            let s1 = s1 + g * g;
            Advanced {
                s1,
                s2,
                update: -c.lr * g / (s1.sqrt() + c.eps),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Hyperparams;
    use approx::assert_relative_eq;

    fn constants(family: OptimizerFamily, hp: Hyperparams) -> StepConstants {
        hp.constants(family)
    }

    #[test]
    fn test_adam_first_step_is_sign_times_lr() {
        let c = constants(OptimizerFamily::Adam, Hyperparams::default());
        let a = advance(&c, 0.5, 1.0, 0.0, 0.0);
        assert_relative_eq!(a.s1, 0.05, epsilon = 1e-7);
        assert_relative_eq!(a.s2, 0.00025, epsilon = 1e-8);
        assert_relative_eq!(a.update, -1e-3, max_relative = 1e-4);
    }

    #[test]
    fn test_momentum() {
        let c = constants(
            OptimizerFamily::Momentum,
            Hyperparams {
                lr: 0.1,
                ..Hyperparams::default()
            },
        );
        let a = advance(&c, 2.0, 0.0, 1.0, 0.0);
        assert_relative_eq!(a.s1, 2.9, max_relative = 1e-6);
        assert_relative_eq!(a.update, -0.29, max_relative = 1e-6);
    }

    #[test]
    fn test_rmsprop_and_adagrad() {
        let hp = Hyperparams {
            beta1: 0.5,
            eps: 0.0,
            lr: 1.0,
            ..Hyperparams::default()
        };
        let r = advance(&constants(OptimizerFamily::RmsProp, hp), 2.0, 0.0, 4.0, 0.0);
        assert_relative_eq!(r.s1, 4.0);
        assert_relative_eq!(r.update, -1.0);

        let a = advance(&constants(OptimizerFamily::Adagrad, hp), 3.0, 0.0, 16.0, 0.0);
        assert_relative_eq!(a.s1, 25.0);
        assert_relative_eq!(a.update, -0.6);
    }

    #[test]
    fn test_weight_decay_is_folded_into_gradient() {
        let hp = Hyperparams {
            weight_decay: 0.1,
            lr: 1.0,
            beta1: 0.0,
            ..Hyperparams::default()
        };
        let a = advance(&constants(OptimizerFamily::Momentum, hp), 1.0, 10.0, 0.0, 0.0);
        assert_relative_eq!(a.s1, 2.0);
    }

    #[test]
    fn test_skip_zeros() {
        let hp = Hyperparams {
            weight_decay: 0.01,
            lr: 0.5,
            skip_zeros: true,
            ..Hyperparams::default()
        };
        let c = constants(OptimizerFamily::Adam, hp);
        let a = advance(&c, 0.0, 2.0, 0.3, 0.04);
        assert_eq!(a.s1, 0.3);
        assert_eq!(a.s2, 0.04);
        assert_relative_eq!(a.update, -0.01);

        let c = constants(
            OptimizerFamily::Adam,
            Hyperparams {
                skip_zeros: false,
                weight_decay: 0.0,
                ..hp
            },
        );
        let a = advance(&c, 0.0, 2.0, 0.3, 0.04);
        assert!(a.s1 < 0.3);
        assert!(a.s2 < 0.04);
    }

    #[test]
    fn test_gnorm_scale_applies_before_recurrence() {
        let hp = Hyperparams {
            gnorm_scale: 0.5,
            lr: 1.0,
            beta1: 0.0,
            ..Hyperparams::default()
        };
        let a = advance(&constants(OptimizerFamily::Momentum, hp), 4.0, 0.0, 0.0, 0.0);
        assert_relative_eq!(a.s1, 2.0);
    }
}
