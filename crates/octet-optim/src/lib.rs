//! Optimizer kernels over full-precision and blockwise 8-bit state.
//!
//! This crate provides:
//!
//! - [`update_32bit`]: the reference recurrences for Momentum, Adam, RMSprop
//!   and Adagrad over `f32` moments
//! - [`update_8bit_blockwise`]: the same recurrences over quantized moments,
//!   decoding, updating and requantizing one block at a time
//! - [`update_8bit_tensorwise`]: 8-bit moments with one scale per tensor,
//!   rescaled to the new maximum on every step
//! - [`GradientNormHistory`]: percentile-based gradient clipping
//! - [`BlockwiseOptimizer`]: an owner of per-parameter state that drives the
//!   kernels step by step
//!
//! # Memory Savings
//!
//! Adam with `f32` state keeps 8 bytes of moments per parameter. With 8-bit
//! blockwise state it keeps 2 bytes plus one `f32` absmax per block and
//! moment (block size 2048 adds about 0.004 bytes per parameter).
//!
//! # Example
//!
//! ```ignore
//! use octet_optim::BlockwiseOptimizerBuilder;
//! use octet_core::OptimizerFamily;
//!
//! let mut optimizer = BlockwiseOptimizerBuilder::new(OptimizerFamily::Adam)
//!     .with_lr(1e-3)
//!     .with_percentile_clipping(100, 95.0)
//!     .build()?;
//!
//! optimizer.step();
//! optimizer.update("layer.weight", &grad, &mut weight)?;
//! ```

#![warn(missing_docs)]

mod chunks;
pub mod clipping;
pub mod family;
pub mod fused;
pub mod hyper;
pub mod optimizer;
pub mod tensorwise;
pub mod update32;

pub use clipping::*;
pub use fused::*;
pub use hyper::*;
pub use optimizer::*;
pub use tensorwise::*;
pub use update32::*;
