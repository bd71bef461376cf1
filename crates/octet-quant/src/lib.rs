//! Blockwise 8-bit quantization for octet.
//!
//! Two codecs share the same block layout (one `f32` absmax per block, one
//! byte per element):
//!
//! - **Static**: nearest entry of a caller-supplied 256-value [`Codebook`]
//! - **Dynamic**: a compiled-in sign/exponent/fraction byte mapping
//!   ([`DynamicCodec`]) that needs no table beyond the absmax
//!
//! Both support nearest and stochastic [`Rounding`]; the stochastic mode draws
//! from a seeded [`RandomStream`] so that repeated calls with the same offset
//! make the same decisions.
//!
//! # Example
//!
//! ```ignore
//! use octet_quant::{quantize_dynamic, dequantize_dynamic, Rounding};
//! use octet_core::BlockSize;
//!
//! let x = [0.0f32, 1.0, -1.0, 0.5];
//! let q = quantize_dynamic(&x, BlockSize::new(4)?, true, Rounding::Nearest)?;
//! let y: Vec<f32> = dequantize_dynamic(&q.codes, &q.absmax, q.block_size, true)?;
//! ```

#![warn(missing_docs)]

pub mod blockwise;
pub mod buffer;
pub mod codebook;
pub mod codec;
pub mod dither;
pub mod dynamic;
pub mod quantiles;
pub mod reduce;

pub use blockwise::*;
pub use buffer::*;
pub use codebook::*;
pub use codec::*;
pub use dither::*;
pub use dynamic::*;
pub use quantiles::*;
pub use reduce::*;
