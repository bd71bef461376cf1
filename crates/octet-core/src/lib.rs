//! Core types, configuration and execution infrastructure for octet.
//!
//! This crate provides the foundations shared by the quantization codecs and
//! the optimizer kernels:
//!
//! - The error taxonomy ([`OctetError`]) and [`Result`] alias
//! - Element precisions ([`Element`] for `f32`, `f16`, `bf16`) and [`BlockSize`]
//! - Serde-backed optimizer and codec configuration
//! - The data-parallel [`ExecutionContext`] every kernel is launched through

#![warn(missing_docs)]

mod config;
pub mod context;
mod error;
mod types;

pub use config::*;
pub use context::ExecutionContext;
pub use error::*;
pub use types::*;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::*;
    pub use crate::context::ExecutionContext;
    pub use crate::error::{OctetError, Result};
    pub use crate::types::*;
}
