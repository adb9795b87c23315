//! CLI command implementations
//!
//! This module re-exports all CLI command functions.

pub mod config_management;
mod invalidate;
mod output;
mod refresh;
mod resolve;
mod validate;

pub use invalidate::*;
pub use refresh::*;
pub use resolve::*;
pub use validate::*;
