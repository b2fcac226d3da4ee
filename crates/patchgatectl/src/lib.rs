//! Patchgate Control - operator CLI for the patch safety engine
//!
//! Loads config and catalogs, assesses devices, scores operations, and
//! builds, reviews and applies patch plans.

pub mod cli;
pub mod commands;
pub mod output;

pub use cli::{Cli, Commands};
