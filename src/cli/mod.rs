//! Command-line interface
//!
//! Argument parsing and command handlers for the `raidboss` binary.

pub mod args;
pub mod commands;
