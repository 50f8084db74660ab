//! Kiln Core
//!
//! Shared plumbing for the Kiln renderer crates: logging bootstrap, profiling
//! hooks and engine-level configuration.

pub mod config;
pub mod logging;
pub mod profiling;
