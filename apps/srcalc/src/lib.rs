//! # srcalc Library
//!
//! This library exposes the srcalc modules for testing and integration.
//!
//! The main binary uses these modules through the `main.rs` entry point.

pub mod api;
pub mod cli;
pub mod config;
pub mod fixture;

// Re-export srcalc_core for convenience
pub use srcalc_core;
