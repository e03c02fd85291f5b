//! Caching and request coalescing for a trading card price guide
//!
//! - `data::cache` - pluggable cache store, coalescing, stale-while-revalidate
//! - `domain` - cached card prices, population reports, certificates, search
//! - `core` - configuration, CLI, constants
//! - `app` - admin binary entry point

pub mod app;
pub mod core;
pub mod data;
pub mod domain;
pub mod utils;
