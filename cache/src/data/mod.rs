//! Data storage layer
//!
//! - `cache` - In-memory and Redis caching with coalescing and stale-while-revalidate

pub mod cache;
