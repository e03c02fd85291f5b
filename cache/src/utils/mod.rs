//! Utility functions for the application

pub mod backoff;
pub mod time;
