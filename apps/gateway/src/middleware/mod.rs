//! HTTP middleware.

pub mod error;
pub mod rate_limit;
