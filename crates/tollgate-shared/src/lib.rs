//! # Tollgate Shared
//!
//! Wire-level types shared by the gateway's HTTP surface and its clients.

pub mod headers;
pub mod response;

pub use response::ErrorResponse;
