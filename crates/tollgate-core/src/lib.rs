//! # Tollgate Core
//!
//! The domain layer of the Tollgate gateway: rate limit policies, the
//! token-bucket transition, and the admission decision built on top of a
//! shared bucket store. Store technologies live in `tollgate-infra`.

pub mod admission;
pub mod domain;
pub mod error;
pub mod ports;

pub use admission::{Admission, AdmissionConfig, AdmissionController, FailureMode, Quota};
pub use error::PolicyError;
