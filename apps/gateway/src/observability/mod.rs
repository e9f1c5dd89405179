//! Observability module - request IDs attached to spans, logs and error bodies.

mod request_id;

pub use request_id::{REQUEST_ID_HEADER, RequestId, RequestIdMiddleware};
