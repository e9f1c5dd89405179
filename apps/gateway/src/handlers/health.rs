//! Health check endpoint.

use actix_web::{HttpResponse, web};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
    pub store: &'static str,
    pub failure_mode: &'static str,
    pub policies: usize,
    pub routes: usize,
}

/// Health check endpoint - returns server status. Never rate-limited.
///
/// GET /api/health
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let response = HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
        store: state.admission.store_backend(),
        failure_mode: state.admission.failure_mode().as_str(),
        policies: state.policies.len(),
        routes: state.routes.len(),
    };

    HttpResponse::Ok().json(response)
}
