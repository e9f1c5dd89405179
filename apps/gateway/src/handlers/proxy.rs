//! Catch-all handlers for the `/api` scope.

use actix_web::{HttpRequest, HttpResponse, web};

use crate::config::RouteConfig;
use crate::middleware::error::{AppError, AppResult};
use crate::state::AppState;

/// Relay an admitted request to the route's upstream.
pub async fn forward(
    req: HttpRequest,
    body: web::Bytes,
    route: web::Data<RouteConfig>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    Ok(state.upstream.forward(&route, &req, body).await?)
}

/// Paths under `/api` that no route claims.
pub async fn not_found(req: HttpRequest) -> AppResult<HttpResponse> {
    Err(AppError::NotFound(format!("No route for {}", req.path())))
}
