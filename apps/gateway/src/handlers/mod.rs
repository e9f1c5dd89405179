//! HTTP handlers and route configuration.

mod health;
mod proxy;

use actix_web::web;

use crate::middleware::rate_limit::RateLimitMiddleware;
use crate::state::AppState;
use crate::upstream::API_PREFIX;

/// Configure all application routes.
///
/// Routes arrive sorted longest prefix first, so nested prefixes resolve to
/// the most specific route.
pub fn configure_routes(cfg: &mut web::ServiceConfig, state: &AppState) {
    // Public routes
    let mut api = web::scope(API_PREFIX).route("/health", web::get().to(health::health_check));

    // Rate-limited upstream routes
    for route in state.routes.iter() {
        api = api.service(
            web::scope(&route.path_prefix)
                .app_data(web::Data::new(route.clone()))
                .app_data(web::PayloadConfig::new(state.max_body_bytes))
                .default_service(web::to(proxy::forward))
                .wrap(RateLimitMiddleware::new(
                    state.admission.clone(),
                    route.policy.clone(),
                    state.client_ids,
                )),
        );
    }

    cfg.service(api.default_service(web::to(proxy::not_found)));
}
