//! # Tollgate Gateway
//!
//! Actix-web front door for backend services. Every configured route is
//! guarded by a token-bucket rate limiter whose state lives in Redis, so all
//! gateway instances share one quota per client.
//!
//! Pipeline, outermost first: tracing logger, request id, per-route rate
//! limit, upstream forward.

use actix_web::{App, HttpServer, web};
use anyhow::Context;
use tracing_actix_web::TracingLogger;

mod config;
mod handlers;
mod middleware;
mod observability;
mod state;
mod telemetry;
mod upstream;

use config::AppConfig;
use observability::RequestIdMiddleware;
use state::AppState;
use telemetry::{TelemetryConfig, init_telemetry};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_telemetry(&TelemetryConfig::from_env());

    let config = AppConfig::from_env().context("Invalid gateway configuration")?;

    for route in &config.routes {
        tracing::info!(
            route = %route.id,
            prefix = %route.path_prefix,
            upstream = %route.upstream,
            policy = %route.policy.name(),
            capacity = route.policy.capacity(),
            "Route mounted"
        );
    }

    let state = AppState::new(&config)
        .await
        .context("Failed to initialize application state")?;

    tracing::info!(
        "Starting Tollgate gateway on {}:{}",
        config.host,
        config.port
    );

    // `wrap` order is inside-out: the last registered middleware runs first.
    HttpServer::new(move || {
        App::new()
            .wrap(RequestIdMiddleware)
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(|cfg| handlers::configure_routes(cfg, &state))
    })
    .bind((config.host.as_str(), config.port))
    .with_context(|| format!("Failed to bind {}:{}", config.host, config.port))?
    .run()
    .await?;

    Ok(())
}
