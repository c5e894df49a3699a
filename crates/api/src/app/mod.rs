//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: orchestrator, KPI catalog and cache wiring
//! - `routes/`: HTTP handlers, one file per area
//! - `dto.rs`: request/response bodies
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::config::AppConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build services from `config` and the router around them.
pub async fn build_app(config: &AppConfig) -> anyhow::Result<(Router, Arc<AppServices>)> {
    let services = Arc::new(services::build_services(config).await?);
    Ok((build_router(Arc::clone(&services)), services))
}

/// Router over already-built services (used by tests to inject sources).
pub fn build_router(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(middleware::request_logging))
                .layer(Extension(services)),
        )
}
