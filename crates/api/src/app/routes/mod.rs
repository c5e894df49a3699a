use axum::Router;

pub mod cache;
pub mod jobs;
pub mod kpis;
pub mod system;

/// Router for all service endpoints.
pub fn router() -> Router {
    Router::new()
        .nest("/jobs", jobs::router())
        .nest("/kpis", kpis::router())
        .nest("/cache", cache::router())
}
