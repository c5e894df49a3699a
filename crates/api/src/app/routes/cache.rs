//! Cache inspection and invalidation.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    routing::{delete, get},
    Json, Router,
};

use innsight_infra::cache::CacheStats;

use crate::app::dto::CacheClearResponse;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/stats", get(stats))
        .route("/", delete(clear))
        .route("/:domain", delete(invalidate_domain))
}

/// GET /cache/stats
pub async fn stats(Extension(services): Extension<Arc<AppServices>>) -> Json<CacheStats> {
    Json(services.catalog.cache().stats())
}

/// DELETE /cache
pub async fn clear(Extension(services): Extension<Arc<AppServices>>) -> Json<CacheClearResponse> {
    let removed = services.catalog.cache().clear();
    tracing::info!(removed, "kpi cache cleared");
    Json(CacheClearResponse {
        domain: None,
        removed,
    })
}

/// DELETE /cache/:domain
pub async fn invalidate_domain(
    Extension(services): Extension<Arc<AppServices>>,
    Path(domain): Path<String>,
) -> Json<CacheClearResponse> {
    let removed = services.catalog.cache().invalidate_domain(&domain);
    tracing::info!(domain = %domain, removed, "kpi cache domain invalidated");
    Json(CacheClearResponse {
        domain: Some(domain),
        removed,
    })
}
