use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;

use innsight_api::app::{self, AppServices};
use innsight_api::config::AppConfig;
use innsight_infra::jobs::BatchScheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    innsight_observability::init();

    let config = AppConfig::from_env();
    let (router, services) = app::build_app(&config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut background = Vec::new();

    if let Some(expression) = config.batch_schedule.as_deref() {
        match BatchScheduler::new(
            services.orchestrator.clone(),
            expression,
            services.catalog.clone(),
        ) {
            Ok(scheduler) => background.push(scheduler.spawn(shutdown_rx.clone())),
            Err(e) => tracing::error!(error = %e, "batch scheduler disabled"),
        }
    } else {
        tracing::info!("BATCH_SCHEDULE is empty; batch scheduler disabled");
    }

    if let Some(ttl) = config.cache_ttl {
        background.push(tokio::spawn(purge_expired_periodically(
            Arc::clone(&services),
            ttl,
            shutdown_rx.clone(),
        )));
    }

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    for handle in background {
        let _ = handle.await;
    }
    tracing::info!("shut down");
    Ok(())
}

async fn purge_expired_periodically(
    services: Arc<AppServices>,
    ttl: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(ttl);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let purged = services.catalog.cache().purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "expired kpi cache entries removed");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
