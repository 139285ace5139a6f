mod bootstrap;
mod engine;
mod health;

use std::time::Duration;

use anyhow::Result;
use cadence_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use cadence_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
    )
    .await?;

    spawn_scheduler(app.engine.clone(), app.config.engine.tick_interval_secs);

    let bind = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    let router = engine::router(app.engine.clone());
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });
        if let Err(err) = serve.await {
            tracing::error!(
                event_name = "system.server.error",
                error = %err,
                "trigger endpoint stopped serving"
            );
        }
    });

    tracing::info!(
        event_name = "system.server.started",
        bind_address = %bind,
        tick_interval_secs = app.config.engine.tick_interval_secs,
        "cadence-server started"
    );
    wait_for_shutdown().await?;
    tracing::info!(event_name = "system.server.stopping", "cadence-server stopping");

    let _ = shutdown_tx.send(());
    let deadline = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if !drained(server, deadline).await {
        tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            deadline_secs = app.config.server.graceful_shutdown_secs,
            "open connections not drained before the shutdown deadline"
        );
    }

    Ok(())
}

/// True when the task finishes inside the deadline; a tick mid-flight past
/// the deadline is abandoned rather than awaited forever.
async fn drained<T>(task: tokio::task::JoinHandle<T>, deadline: Duration) -> bool {
    tokio::time::timeout(deadline, task).await.is_ok()
}

/// Internal scheduler: one tick per interval, never overlapping, because the
/// loop awaits each tick to completion before sleeping again.
fn spawn_scheduler(engine: std::sync::Arc<engine::Engine>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            match engine.run_tick().await {
                Ok(summary) => {
                    tracing::info!(
                        event_name = "system.scheduler.tick",
                        users_processed = summary.users_processed,
                        actions_queued = summary.total_actions_queued,
                        actions_executed = summary.total_actions_executed,
                        duration_ms = summary.duration_ms,
                        "scheduled tick finished"
                    );
                }
                Err(err) => {
                    tracing::error!(
                        event_name = "system.scheduler.tick_failed",
                        error = %err,
                        "scheduled tick failed"
                    );
                }
            }
        }
    });
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
