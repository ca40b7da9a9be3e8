use std::sync::Arc;

use anyhow::Context;

use acadbatch_infra::BatchConfig;
use acadbatch_server::app;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    acadbatch_observability::init();

    let config = BatchConfig::load().context("loading configuration")?;
    let collaborators = app::in_memory_collaborators();
    let settings = app::in_memory_settings(&config);
    let history = app::execution_history(&config).await?;
    let orchestrator = Arc::new(app::build_orchestrator(&settings, &collaborators, history)?);
    let (scheduler, scheduler_config) = app::build_scheduler(&config, orchestrator)?;
    let notifications = app::spawn_notification_log(&collaborators)?;
    let handle = scheduler.spawn(scheduler_config)?;

    // Jobs named on the command line run once immediately.
    for job in std::env::args().skip(1) {
        handle
            .trigger(&job)
            .with_context(|| format!("triggering '{job}'"))?;
        tracing::info!(job = %job, "triggered from command line");
    }

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    tracing::info!("shutdown requested; waiting for running jobs");
    tokio::task::spawn_blocking(move || {
        handle.shutdown();
        notifications.shutdown();
    })
    .await?;
    Ok(())
}
