//! Long-running worker pool command.

use console::style;

use super::helpers::{open_database, Coordinator};
use crate::config::Settings;

/// Run conversion workers until Ctrl-C.
pub async fn cmd_work(
    settings: &Settings,
    workers: Option<usize>,
    recover_limit: i64,
) -> anyhow::Result<()> {
    let Some(ctx) = open_database(settings).await? else {
        return Ok(());
    };
    let coordinator = Coordinator::new(settings, &ctx);

    let started = coordinator.start_workers(workers).await?;
    let recovered = coordinator.service.recover_pending(recover_limit).await?;

    println!(
        "{} {} workers running, {} unfinished conversions re-queued (Ctrl-C to stop)",
        style("✓").green(),
        started,
        recovered
    );

    tokio::signal::ctrl_c().await?;
    println!("{} Shutting down...", style("!").yellow());

    if coordinator.stop_workers().await {
        println!("{} All workers stopped", style("✓").green());
    } else {
        println!(
            "{} Some workers were cancelled; their jobs stay recoverable",
            style("!").yellow()
        );
    }
    if coordinator.queue.queue_size() > 0 {
        tracing::info!(
            "{} queued jobs left; they will be recovered on next start",
            coordinator.queue.queue_size()
        );
    }
    Ok(())
}
