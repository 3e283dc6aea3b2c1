//! Conversion request commands.

use std::time::Duration;

use console::style;

use super::helpers::{open_database, Coordinator};
use crate::config::Settings;
use crate::models::ConversionStatus;

/// Request conversion of a document, optionally waiting for the outcome.
///
/// Without `--wait` the request is only recorded, and the record stays
/// pending until a `papertext work` process recovers it at start-up.
pub async fn cmd_convert(
    settings: &Settings,
    id: i64,
    wait: bool,
    timeout: Option<u64>,
) -> anyhow::Result<()> {
    let Some(ctx) = open_database(settings).await? else {
        return Ok(());
    };
    let coordinator = Coordinator::new(settings, &ctx);

    let queued = coordinator.service.trigger_conversion(id).await?;
    if !queued {
        let status = coordinator
            .conversions
            .get(id)
            .await?
            .map(|r| r.status.as_str())
            .unwrap_or("unknown");
        println!(
            "{} Document {} needs no new conversion (status: {})",
            style("!").yellow(),
            id,
            status
        );
        return Ok(());
    }

    if !wait {
        println!(
            "{} Conversion of document {} requested; run 'papertext work' to process it",
            style("✓").green(),
            id
        );
        return Ok(());
    }

    let timeout = timeout
        .map(Duration::from_secs)
        .unwrap_or(settings.conversion.default_wait_timeout);

    coordinator.start_workers(None).await?;
    let result = coordinator.service.wait_for_completion(id, timeout).await;
    coordinator.stop_workers().await;

    match result? {
        ConversionStatus::Succeeded => {
            println!("{} Document {} converted", style("✓").green(), id)
        }
        status => println!(
            "{} Document {} finished with status {}",
            style("✗").red(),
            id,
            status
        ),
    }
    Ok(())
}

/// Print a document's text, converting it in-process if needed.
pub async fn cmd_text(settings: &Settings, id: i64, timeout: Option<u64>) -> anyhow::Result<()> {
    let Some(ctx) = open_database(settings).await? else {
        return Ok(());
    };
    let coordinator = Coordinator::new(settings, &ctx);
    let timeout = timeout
        .map(Duration::from_secs)
        .unwrap_or(settings.conversion.default_wait_timeout);

    coordinator.start_workers(None).await?;
    let result = coordinator
        .service
        .get_or_wait_for_text_within(id, timeout)
        .await;
    coordinator.stop_workers().await;

    println!("{}", result?);
    Ok(())
}
