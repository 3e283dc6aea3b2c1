//! Status command.

use console::style;

use super::helpers::open_database;
use crate::config::Settings;
use crate::models::{ConversionRecord, ConversionStatus};

/// Show the conversion summary, or one document's conversion record.
pub async fn cmd_status(settings: &Settings, id: Option<i64>) -> anyhow::Result<()> {
    let Some(ctx) = open_database(settings).await? else {
        return Ok(());
    };
    let conversions = ctx.conversions(settings.conversion.claim_policy());

    if let Some(id) = id {
        match conversions.get(id).await? {
            Some(record) => print_record(&record),
            None => println!("{} No conversion requested for document {}", style("!").yellow(), id),
        }
        return Ok(());
    }

    let counts = conversions.count_by_status().await?;
    let total: u64 = counts.values().sum();

    println!("\n{}", style("papertext Status").bold());
    println!("{}", "-".repeat(40));
    println!("{:<20} {}", "Database:", settings.database_display());
    println!("{:<20} {}", "Max retries:", settings.conversion.max_retries);
    println!("{:<20} {}", "Conversions:", total);
    for status in ConversionStatus::ALL {
        let count = counts.get(&status).copied().unwrap_or(0);
        if count > 0 {
            println!("{:<20} {}", format!("  {}:", status.as_str()), count);
        }
    }
    Ok(())
}

pub(super) fn print_record(record: &ConversionRecord) {
    let status = match record.status {
        ConversionStatus::Succeeded => style(record.status.as_str()).green(),
        ConversionStatus::Failed => style(record.status.as_str()).red(),
        ConversionStatus::Processing => style(record.status.as_str()).cyan(),
        ConversionStatus::Pending => style(record.status.as_str()).yellow(),
    };

    println!("{:<20} {}", "Conversion:", status);
    println!("{:<20} {}", "Retries:", record.retry_count);
    if let Some(ref owner) = record.owner_token {
        println!("{:<20} {}", "Claimed by:", owner);
    }
    if let Some(claimed_at) = record.claimed_at {
        println!("{:<20} {}", "Claimed at:", claimed_at.to_rfc3339());
    }
    if let Some(finished_at) = record.finished_at {
        println!("{:<20} {}", "Finished at:", finished_at.to_rfc3339());
    }
    if let Some(ref text) = record.text {
        println!("{:<20} {} chars", "Text:", text.chars().count());
    }
    if let Some(ref message) = record.error_message {
        println!("{:<20} {}", "Last error:", message);
    }
}
