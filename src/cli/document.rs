//! Document registry commands.

use console::style;

use super::helpers::{open_database, truncate};
use crate::config::Settings;
use crate::models::DocumentSource;

/// Register a document.
pub async fn cmd_document_add(
    settings: &Settings,
    source: DocumentSource,
    external_ref: &str,
    title: Option<&str>,
) -> anyhow::Result<()> {
    let Some(ctx) = open_database(settings).await? else {
        return Ok(());
    };

    let external_ref = external_ref.trim();
    if external_ref.is_empty() {
        anyhow::bail!("Document reference must not be empty");
    }

    let document = ctx.documents().add(source, external_ref, title).await?;
    println!(
        "{} Document {} ({} {})",
        style("✓").green(),
        style(document.id).cyan(),
        document.source,
        document.external_ref
    );
    Ok(())
}

/// List registered documents, newest first.
pub async fn cmd_document_list(settings: &Settings, limit: i64) -> anyhow::Result<()> {
    let Some(ctx) = open_database(settings).await? else {
        return Ok(());
    };

    let documents = ctx.documents().list(limit).await?;
    if documents.is_empty() {
        println!("{} No documents registered", style("!").yellow());
        return Ok(());
    }

    println!(
        "{:<8} {:<8} {:<24} {}",
        style("ID").bold(),
        style("Source").bold(),
        style("Reference").bold(),
        style("Title").bold()
    );
    println!("{}", "-".repeat(72));
    for doc in documents {
        println!(
            "{:<8} {:<8} {:<24} {}",
            doc.id,
            doc.source,
            truncate(&doc.external_ref, 24),
            truncate(doc.title.as_deref().unwrap_or("-"), 30)
        );
    }
    Ok(())
}

/// Show a document and its conversion record.
pub async fn cmd_document_show(settings: &Settings, id: i64) -> anyhow::Result<()> {
    let Some(ctx) = open_database(settings).await? else {
        return Ok(());
    };

    let Some(doc) = ctx.documents().get(id).await? else {
        println!("{} Document {} not found", style("✗").red(), id);
        return Ok(());
    };

    println!("\n{}", style(format!("Document {}", doc.id)).bold());
    println!("{}", "-".repeat(40));
    println!("{:<20} {}", "Source:", doc.source);
    println!("{:<20} {}", "Reference:", doc.external_ref);
    println!("{:<20} {}", "Title:", doc.title.as_deref().unwrap_or("-"));
    println!("{:<20} {}", "Registered:", doc.created_at.to_rfc3339());

    let conversions = ctx.conversions(settings.conversion.claim_policy());
    match conversions.get(id).await? {
        Some(record) => super::status::print_record(&record),
        None => println!("{:<20} {}", "Conversion:", "not requested"),
    }
    Ok(())
}
