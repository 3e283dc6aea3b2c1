//! Shared helper functions for CLI commands.

use std::sync::Arc;

use console::style;

use crate::config::Settings;
use crate::converter::Converter;
use crate::dispatch::DispatchQueue;
use crate::repository::{ConversionRepository, DbContext};
use crate::services::ConversionService;
use crate::worker::ConversionWorker;

/// Open the configured database, or print a hint and return `None` if it
/// has not been initialized.
pub async fn open_database(settings: &Settings) -> anyhow::Result<Option<DbContext>> {
    if !settings.database_exists() {
        println!(
            "{} System not initialized. Run 'papertext init' first.",
            style("!").yellow()
        );
        return Ok(None);
    }
    let ctx = settings.create_db_context()?;
    ctx.init_schema().await?;
    Ok(Some(ctx))
}

/// Everything a command needs to request and run conversions in-process.
pub struct Coordinator {
    pub conversions: ConversionRepository,
    pub queue: Arc<DispatchQueue>,
    pub service: ConversionService,
    worker: Arc<ConversionWorker>,
    settings: Settings,
}

impl Coordinator {
    pub fn new(settings: &Settings, ctx: &DbContext) -> Self {
        let converter: Arc<dyn Converter> = Arc::new(settings.arxiv_converter());
        let tuning = &settings.conversion;
        let conversions = ctx.conversions(tuning.claim_policy());
        let queue = Arc::new(DispatchQueue::new());

        let service = ConversionService::new(
            Arc::new(ctx.documents()),
            conversions.clone(),
            queue.clone(),
            tuning.default_wait_timeout,
        );
        let worker = Arc::new(ConversionWorker::new(
            conversions.clone(),
            converter,
            tuning.retry_base_delay,
        ));

        Self {
            conversions,
            queue,
            service,
            worker,
            settings: settings.clone(),
        }
    }

    /// Start `count` workers, or the configured pool size.
    pub async fn start_workers(&self, count: Option<usize>) -> anyhow::Result<usize> {
        let count = count.unwrap_or(self.settings.conversion.worker_pool_size);
        Ok(self.queue.start_workers(count, self.worker.clone()).await?)
    }

    /// Stop workers, waiting up to the configured grace period.
    pub async fn stop_workers(&self) -> bool {
        self.queue
            .stop_workers(self.settings.conversion.graceful_shutdown)
            .await
    }
}

/// Shorten `s` to at most `max` characters for table output.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
