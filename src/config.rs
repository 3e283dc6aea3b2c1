//! Configuration management for papertext using the prefer crate.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::converter::{ArxivPdfConverter, DEFAULT_ARXIV_PDF_BASE};
use crate::repository::util::{is_postgres_url, redact_url_password};
use crate::repository::{ClaimPolicy, DbContext, DieselError};

/// Default database filename.
const DEFAULT_DATABASE_FILENAME: &str = "papertext.db";

/// Tuning for the conversion pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionSettings {
    /// Failed attempts allowed before a conversion is terminal.
    pub max_retries: u32,
    /// Backoff before the first retry; doubles on each further retry.
    pub retry_base_delay: Duration,
    /// Age after which a processing claim may be taken over.
    pub stale_claim_window: Duration,
    /// How long callers wait for text by default.
    pub default_wait_timeout: Duration,
    pub worker_pool_size: usize,
    /// How long `work` waits for busy workers when stopping.
    pub graceful_shutdown: Duration,
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay: Duration::from_secs(30),
            stale_claim_window: Duration::from_secs(600),
            default_wait_timeout: Duration::from_secs(300),
            worker_pool_size: 2,
            graceful_shutdown: Duration::from_secs(30),
        }
    }
}

impl ConversionSettings {
    pub fn claim_policy(&self) -> ClaimPolicy {
        ClaimPolicy {
            max_retries: self.max_retries,
            stale_window: self.stale_claim_window,
        }
    }
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename.
    pub database_filename: String,
    /// Database URL (overrides data_dir/database_filename if set).
    pub database_url: Option<String>,
    /// Base URL for arXiv PDF downloads.
    pub arxiv_base_url: String,
    /// Timeout for a single PDF download.
    pub download_timeout: Duration,
    pub conversion: ConversionSettings,
}

impl Default for Settings {
    fn default() -> Self {
        // Documents dir -> Home dir -> Current dir
        let data_dir = dirs::document_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("papertext");

        Self {
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            database_url: None,
            arxiv_base_url: DEFAULT_ARXIV_PDF_BASE.to_string(),
            download_timeout: Duration::from_secs(120),
            conversion: ConversionSettings::default(),
        }
    }
}

impl Settings {
    /// Get the database URL, constructing from path if not explicitly set.
    pub fn database_url(&self) -> String {
        if let Some(ref url) = self.database_url {
            url.clone()
        } else {
            format!("sqlite:{}", self.database_path().display())
        }
    }

    /// Database URL safe for logs.
    pub fn database_display(&self) -> String {
        redact_url_password(&self.database_url())
    }

    /// Check if using PostgreSQL (vs SQLite).
    pub fn is_postgres(&self) -> bool {
        self.database_url
            .as_ref()
            .is_some_and(|url| is_postgres_url(url))
    }

    /// Get the full path to the database (for SQLite file-based databases).
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Ensure the data directory exists (SQLite only).
    pub async fn ensure_directories(&self) -> std::io::Result<()> {
        if !self.is_postgres() {
            tokio::fs::create_dir_all(&self.data_dir).await?;
        }
        Ok(())
    }

    /// Check if the database has been created (always true for PostgreSQL).
    pub fn database_exists(&self) -> bool {
        self.is_postgres() || self.database_path().exists()
    }

    /// Create a database context for the configured database.
    pub fn create_db_context(&self) -> Result<DbContext, DieselError> {
        DbContext::from_url(&self.database_url())
    }

    /// Converter for arXiv documents, built from the download settings.
    pub fn arxiv_converter(&self) -> ArxivPdfConverter {
        ArxivPdfConverter::new(&self.arxiv_base_url, self.download_timeout)
    }

    /// Apply `PAPERTEXT_*` and `DATABASE_URL` overrides from `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("DATABASE_URL") {
            tracing::debug!("Using DATABASE_URL from environment: {}", redact_url_password(&url));
            self.database_url = Some(url);
        }
        if let Some(dir) = get("PAPERTEXT_DATA_DIR") {
            self.data_dir = PathBuf::from(shellexpand::tilde(&dir).as_ref());
        }
        if let Some(url) = get("PAPERTEXT_ARXIV_BASE_URL") {
            self.arxiv_base_url = url;
        }

        let conversion = &mut self.conversion;
        if let Some(v) = parse_env(&get, "PAPERTEXT_MAX_RETRIES") {
            conversion.max_retries = v;
        }
        if let Some(v) = parse_env(&get, "PAPERTEXT_RETRY_BASE_DELAY") {
            conversion.retry_base_delay = Duration::from_secs(v);
        }
        if let Some(v) = parse_env(&get, "PAPERTEXT_STALE_CLAIM_WINDOW") {
            conversion.stale_claim_window = Duration::from_secs(v);
        }
        if let Some(v) = parse_env(&get, "PAPERTEXT_WAIT_TIMEOUT") {
            conversion.default_wait_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_env(&get, "PAPERTEXT_WORKERS") {
            conversion.worker_pool_size = v;
        }
    }
}

fn parse_env<T, G>(get: &G, name: &str) -> Option<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    let raw = get(name)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring {}={:?}: not a valid number", name, raw);
            None
        }
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Database filename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Full database URL (e.g. postgres://...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arxiv_base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_base_delay_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_claim_window_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_wait_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_pool_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graceful_shutdown_secs: Option<u64>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    /// Automatically discovers papertext config files in standard locations.
    pub async fn load() -> Self {
        let Ok(pref_config) = prefer::load("papertext").await else {
            return Self::default();
        };
        let Some(path) = pref_config.source_path() else {
            return Self::default();
        };
        match Self::load_from_path(path).await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents)
                .map_err(|e| format!("Failed to parse TOML config: {}", e))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e))?,
            _ => serde_json::from_str(&contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e))?,
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Get the base directory for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, base_dir);
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(ref url) = self.database_url {
            settings.database_url = Some(url.clone());
        }
        if let Some(ref url) = self.arxiv_base_url {
            settings.arxiv_base_url = url.clone();
        }
        if let Some(secs) = self.download_timeout_secs {
            settings.download_timeout = Duration::from_secs(secs);
        }

        let conversion = &mut settings.conversion;
        if let Some(v) = self.max_retries {
            conversion.max_retries = v;
        }
        if let Some(secs) = self.retry_base_delay_secs {
            conversion.retry_base_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = self.stale_claim_window_secs {
            conversion.stale_claim_window = Duration::from_secs(secs);
        }
        if let Some(secs) = self.default_wait_timeout_secs {
            conversion.default_wait_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = self.worker_pool_size {
            conversion.worker_pool_size = v;
        }
        if let Some(secs) = self.graceful_shutdown_secs {
            conversion.graceful_shutdown = Duration::from_secs(secs);
        }
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file (`--config`).
    pub config_path: Option<PathBuf>,
    /// Explicit data directory (`--data`).
    pub data: Option<PathBuf>,
}

/// Load settings: config file, then environment, then `--data`.
/// Returns (Settings, Config) tuple.
pub async fn load_settings_with_options(options: LoadOptions) -> (Settings, Config) {
    let config = match options.config_path {
        Some(ref path) => Config::load_from_path(path).await.unwrap_or_else(|e| {
            tracing::warn!("Ignoring config {}: {}", path.display(), e);
            Config::default()
        }),
        None => Config::load().await,
    };

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let settings = resolve_settings(&config, &cwd, options.data, |name| std::env::var(name).ok());
    (settings, config)
}

/// Layer the config file, the environment and an explicit `--data` flag, in
/// that order, over the defaults.
fn resolve_settings<F>(config: &Config, cwd: &Path, data: Option<PathBuf>, lookup: F) -> Settings
where
    F: Fn(&str) -> Option<String>,
{
    let base_dir = config.base_dir().unwrap_or_else(|| cwd.to_path_buf());

    let mut settings = Settings::default();
    config.apply_to_settings(&mut settings, &base_dir);
    settings.apply_env_overrides(lookup);

    if let Some(data) = data {
        settings.data_dir = if data.is_absolute() {
            data
        } else {
            cwd.join(data)
        };
    }
    settings
}
