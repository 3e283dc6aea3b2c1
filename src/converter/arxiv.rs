//! arXiv PDF converter: download the paper, extract text with pdftotext.

use std::io::Write;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use tracing::debug;

use super::{ConversionError, Converter};

pub const DEFAULT_ARXIV_PDF_BASE: &str = "https://arxiv.org/pdf";

const USER_AGENT: &str = concat!("papertext/", env!("CARGO_PKG_VERSION"));

/// Downloads arXiv PDFs and runs `pdftotext -layout` on them.
#[derive(Debug, Clone)]
pub struct ArxivPdfConverter {
    base_url: String,
    timeout: Duration,
    pdftotext: String,
}

impl Default for ArxivPdfConverter {
    fn default() -> Self {
        Self::new(DEFAULT_ARXIV_PDF_BASE, Duration::from_secs(120))
    }
}

impl ArxivPdfConverter {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            pdftotext: "pdftotext".to_string(),
        }
    }

    /// Use a different pdftotext binary.
    pub fn with_pdftotext(mut self, binary: impl Into<String>) -> Self {
        self.pdftotext = binary.into();
        self
    }

    /// PDF URL for an arXiv identifier.
    pub fn pdf_url(&self, arxiv_id: &str) -> String {
        format!("{}/{}.pdf", self.base_url, arxiv_id.trim())
    }

    // Built per call so the client's internal runtime is created and torn
    // down on the blocking thread that uses it.
    fn client(&self) -> Result<Client, ConversionError> {
        Client::builder()
            .user_agent(USER_AGENT)
            .timeout(self.timeout)
            .build()
            .map_err(|e| ConversionError::Retryable(format!("HTTP client setup failed: {e}")))
    }

    fn download(&self, url: &str) -> Result<tempfile::NamedTempFile, ConversionError> {
        let response = self
            .client()?
            .get(url)
            .send()
            .map_err(|e| ConversionError::Retryable(format!("Download of {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, url));
        }

        let bytes = response
            .bytes()
            .map_err(|e| ConversionError::Retryable(format!("Reading {url} failed: {e}")))?;
        ensure_pdf(&bytes)?;

        let mut file = tempfile::Builder::new()
            .prefix("papertext-")
            .suffix(".pdf")
            .tempfile()
            .map_err(|e| ConversionError::Retryable(format!("Temp file error: {e}")))?;
        file.write_all(&bytes)
            .map_err(|e| ConversionError::Retryable(format!("Temp file error: {e}")))?;

        debug!("Downloaded {} bytes from {}", bytes.len(), url);
        Ok(file)
    }

    /// Extract text from a PDF on disk.
    pub fn extract_text(&self, pdf_path: &Path) -> Result<String, ConversionError> {
        if which::which(&self.pdftotext).is_err() {
            return Err(ConversionError::Retryable(format!(
                "{} not found (install poppler-utils)",
                self.pdftotext
            )));
        }

        let output = Command::new(&self.pdftotext)
            .args(["-layout", "-enc", "UTF-8"])
            .arg(pdf_path)
            .arg("-")
            .output()
            .map_err(|e| ConversionError::Retryable(format!("{} failed to start: {e}", self.pdftotext)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ConversionError::Permanent(format!(
                "pdftotext failed: {}",
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        if text.trim().is_empty() {
            return Err(ConversionError::Permanent(
                "PDF contains no extractable text".to_string(),
            ));
        }
        Ok(text)
    }
}

impl Converter for ArxivPdfConverter {
    fn convert(&self, external_ref: &str) -> Result<String, ConversionError> {
        if external_ref.trim().is_empty() {
            return Err(ConversionError::Permanent("Empty arXiv identifier".to_string()));
        }
        let url = self.pdf_url(external_ref);
        let pdf = self.download(&url)?;
        self.extract_text(pdf.path())
    }
}

/// Missing documents will stay missing; everything else may recover.
fn classify_status(status: StatusCode, url: &str) -> ConversionError {
    let message = format!("HTTP {} fetching {}", status.as_u16(), url);
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => ConversionError::Permanent(message),
        _ => ConversionError::Retryable(message),
    }
}

fn ensure_pdf(bytes: &[u8]) -> Result<(), ConversionError> {
    if bytes.starts_with(b"%PDF") {
        Ok(())
    } else {
        Err(ConversionError::Permanent(
            "Downloaded file is not a PDF".to_string(),
        ))
    }
}
