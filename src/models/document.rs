//! Document models.
//!
//! Documents are registered elsewhere; the conversion subsystem only needs to
//! know where a document comes from and how to fetch it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a document was obtained from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSource {
    /// arXiv preprint, referenced by its arXiv identifier.
    Arxiv,
    /// Manually uploaded file.
    Upload,
}

impl DocumentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Arxiv => "arxiv",
            Self::Upload => "upload",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "arxiv" => Some(Self::Arxiv),
            "upload" => Some(Self::Upload),
            _ => None,
        }
    }

    /// Whether documents from this source can be converted.
    pub fn is_convertible(&self) -> bool {
        matches!(self, Self::Arxiv)
    }
}

impl std::fmt::Display for DocumentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub source: DocumentSource,
    /// Source-specific reference (arXiv identifier for arXiv documents).
    pub external_ref: String,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}
