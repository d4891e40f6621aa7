use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::{RagError, Result};

/// Loader strategy selected from a file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    PlainText,
    Pdf,
    WordDocument,
    Presentation,
    Html,
    Csv,
    Markdown,
    Image,
}

/// Every recognized extension, lowercase and without the leading dot
pub const SUPPORTED_EXTENSIONS: &[(&str, DocumentFormat)] = &[
    ("txt", DocumentFormat::PlainText),
    ("pdf", DocumentFormat::Pdf),
    ("docx", DocumentFormat::WordDocument),
    ("doc", DocumentFormat::WordDocument),
    ("pptx", DocumentFormat::Presentation),
    ("ppt", DocumentFormat::Presentation),
    ("html", DocumentFormat::Html),
    ("htm", DocumentFormat::Html),
    ("csv", DocumentFormat::Csv),
    ("md", DocumentFormat::Markdown),
    ("jpg", DocumentFormat::Image),
    ("jpeg", DocumentFormat::Image),
    ("png", DocumentFormat::Image),
];

impl DocumentFormat {
    /// Resolve an extension such as `"PDF"` or `".md"`
    #[inline]
    pub fn from_extension(extension: &str) -> Result<Self> {
        let normalized = extension.trim_start_matches('.').to_ascii_lowercase();
        SUPPORTED_EXTENSIONS
            .iter()
            .find(|(ext, _)| *ext == normalized)
            .map(|(_, format)| *format)
            .ok_or_else(|| RagError::UnsupportedFormat {
                extension: format!(".{}", normalized),
            })
    }

    #[inline]
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        Self::from_extension(extension)
    }

    #[inline]
    pub fn is_supported(path: &Path) -> bool {
        Self::from_path(path).is_ok()
    }

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PlainText => "text",
            Self::Pdf => "pdf",
            Self::WordDocument => "word_document",
            Self::Presentation => "presentation",
            Self::Html => "html",
            Self::Csv => "csv",
            Self::Markdown => "markdown",
            Self::Image => "image",
        }
    }
}

impl fmt::Display for DocumentFormat {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
