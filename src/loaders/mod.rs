// Format loaders
// Turn a file on disk into one or more text documents with metadata

pub mod extract;
pub mod formats;
pub mod ocr;
pub mod staging;

#[cfg(test)]
pub(crate) mod fixtures;

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::OcrConfig;
use crate::{RagError, Result};

pub use formats::{DocumentFormat, SUPPORTED_EXTENSIONS};
pub use ocr::{OcrEngine, TesseractOcr};
pub use staging::{StagedUpload, sanitize_file_name};

/// Free-form metadata attached to documents and carried into their chunks
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// A unit of extracted text, before chunking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    pub metadata: Metadata,
}

impl Document {
    #[inline]
    pub fn new(text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            text: text.into(),
            metadata,
        }
    }
}

/// Dispatches files to the extractor for their format
#[derive(Clone)]
pub struct DocumentLoader {
    ocr: Arc<dyn OcrEngine>,
}

impl DocumentLoader {
    #[inline]
    pub fn new(ocr: Arc<dyn OcrEngine>) -> Self {
        Self { ocr }
    }

    #[inline]
    pub fn from_config(config: &OcrConfig) -> Self {
        Self::new(Arc::new(TesseractOcr::new(config)))
    }

    /// Load a file, using its own path as the `source`
    #[inline]
    pub async fn load(&self, path: &Path) -> Result<Vec<Document>> {
        self.load_as(path, &path.display().to_string()).await
    }

    /// Load `path`, recording `source` as the document origin.
    ///
    /// The format is chosen from the extension of `source`, which lets staged
    /// uploads keep the name the client sent.
    #[inline]
    pub async fn load_as(&self, path: &Path, source: &str) -> Result<Vec<Document>> {
        let format = DocumentFormat::from_path(Path::new(source))?;
        debug!("Loading {} as {}", source, format);

        let mut documents = match format {
            DocumentFormat::Image => self.load_image(path).await?,
            other => {
                let owned: PathBuf = path.to_path_buf();
                tokio::task::spawn_blocking(move || extract::extract(other, &owned))
                    .await
                    .map_err(|e| RagError::load_failure(source, e))?
                    .map_err(|e| RagError::load_failure(source, format!("{:#}", e)))?
            }
        };

        let file_name = Path::new(source)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.to_string());

        for document in &mut documents {
            document
                .metadata
                .insert("source".to_string(), json!(source));
            document
                .metadata
                .insert("file_name".to_string(), json!(file_name));
            document
                .metadata
                .insert("format".to_string(), json!(format.as_str()));
        }

        if documents.iter().all(|d| d.text.trim().is_empty()) {
            warn!("No text extracted from {}", source);
        }

        Ok(documents)
    }

    async fn load_image(&self, path: &Path) -> Result<Vec<Document>> {
        let owned = path.to_path_buf();
        let (width, height) = tokio::task::spawn_blocking(move || image::image_dimensions(&owned))
            .await
            .map_err(|e| RagError::load_failure(path, e))?
            .map_err(|e| RagError::load_failure(path, format!("Unreadable image: {}", e)))?;

        let text = self
            .ocr
            .recognize(path)
            .await
            .map_err(|e| RagError::load_failure(path, format!("{:#}", e)))?;

        let mut metadata = Metadata::new();
        metadata.insert("width".to_string(), json!(width));
        metadata.insert("height".to_string(), json!(height));
        Ok(vec![Document::new(text.trim(), metadata)])
    }
}
