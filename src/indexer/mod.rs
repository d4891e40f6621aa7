// Indexer module
// Uploads, batch ingestion and full rebuilds of the vector index


use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{Config, StorageConfig};
use crate::database::vector_store::VectorIndexStore;
use crate::embeddings::{DocumentChunk, TextChunker};
use crate::loaders::{DocumentFormat, DocumentLoader, StagedUpload, sanitize_file_name};
use crate::{RagError, Result};

/// Result of a single successful upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadOutcome {
    pub file_name: String,
    /// Number of chunks added to the index
    pub document_count: usize,
}

/// Per-file result within a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub source: String,
    pub chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileReport {
    fn loaded(source: impl Into<String>, chunks: usize) -> Self {
        Self {
            source: source.into(),
            chunks,
            error: None,
        }
    }

    fn failed(source: impl Into<String>, error: &RagError) -> Self {
        Self {
            source: source.into(),
            chunks: 0,
            error: Some(error.to_string()),
        }
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub files: Vec<FileReport>,
    pub chunks_added: usize,
}

impl BatchReport {
    #[inline]
    pub fn failures(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|file| !file.is_ok())
    }

    #[inline]
    pub fn succeeded(&self) -> usize {
        self.files.iter().filter(|file| file.is_ok()).count()
    }

    /// One-line summary suitable for users
    #[inline]
    pub fn summary(&self) -> String {
        if self.chunks_added == 0 {
            return RagError::NoDocumentsAdded.to_string();
        }
        format!(
            "Added {} chunks from {} of {} files",
            self.chunks_added,
            self.succeeded(),
            self.files.len()
        )
    }
}

/// Loads files, chunks them and feeds the vector index
pub struct Indexer {
    loader: DocumentLoader,
    chunker: TextChunker,
    index: Arc<VectorIndexStore>,
    storage: StorageConfig,
}

impl std::fmt::Debug for Indexer {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("chunker", &self.chunker)
            .field("index", &self.index)
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

impl Indexer {
    #[inline]
    pub fn new(
        loader: DocumentLoader,
        chunker: TextChunker,
        index: Arc<VectorIndexStore>,
        storage: StorageConfig,
    ) -> Self {
        Self {
            loader,
            chunker,
            index,
            storage,
        }
    }

    #[inline]
    pub fn from_config(config: &Config, index: Arc<VectorIndexStore>) -> Result<Self> {
        let chunker = TextChunker::new(config.chunking)?;
        Ok(Self::new(
            DocumentLoader::from_config(&config.ocr),
            chunker,
            index,
            config.storage.clone(),
        ))
    }

    #[inline]
    pub fn index(&self) -> &Arc<VectorIndexStore> {
        &self.index
    }

    /// Ingest one uploaded file.
    ///
    /// The upload is staged, loaded, chunked and added to the index, which is
    /// saved before returning. The staged copy is removed on every path.
    #[inline]
    pub async fn ingest_upload(&self, file_name: &str, bytes: &[u8]) -> Result<UploadOutcome> {
        let file_name = sanitize_file_name(file_name)?;
        DocumentFormat::from_path(Path::new(&file_name))?;

        let staged = StagedUpload::write(&self.storage.staging_dir, &file_name, bytes)?;
        let documents = self
            .loader
            .load_as(staged.path(), staged.file_name())
            .await?;

        let chunks = self.chunker.split_documents(&documents);
        if chunks.is_empty() {
            warn!("Upload {} produced no text", file_name);
            return Err(RagError::NoDocumentsAdded);
        }

        let added = self.index.add_and_save(chunks).await?;

        if self.storage.retain_uploads {
            if let Err(e) = staged.retain_in(&self.storage.data_dir) {
                warn!("Failed to keep a copy of {}: {}", file_name, e);
            }
        }

        info!("Ingested upload {} ({} chunks)", file_name, added);
        Ok(UploadOutcome {
            file_name,
            document_count: added,
        })
    }

    /// Ingest files and directories, continuing past files that fail.
    ///
    /// Directories are walked for supported files. `on_file` sees each
    /// report as soon as that file is done.
    #[inline]
    pub async fn ingest_paths(
        &self,
        paths: &[PathBuf],
        on_file: impl FnMut(&FileReport) + Send,
    ) -> Result<BatchReport> {
        let files = expand_paths(paths);
        let (mut report, chunks) = self.load_all(&files, on_file).await;

        if chunks.is_empty() {
            warn!("{}", RagError::NoDocumentsAdded);
            return Ok(report);
        }
        report.chunks_added = self.index.add_and_save(chunks).await?;
        info!("{}", report.summary());
        Ok(report)
    }

    /// Discard the index and rebuild it from every supported file in the
    /// data directory.
    ///
    /// When nothing loads the current index is kept.
    #[inline]
    pub async fn rebuild_from_data_dir(
        &self,
        on_file: impl FnMut(&FileReport) + Send,
    ) -> Result<BatchReport> {
        let data_dir = &self.storage.data_dir;
        info!("Rebuilding vector index from {}", data_dir.display());

        let files = supported_files(data_dir);
        let (mut report, chunks) = self.load_all(&files, on_file).await;

        if chunks.is_empty() {
            warn!(
                "{} from {}, keeping the current index",
                RagError::NoDocumentsAdded,
                data_dir.display()
            );
            return Ok(report);
        }
        report.chunks_added = self.index.rebuild(chunks).await?;
        info!("{}", report.summary());
        Ok(report)
    }

    /// Load and chunk `files` one at a time, reporting each
    async fn load_all(
        &self,
        files: &[PathBuf],
        mut on_file: impl FnMut(&FileReport) + Send,
    ) -> (BatchReport, Vec<DocumentChunk>) {
        let mut report = BatchReport::default();
        let mut chunks = Vec::new();

        for path in files {
            let source = path.display().to_string();
            let file_report = match self.loader.load(path).await {
                Ok(documents) => {
                    let file_chunks = self.chunker.split_documents(&documents);
                    debug!("{}: {} chunks", source, file_chunks.len());
                    let file_report = FileReport::loaded(&source, file_chunks.len());
                    chunks.extend(file_chunks);
                    file_report
                }
                Err(e) => {
                    warn!("Skipping {}: {}", source, e);
                    FileReport::failed(&source, &e)
                }
            };
            on_file(&file_report);
            report.files.push(file_report);
        }

        (report, chunks)
    }
}

/// Expand directories into their supported files; plain files pass through
fn expand_paths(paths: &[PathBuf]) -> Vec<PathBuf> {
    paths
        .iter()
        .flat_map(|path| {
            if path.is_dir() {
                supported_files(path)
            } else {
                vec![path.clone()]
            }
        })
        .collect()
}

/// Supported files under `dir`, sorted for a stable ingestion order
fn supported_files(dir: &Path) -> Vec<PathBuf> {
    if !dir.exists() {
        debug!("{} does not exist", dir.display());
        return Vec::new();
    }
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", dir.display(), e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| DocumentFormat::is_supported(path))
        .collect();
    files.sort();
    files
}
