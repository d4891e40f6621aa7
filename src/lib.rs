use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Unsupported file format: {extension}")]
    UnsupportedFormat { extension: String },

    #[error("Failed to load {path}: {message}")]
    LoadFailure { path: String, message: String },

    #[error("Vector index at {path} is corrupt: {message}")]
    IndexCorrupt { path: String, message: String },

    #[error("Embedding dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Missing required configuration: {0}")]
    ConfigurationMissing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("No documents added")]
    NoDocumentsAdded,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl RagError {
    pub(crate) fn load_failure(path: impl AsRef<std::path::Path>, message: impl ToString) -> Self {
        Self::LoadFailure {
            path: path.as_ref().display().to_string(),
            message: message.to_string(),
        }
    }
}

pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod indexer;
pub mod llm;
pub mod loaders;
pub mod rag;
pub mod server;
pub mod transport;
