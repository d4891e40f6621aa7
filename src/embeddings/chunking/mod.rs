#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::config::ConfigError;
use crate::loaders::{Document, Metadata};

/// Separators tried in order; the empty separator cuts between characters
pub const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];

/// A piece of a document small enough to embed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub text: String,
    /// Copy of the source document's metadata
    pub metadata: Metadata,
}

impl DocumentChunk {
    #[inline]
    pub fn new(text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            text: text.into(),
            metadata,
        }
    }

    /// The `source` metadata entry, if it is a string
    #[inline]
    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(|v| v.as_str())
    }
}

/// Configuration for text chunking, measured in characters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk length
    pub chunk_size: usize,
    /// Characters shared between neighbouring chunks
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
        }
    }
}

/// Recursive character splitter.
///
/// Text is split on the first separator that occurs in it. Pieces that are
/// still too long are split again with the remaining separators, and the
/// short pieces are merged back together up to `chunk_size`, carrying up to
/// `chunk_overlap` characters from the end of one chunk into the next.
/// Separators stay attached to the start of the piece that follows them.
#[derive(Debug, Clone)]
pub struct TextChunker {
    config: ChunkingConfig,
}

impl TextChunker {
    #[inline]
    pub fn new(config: ChunkingConfig) -> Result<Self, ConfigError> {
        if config.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize(config.chunk_size));
        }
        if config.chunk_overlap >= config.chunk_size {
            return Err(ConfigError::OverlapTooLarge(
                config.chunk_overlap,
                config.chunk_size,
            ));
        }
        Ok(Self { config })
    }

    #[inline]
    pub fn config(&self) -> ChunkingConfig {
        self.config
    }

    /// Split each document, giving every chunk a copy of its metadata
    #[inline]
    pub fn split_documents(&self, documents: &[Document]) -> Vec<DocumentChunk> {
        let chunks: Vec<DocumentChunk> = documents
            .iter()
            .flat_map(|document| {
                self.split_text(&document.text)
                    .into_iter()
                    .map(|text| DocumentChunk::new(text, document.metadata.clone()))
            })
            .collect();

        debug!(
            "Split {} documents into {} chunks",
            documents.len(),
            chunks.len()
        );
        chunks
    }

    #[inline]
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, DEFAULT_SEPARATORS)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let (separator, remaining) = choose_separator(text, separators);
        let pieces = split_keeping_separator(text, separator);

        let mut chunks = Vec::new();
        let mut short_pieces: Vec<&str> = Vec::new();

        for piece in pieces {
            if char_len(piece) < self.config.chunk_size {
                short_pieces.push(piece);
                continue;
            }

            if !short_pieces.is_empty() {
                chunks.extend(self.merge_pieces(&short_pieces));
                short_pieces.clear();
            }

            if remaining.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_recursive(piece, remaining));
            }
        }

        if !short_pieces.is_empty() {
            chunks.extend(self.merge_pieces(&short_pieces));
        }

        chunks
    }

    fn merge_pieces(&self, pieces: &[&str]) -> Vec<String> {
        let ChunkingConfig {
            chunk_size,
            chunk_overlap,
        } = self.config;

        let mut chunks = Vec::new();
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0;

        for piece in pieces {
            let len = char_len(piece);

            if total + len > chunk_size && !window.is_empty() {
                if total > chunk_size {
                    warn!(
                        "Created a chunk of size {}, which is longer than the specified {}",
                        total, chunk_size
                    );
                }
                chunks.extend(join_window(&window));

                while total > chunk_overlap || (total + len > chunk_size && total > 0) {
                    match window.pop_front() {
                        Some((_, dropped)) => total -= dropped,
                        None => break,
                    }
                }
            }

            window.push_back((piece, len));
            total += len;
        }

        chunks.extend(join_window(&window));
        chunks
    }
}

fn choose_separator<'s>(text: &str, separators: &'s [&'s str]) -> (&'s str, &'s [&'s str]) {
    for (index, &separator) in separators.iter().enumerate() {
        if separator.is_empty() {
            return ("", &[]);
        }
        if text.contains(separator) {
            return (separator, separators.get(index + 1..).unwrap_or_default());
        }
    }
    (separators.last().copied().unwrap_or_default(), &[])
}

/// Split `text` before every occurrence of `separator`, dropping empty pieces
fn split_keeping_separator<'t>(text: &'t str, separator: &str) -> Vec<&'t str> {
    if separator.is_empty() {
        return text.split_inclusive(|_: char| true).collect();
    }

    let mut pieces = Vec::new();
    let mut rest = text;
    loop {
        let search_from = if rest.starts_with(separator) {
            separator.len()
        } else {
            0
        };
        match rest.get(search_from..).and_then(|tail| tail.find(separator)) {
            Some(offset) => {
                let (piece, tail) = rest.split_at(search_from + offset);
                pieces.push(piece);
                rest = tail;
            }
            None => {
                pieces.push(rest);
                break;
            }
        }
    }

    pieces.retain(|piece| !piece.is_empty());
    pieces
}

fn join_window(window: &VecDeque<(&str, usize)>) -> Option<String> {
    let joined: String = window.iter().map(|(piece, _)| *piece).collect();
    let trimmed = joined.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[inline]
fn char_len(text: &str) -> usize {
    text.chars().count()
}
