// Text extraction for each supported document format.
// Every extractor is synchronous; callers run them on the blocking pool.


pub mod markup;
pub mod ooxml;

use anyhow::{Context, Result, anyhow};
use itertools::Itertools;
use serde_json::json;
use std::fs;
use std::path::Path;
use tracing::debug;

use super::{Document, DocumentFormat, Metadata};

/// Extract documents from a file whose format has already been resolved.
///
/// Images are not handled here because they go through the OCR engine.
pub fn extract(format: DocumentFormat, path: &Path) -> Result<Vec<Document>> {
    match format {
        DocumentFormat::PlainText => plain_text(path),
        DocumentFormat::Pdf => pdf(path),
        DocumentFormat::WordDocument => ooxml::word_document(path),
        DocumentFormat::Presentation => ooxml::presentation(path),
        DocumentFormat::Html => markup::html(path),
        DocumentFormat::Csv => csv_table(path),
        DocumentFormat::Markdown => markup::markdown(path),
        DocumentFormat::Image => Err(anyhow!("images are loaded through OCR")),
    }
}

pub fn plain_text(path: &Path) -> Result<Vec<Document>> {
    let bytes = fs::read(path).context("Failed to read text file")?;
    let text = String::from_utf8(bytes).context("File is not valid UTF-8")?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text).to_string();

    Ok(vec![Document::new(text, Metadata::new())])
}

/// One document per page, pages numbered from zero
pub fn pdf(path: &Path) -> Result<Vec<Document>> {
    let document = lopdf::Document::load(path).context("Failed to parse PDF")?;
    let pages = document.get_pages();
    debug!("PDF {} has {} pages", path.display(), pages.len());

    let mut documents = Vec::with_capacity(pages.len());
    for (index, page_number) in pages.keys().enumerate() {
        let text = document
            .extract_text(&[*page_number])
            .with_context(|| format!("Failed to extract text from page {}", page_number))?;

        let mut metadata = Metadata::new();
        metadata.insert("page".to_string(), json!(index));
        metadata.insert("total_pages".to_string(), json!(pages.len()));
        documents.push(Document::new(text, metadata));
    }

    Ok(documents)
}

/// Rows become lines, cells are separated by commas
pub fn csv_table(path: &Path) -> Result<Vec<Document>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .context("Failed to open CSV file")?;

    let mut lines = Vec::new();
    for record in reader.records() {
        let record = record.context("Malformed CSV record")?;
        let line = record.iter().map(str::trim).join(", ");
        if !line.is_empty() {
            lines.push(line);
        }
    }

    let mut metadata = Metadata::new();
    metadata.insert("rows".to_string(), json!(lines.len()));
    Ok(vec![Document::new(lines.join("\n"), metadata)])
}

/// Collapse runs of inline whitespace and squeeze blank lines down to one
pub(crate) fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_blank = false;

    for line in text.lines() {
        let line = line.split_whitespace().join(" ");
        if line.is_empty() {
            pending_blank = !out.is_empty();
            continue;
        }

        if !out.is_empty() {
            out.push_str(if pending_blank { "\n\n" } else { "\n" });
        }
        out.push_str(&line);
        pending_blank = false;
    }

    out
}
