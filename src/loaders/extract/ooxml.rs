// Office Open XML extraction (docx / pptx)

use anyhow::{Context, Result};
use quick_xml::Reader;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::Event;
use serde_json::json;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::normalize_whitespace;
use crate::loaders::{Document, Metadata};

const WORD_BODY: &str = "word/document.xml";
const SLIDE_PREFIX: &str = "ppt/slides/slide";

/// Element names that delimit text in the two vocabularies we read
struct Vocabulary {
    text: &'static [u8],
    paragraph: &'static [u8],
    tab: &'static [u8],
    line_break: &'static [&'static [u8]],
    paragraph_separator: &'static str,
}

const WORDPROCESSING: Vocabulary = Vocabulary {
    text: b"w:t",
    paragraph: b"w:p",
    tab: b"w:tab",
    line_break: &[b"w:br", b"w:cr"],
    paragraph_separator: "\n\n",
};

const DRAWING: Vocabulary = Vocabulary {
    text: b"a:t",
    paragraph: b"a:p",
    tab: b"a:tab",
    line_break: &[b"a:br"],
    paragraph_separator: "\n",
};

pub fn word_document(path: &Path) -> Result<Vec<Document>> {
    let mut archive = open_archive(path)?;
    let xml = read_entry(&mut archive, WORD_BODY)?;
    let text = xml_to_text(&xml, &WORDPROCESSING)?;

    Ok(vec![Document::new(text, Metadata::new())])
}

/// All slides in presentation order, joined into a single document
pub fn presentation(path: &Path) -> Result<Vec<Document>> {
    let mut archive = open_archive(path)?;

    let mut slides: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| slide_number(name).map(|number| (number, name.to_string())))
        .collect();
    slides.sort_unstable_by_key(|(number, _)| *number);

    let mut texts = Vec::with_capacity(slides.len());
    for (_, name) in &slides {
        let xml = read_entry(&mut archive, name)?;
        let text = xml_to_text(&xml, &DRAWING)?;
        if !text.is_empty() {
            texts.push(text);
        }
    }

    let mut metadata = Metadata::new();
    metadata.insert("slides".to_string(), json!(slides.len()));
    Ok(vec![Document::new(texts.join("\n\n"), metadata)])
}

fn open_archive(path: &Path) -> Result<zip::ZipArchive<File>> {
    let file = File::open(path).context("Failed to open document")?;
    zip::ZipArchive::new(file).context("Not an Office Open XML package")
}

fn read_entry(archive: &mut zip::ZipArchive<File>, name: &str) -> Result<String> {
    let mut entry = archive
        .by_name(name)
        .with_context(|| format!("Package has no {} part", name))?;
    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .with_context(|| format!("Failed to read {}", name))?;
    Ok(xml)
}

fn slide_number(name: &str) -> Option<u32> {
    name.strip_prefix(SLIDE_PREFIX)?
        .strip_suffix(".xml")?
        .parse()
        .ok()
}

pub(crate) fn xml_to_text(xml: &str, vocabulary: &Vocabulary) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event().context("Malformed document XML")? {
            Event::Start(element) if element.name().as_ref() == vocabulary.text => {
                in_text = true;
            }
            Event::End(element) => {
                let name = element.name();
                if name.as_ref() == vocabulary.text {
                    in_text = false;
                } else if name.as_ref() == vocabulary.paragraph {
                    out.push_str(vocabulary.paragraph_separator);
                }
            }
            Event::Empty(element) => {
                let name = element.name();
                if name.as_ref() == vocabulary.tab {
                    out.push('\t');
                } else if vocabulary.line_break.contains(&name.as_ref()) {
                    out.push('\n');
                }
            }
            Event::Text(text) if in_text => {
                out.push_str(&text.decode().context("Invalid text encoding")?);
            }
            Event::GeneralRef(reference) if in_text => {
                if let Some(ch) = reference
                    .resolve_char_ref()
                    .context("Invalid character reference")?
                {
                    out.push(ch);
                } else {
                    let name = reference.decode().context("Invalid entity reference")?;
                    if let Some(resolved) = resolve_predefined_entity(&name) {
                        out.push_str(resolved);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(normalize_whitespace(&out))
}

#[cfg(test)]
pub(crate) fn wordprocessing_text(xml: &str) -> Result<String> {
    xml_to_text(xml, &WORDPROCESSING)
}
