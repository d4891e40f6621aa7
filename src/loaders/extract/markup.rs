// HTML and Markdown to plain text

use anyhow::{Context, Result, anyhow};
use pulldown_cmark::{Event, Parser, TagEnd};
use scraper::{ElementRef, Html, Node, Selector};
use serde_json::json;
use std::fs;
use std::path::Path;

use super::normalize_whitespace;
use crate::loaders::{Document, Metadata};

const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "svg", "iframe", "head",
];

const BLOCK_TAGS: &[&str] = &[
    "address",
    "article",
    "aside",
    "blockquote",
    "dd",
    "div",
    "dl",
    "dt",
    "figcaption",
    "figure",
    "footer",
    "form",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "header",
    "hr",
    "li",
    "main",
    "nav",
    "ol",
    "p",
    "pre",
    "section",
    "table",
    "tr",
    "ul",
];

pub fn html(path: &Path) -> Result<Vec<Document>> {
    let source = fs::read_to_string(path).context("Failed to read HTML file")?;
    let (text, title) = html_to_text(&source)?;

    let mut metadata = Metadata::new();
    if let Some(title) = title {
        metadata.insert("title".to_string(), json!(title));
    }
    Ok(vec![Document::new(text, metadata)])
}

/// Visible text of an HTML document plus its `<title>`, if any
pub(crate) fn html_to_text(source: &str) -> Result<(String, Option<String>)> {
    let document = Html::parse_document(source);

    let title_selector =
        Selector::parse("title").map_err(|e| anyhow!("Invalid title selector: {:?}", e))?;
    let title = document
        .select(&title_selector)
        .next()
        .map(|element| normalize_whitespace(&element.text().collect::<String>()))
        .filter(|title| !title.is_empty());

    let mut raw = String::new();
    collect_text(document.root_element(), &mut raw);

    Ok((normalize_whitespace(&raw), title))
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let name = el.name();
                if SKIPPED_TAGS.contains(&name) {
                    continue;
                }
                if name == "br" {
                    out.push('\n');
                    continue;
                }

                let is_block = BLOCK_TAGS.contains(&name);
                if is_block {
                    out.push_str("\n\n");
                } else if name == "td" || name == "th" {
                    out.push(' ');
                }

                if let Some(child_element) = ElementRef::wrap(child) {
                    collect_text(child_element, out);
                }

                if is_block {
                    out.push_str("\n\n");
                }
            }
            _ => {}
        }
    }
}

pub fn markdown(path: &Path) -> Result<Vec<Document>> {
    let source = fs::read_to_string(path).context("Failed to read Markdown file")?;
    Ok(vec![Document::new(markdown_to_text(&source), Metadata::new())])
}

pub(crate) fn markdown_to_text(source: &str) -> String {
    let mut out = String::with_capacity(source.len());

    for event in Parser::new(source) {
        match event {
            Event::Text(text) | Event::Code(text) => out.push_str(&text),
            Event::SoftBreak => out.push(' '),
            Event::HardBreak => out.push('\n'),
            Event::End(
                TagEnd::Paragraph
                | TagEnd::Heading(_)
                | TagEnd::CodeBlock
                | TagEnd::Item
                | TagEnd::BlockQuote(_)
                | TagEnd::TableRow
                | TagEnd::TableHead,
            ) => out.push_str("\n\n"),
            Event::End(TagEnd::TableCell) => out.push(' '),
            _ => {}
        }
    }

    normalize_whitespace(&out)
}
