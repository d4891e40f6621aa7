use super::*;
use serde_json::json;

fn chunker(chunk_size: usize, chunk_overlap: usize) -> TextChunker {
    TextChunker::new(ChunkingConfig {
        chunk_size,
        chunk_overlap,
    })
    .expect("valid chunking config")
}

fn sample_manual() -> String {
    let mut text = String::new();
    for section in 1..=12 {
        text.push_str(&format!("Section {}\n\n", section));
        for sentence in 1..=6 {
            text.push_str(&format!(
                "Sentence {} of section {} describes the device in plain words. ",
                sentence, section
            ));
        }
        text.push_str("\n\n");
    }
    text
}

#[test]
fn default_config() {
    let config = ChunkingConfig::default();
    assert_eq!(config.chunk_size, 500);
    assert_eq!(config.chunk_overlap, 50);
}

#[test]
fn overlap_must_be_smaller_than_size() {
    let result = TextChunker::new(ChunkingConfig {
        chunk_size: 100,
        chunk_overlap: 100,
    });
    assert!(matches!(result, Err(ConfigError::OverlapTooLarge(100, 100))));

    let result = TextChunker::new(ChunkingConfig {
        chunk_size: 0,
        chunk_overlap: 0,
    });
    assert!(matches!(result, Err(ConfigError::InvalidChunkSize(0))));
}

#[test]
fn short_text_is_one_chunk() {
    let chunks = chunker(500, 50).split_text("  The X200 battery lasts 12 hours.\n");
    assert_eq!(chunks, vec!["The X200 battery lasts 12 hours.".to_string()]);
}

#[test]
fn empty_text_has_no_chunks() {
    assert!(chunker(500, 50).split_text("").is_empty());
    assert!(chunker(500, 50).split_text(" \n\n \n").is_empty());
}

#[test]
fn paragraphs_split_first() {
    let chunks = chunker(30, 0).split_text("First paragraph here.\n\nSecond paragraph here.");
    assert_eq!(chunks, vec!["First paragraph here.", "Second paragraph here."]);
}

#[test]
fn words_merge_up_to_size() {
    let chunks = chunker(12, 0).split_text("alpha beta gamma delta");
    assert_eq!(chunks, vec!["alpha beta", "gamma delta"]);
}

#[test]
fn overlap_carries_trailing_pieces() {
    let chunks = chunker(12, 6).split_text("alpha beta gamma delta");
    assert_eq!(chunks, vec!["alpha beta", "beta gamma", "gamma delta"]);
}

#[test]
fn hard_cut_without_separators() {
    let chunks = chunker(10, 0).split_text("abcdefghijklmnopqrstuvwxy");
    assert_eq!(chunks, vec!["abcdefghij", "klmnopqrst", "uvwxy"]);

    let chunks = chunker(10, 3).split_text("abcdefghijklmnopqrstuvwxy");
    assert_eq!(
        chunks,
        vec!["abcdefghij", "hijklmnopq", "opqrstuvwx", "vwxy"]
    );
}

#[test]
fn oversized_word_falls_back_to_characters() {
    let chunks = chunker(10, 0).split_text("tiny supercalifragilistic end");
    assert_eq!(chunks, vec!["tiny", "supercali", "fragilisti", "c", "end"]);
}

#[test]
fn lengths_count_characters_not_bytes() {
    let chunks = chunker(5, 0).split_text("héllo wörld");
    assert_eq!(chunks, vec!["héllo", "wörl", "d"]);
}

#[test]
fn chunks_respect_size_limit() {
    let text = sample_manual();
    let chunks = chunker(200, 20).split_text(&text);

    assert!(chunks.len() > 10);
    for chunk in &chunks {
        assert!(chunk.chars().count() <= 200, "chunk too long: {}", chunk);
        assert_eq!(chunk.trim(), chunk);
    }
}

#[test]
fn chunking_is_idempotent() {
    let text = sample_manual();
    let chunker = chunker(500, 50);

    assert_eq!(chunker.split_text(&text), chunker.split_text(&text));
}

#[test]
fn chunks_inherit_document_metadata() {
    let mut metadata = Metadata::new();
    metadata.insert("source".to_string(), json!("manual.pdf"));
    metadata.insert("page".to_string(), json!(3));
    let documents = vec![
        Document::new("alpha beta gamma delta", metadata),
        Document::new("", Metadata::new()),
    ];

    let chunks = chunker(12, 0).split_documents(&documents);

    assert_eq!(chunks.len(), 2);
    for chunk in &chunks {
        assert_eq!(chunk.source(), Some("manual.pdf"));
        assert_eq!(chunk.metadata["page"], json!(3));
    }
}

#[test]
fn separators_stay_with_following_piece() {
    assert_eq!(
        split_keeping_separator("a\n\n\n\nb", "\n\n"),
        vec!["a", "\n\n", "\n\nb"]
    );
    assert_eq!(split_keeping_separator("\n\na", "\n\n"), vec!["\n\na"]);
    assert_eq!(split_keeping_separator("ab", ""), vec!["a", "b"]);
}

#[test]
fn separator_choice_skips_absent_separators() {
    let (separator, remaining) = choose_separator("one two", DEFAULT_SEPARATORS);
    assert_eq!(separator, " ");
    assert_eq!(remaining, &[""]);

    let (separator, remaining) = choose_separator("solid", DEFAULT_SEPARATORS);
    assert_eq!(separator, "");
    assert!(remaining.is_empty());
}
