use criterion::{Criterion, criterion_group, criterion_main};
use rag_chat::embeddings::{ChunkingConfig, TextChunker};
use std::hint::black_box;

fn sample_document() -> String {
    let paragraph = "The X200 ships with a 65 W charger and a removable battery. \
        Firmware updates are delivered over the air, and the device keeps the \
        previous image so a failed update can be rolled back.\nEach unit is \
        tested before shipping.";
    (0..400)
        .map(|i| format!("Section {}\n\n{}", i, paragraph))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let document = sample_document();
    let chunker = TextChunker::new(ChunkingConfig::default()).expect("default config is valid");
    c.bench_function("chunking", |b| {
        b.iter(|| chunker.split_text(black_box(&document)))
    });

    let small = TextChunker::new(ChunkingConfig {
        chunk_size: 200,
        chunk_overlap: 40,
    })
    .expect("valid config");
    c.bench_function("chunking_small", |b| {
        b.iter(|| small.split_text(black_box(&document)))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
