use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use quarry_index::chunker::{ChunkerConfig, chunk_file};
use quarry_index::keyword::Bm25Index;
use std::fmt::Write;
use std::hint::black_box;

fn python_source(functions: usize) -> String {
    let mut src = String::from("import os\n\n");
    for i in 0..functions {
        let _ = write!(
            src,
            "def handler_{i}(request, retries=3):\n    \"\"\"Handle request {i}.\"\"\"\n    for attempt in range(retries):\n        if request.ok:\n            return attempt\n    return None\n\n"
        );
    }
    src
}

fn markdown_source(sections: usize) -> String {
    let mut src = String::from("# Guide\n\nIntro paragraph for the guide.\n\n");
    for i in 0..sections {
        let _ = write!(
            src,
            "## Section {i}\n\nThis section explains step {i} of the deployment process. It has a few sentences. Each one is short.\n\n```sh\n# not a heading\nrun step {i}\n```\n\n"
        );
    }
    src
}

fn chunking(c: &mut Criterion) {
    let config = ChunkerConfig::default();
    let mut group = c.benchmark_group("chunk_file");

    for size in [10, 100, 500] {
        let py = python_source(size);
        group.bench_with_input(BenchmarkId::new("python", size), &py, |b, src| {
            b.iter(|| chunk_file("bench.py", black_box(src), &config));
        });

        let md = markdown_source(size);
        group.bench_with_input(BenchmarkId::new("markdown", size), &md, |b, src| {
            b.iter(|| chunk_file("bench.md", black_box(src), &config));
        });

        let lines: String = (0..size * 10).fold(String::new(), |mut acc, i| {
            let _ = writeln!(acc, "line {i} of an unsupported structure");
            acc
        });
        group.bench_with_input(BenchmarkId::new("lines", size), &lines, |b, src| {
            b.iter(|| chunk_file("bench.sql", black_box(src), &config));
        });
    }

    group.finish();
}

fn bm25(c: &mut Criterion) {
    let mut group = c.benchmark_group("bm25");

    for docs in [100, 1_000, 10_000] {
        let corpus: Vec<(String, String)> = (0..docs)
            .map(|i| {
                (
                    format!("doc{i}"),
                    format!("def handler_{i}(request): return parse_{} request body {}", i % 17, i % 5),
                )
            })
            .collect();

        group.bench_with_input(BenchmarkId::new("build", docs), &corpus, |b, corpus| {
            b.iter(|| Bm25Index::build(black_box(corpus.iter().map(|(a, b)| (a.as_str(), b.as_str())))));
        });

        let index = Bm25Index::build(corpus.iter().map(|(a, b)| (a.as_str(), b.as_str())));
        group.bench_with_input(BenchmarkId::new("query", docs), &index, |b, index| {
            b.iter(|| index.query(black_box("parse_3 request body"), 20));
        });
    }

    group.finish();
}

criterion_group!(benches, chunking, bm25);
criterion_main!(benches);
