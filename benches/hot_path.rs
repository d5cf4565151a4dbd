use criterion::{black_box, criterion_group, criterion_main, Criterion};

use shellpilot::fc::extract_function_calls;
use shellpilot::segment::StreamSegmenter;

fn build_stream(repeats: usize) -> String {
    let mut out = String::new();
    for i in 0..repeats {
        out.push_str("Some prose before the model decides to act. ");
        out.push_str("<think>weighing options, considering the workspace layout</think>");
        out.push_str("More prose. ");
        out.push_str("<function_calls><invoke name=\"grep_search\">");
        out.push_str("<parameter name=\"query\">needle_");
        out.push_str(&i.to_string());
        out.push_str("</parameter></invoke></function_calls>");
    }
    out
}

fn chunked<'a>(text: &'a str, size: usize) -> Vec<&'a str> {
    let mut chunks = Vec::with_capacity(text.len() / size + 1);
    let mut rest = text;
    while rest.len() > size {
        let mut cut = size;
        while !rest.is_char_boundary(cut) {
            cut += 1;
        }
        let (head, tail) = rest.split_at(cut);
        chunks.push(head);
        rest = tail;
    }
    if !rest.is_empty() {
        chunks.push(rest);
    }
    chunks
}

fn bench_segmenter(c: &mut Criterion) {
    let stream = build_stream(64);
    let small_chunks = chunked(&stream, 17);
    let large_chunks = chunked(&stream, 4096);

    c.bench_function("segment_17_byte_chunks", |b| {
        b.iter(|| {
            let mut segmenter = StreamSegmenter::new();
            let mut out = Vec::new();
            for chunk in &small_chunks {
                segmenter.feed_into(black_box(chunk), &mut out);
                out.clear();
            }
            segmenter.finish_into(&mut out);
            black_box(&out);
        });
    });

    c.bench_function("segment_4k_chunks", |b| {
        b.iter(|| {
            let mut segmenter = StreamSegmenter::new();
            let mut out = Vec::new();
            for chunk in &large_chunks {
                segmenter.feed_into(black_box(chunk), &mut out);
                out.clear();
            }
            segmenter.finish_into(&mut out);
            black_box(&out);
        });
    });
}

fn bench_extractor(c: &mut Criterion) {
    let block = "<function_calls>\
        <invoke name=\"run_in_terminal\">\
        <parameter name=\"command\">cargo test --workspace</parameter>\
        <parameter name=\"explanation\">run the test suite</parameter>\
        <parameter name=\"isBackground\">false</parameter>\
        </invoke>\
        <invoke name=\"read_file\">\
        <parameter name=\"filePath\">src/lib.rs</parameter>\
        </invoke>\
        </function_calls>";

    c.bench_function("extract_two_invokes", |b| {
        b.iter(|| extract_function_calls(black_box(block)).expect("parse"));
    });
}

criterion_group!(benches, bench_segmenter, bench_extractor);
criterion_main!(benches);
