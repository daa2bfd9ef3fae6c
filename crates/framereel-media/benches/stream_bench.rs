//! Benchmarks for the stream cursor and seek engine.
//!
//! Driven by the scripted backend so the numbers measure the pipeline, not
//! a codec. Run with: cargo bench -p framereel-media

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use framereel_media::testing::ScriptedBackend;
use framereel_media::{DecoderOptions, Stream};

const ITERATIONS: i64 = 50;

fn open_stream(frame_count: i64) -> Stream<ScriptedBackend> {
    Stream::from_backend(
        ScriptedBackend::standard(frame_count),
        &DecoderOptions::default(),
    )
    .unwrap()
}

fn bench_sequential_seek(c: &mut Criterion) {
    // Each seek jumps forward by a fixed number of frames, then reads one
    // frame. Small jumps stay inside the buffers; large jumps reposition
    // the container every time.
    for jump_frames in [2i64, 25, 100] {
        c.bench_function(&format!("sequential_seek_{jump_frames}_frames"), |bencher| {
            bencher.iter(|| {
                let stream = open_stream(10_000);
                let jump = stream.frame_to_time(jump_frames);
                let mut position = jump;
                for _ in 0..ITERATIONS {
                    stream.seek(black_box(position)).unwrap();
                    black_box(stream.get_next_frame().unwrap().unwrap().frame_index());
                    position += jump;
                }
            });
        });
    }
}

fn bench_sequential_read(c: &mut Criterion) {
    c.bench_function("sequential_read_300_frames", |bencher| {
        bencher.iter(|| {
            let stream = open_stream(300);
            while let Some(frame) = stream.get_next_frame().unwrap() {
                black_box(frame.frame_index());
            }
        });
    });
}

criterion_group!(benches, bench_sequential_seek, bench_sequential_read);
criterion_main!(benches);
