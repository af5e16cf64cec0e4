//! Interpreter benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use softpty::discipline::{interpret, LineDiscipline, OutputProcessor, TtyModes};

fn bench_output_processing(c: &mut Criterion) {
    let mut group = c.benchmark_group("output");

    // Typical command output: short lines
    let listing = "drwxr-xr-x  2 root root 4096 Jan  1 00:00 bin\n".repeat(500);
    group.throughput(Throughput::Bytes(listing.len() as u64));

    group.bench_function("short_lines", |b| {
        b.iter(|| {
            let mut source = black_box(listing.as_bytes());
            let mut out = Vec::with_capacity(listing.len() * 2);
            interpret(&mut source, &mut out, &mut OutputProcessor::new()).unwrap();
            black_box(out)
        })
    });

    // No newlines at all: pure pass-through
    let blob = "x".repeat(64 * 1024);
    group.throughput(Throughput::Bytes(blob.len() as u64));

    group.bench_function("pass_through", |b| {
        b.iter(|| {
            let mut source = black_box(blob.as_bytes());
            let mut out = Vec::with_capacity(blob.len());
            interpret(&mut source, &mut out, &mut OutputProcessor::new()).unwrap();
            black_box(out)
        })
    });

    group.finish();
}

fn bench_line_discipline(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_discipline");

    // Typed commands with the occasional correction
    let typing = "git statsu\x7f\x7fus\r".repeat(200);
    group.throughput(Throughput::Bytes(typing.len() as u64));

    for (name, modes) in [("cooked_echo", TtyModes::cooked()), ("raw", TtyModes::raw())] {
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut source = black_box(typing.as_bytes());
                let mut out = Vec::with_capacity(typing.len());
                let mut discipline = LineDiscipline::new(modes, 4096, Vec::new(), || {});
                interpret(&mut source, &mut out, &mut discipline).unwrap();
                black_box((out, discipline.into_parts().0))
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_output_processing, bench_line_discipline);
criterion_main!(benches);
