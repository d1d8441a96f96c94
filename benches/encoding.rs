use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use vgmtok::dataset::WorkUnit;
use vgmtok::transform::Variant;
use vgmtok::vgm::{Command, RegisterWrite, VgmFile, Wait};
use vgmtok::vocab::VocabularyAccumulator;

fn build_capture() -> VgmFile {
    let mut commands = Vec::with_capacity(64 * 1024);
    for frame in 0..8192u32 {
        commands.push(Command::Write(RegisterWrite::nes_apu(
            (frame % 8) as u8,
            (frame & 0xFF) as u8,
        )));
        commands.push(Command::Write(RegisterWrite::nes_apu(0x15, 0x0F)));
        commands.push(Command::Wait(if frame % 3 == 0 {
            Wait::NtscFrame
        } else {
            Wait::Short((frame % 16) as u8 + 1)
        }));
    }
    VgmFile::from_commands(commands)
}

fn bench_encoding(c: &mut Criterion) {
    let capture = build_capture();
    let bytes = capture.to_bytes();
    let mut accumulator = VocabularyAccumulator::new();
    accumulator.absorb(capture.commands());
    let (vocab, _) = accumulator.finish().expect("vocabulary");

    let mut group = c.benchmark_group("nes_capture");
    group.throughput(Throughput::Bytes(bytes.len() as u64));
    group.bench_function(BenchmarkId::from_parameter("parse"), |b| {
        b.iter(|| {
            let parsed = VgmFile::from_bytes(black_box(&bytes)).expect("parse");
            let _ = black_box(parsed);
        });
    });
    group.bench_function(BenchmarkId::from_parameter("encode_both_variants"), |b| {
        b.iter(|| {
            for variant in Variant::ALL {
                let unit = WorkUnit::encode(variant.apply(capture.commands()), &vocab)
                    .expect("encode");
                let _ = black_box(unit);
            }
        });
    });
    group.finish();
}

criterion_group!(benches, bench_encoding);
criterion_main!(benches);
