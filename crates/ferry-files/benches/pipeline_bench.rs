//! Protect/restore pipeline benchmarks.
//!
//! Run with: `cargo bench -p ferry-files`

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use ferry_crypto::{RecipientKey, SealParams, StaticPassphrase};
use ferry_files::{
    ChecksumAccumulator, ChecksumKey, FileUnit, PipelineConfig, ProtectPipeline, RestorePipeline,
    StageToggles,
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tempfile::TempDir;

const FILE_SIZE: usize = 8 * 1024 * 1024;

/// Half random, half repetitive so compression has something to do.
fn mixed_data() -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(7);
    let mut data = vec![0u8; FILE_SIZE];
    rng.fill(&mut data[..FILE_SIZE / 2]);
    for (i, byte) in data[FILE_SIZE / 2..].iter_mut().enumerate() {
        *byte = (i % 64) as u8;
    }
    data
}

fn config() -> PipelineConfig {
    PipelineConfig {
        seal_params: SealParams::testing(),
        ..PipelineConfig::default()
    }
}

fn bench_checksum(c: &mut Criterion) {
    let key = ChecksumKey::derive("ferry bench");
    let data = mixed_data();

    let mut group = c.benchmark_group("checksum");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("8MiB", |b| {
        b.iter(|| {
            let mut acc = ChecksumAccumulator::new(&key);
            for chunk in data.chunks(64 * 1024) {
                acc.update(black_box(chunk)).unwrap();
            }
            acc.finalize().unwrap()
        })
    });
    group.finish();
}

fn bench_protect(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("input.bin");
    std::fs::write(&source, mixed_data()).unwrap();
    let unit = FileUnit::new(source.clone(), "input.bin", "000000_input.bin", FILE_SIZE as u64, false);
    let recipient = RecipientKey::generate().unwrap();
    let output = dir.path().join("artifact");
    let cancel = AtomicBool::new(false);

    let mut group = c.benchmark_group("protect");
    group.throughput(Throughput::Bytes(FILE_SIZE as u64));
    group.sample_size(10);

    for (label, toggles) in [
        ("non_sensitive", StageToggles::non_sensitive()),
        ("sensitive", StageToggles::sensitive()),
    ] {
        let pipeline = ProtectPipeline::new(config(), toggles, ChecksumKey::derive("ferry bench"))
            .with_recipient(
                recipient.public_key(),
                Arc::new(StaticPassphrase::new("benchmark passphrase")),
            );
        group.bench_with_input(BenchmarkId::from_parameter(label), &toggles, |b, _| {
            b.iter(|| pipeline.protect(&unit, &output, &cancel).unwrap())
        });
    }
    group.finish();
}

fn bench_restore(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("input.bin");
    std::fs::write(&source, mixed_data()).unwrap();
    let unit = FileUnit::new(source.clone(), "input.bin", "000000_input.bin", FILE_SIZE as u64, false);
    let recipient = Arc::new(RecipientKey::generate().unwrap());
    let cancel = AtomicBool::new(false);

    let record = ProtectPipeline::new(
        config(),
        StageToggles::sensitive(),
        ChecksumKey::derive("ferry bench"),
    )
    .with_recipient(
        recipient.public_key(),
        Arc::new(StaticPassphrase::new("benchmark passphrase")),
    )
    .protect(&unit, &dir.path().join("artifact"), &cancel)
    .unwrap();

    let pipeline = RestorePipeline::new(config(), ChecksumKey::derive("ferry bench"), true)
        .with_recipient(recipient);
    let destination = dir.path().join("restored.bin");

    let mut group = c.benchmark_group("restore");
    group.throughput(Throughput::Bytes(FILE_SIZE as u64));
    group.sample_size(10);
    group.bench_function("sensitive", |b| {
        b.iter(|| {
            pipeline
                .restore(record.final_path(), &destination, &record, &cancel)
                .unwrap()
        })
    });
    group.finish();
}

criterion_group!(benches, bench_checksum, bench_protect, bench_restore);
criterion_main!(benches);
