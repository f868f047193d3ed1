use criterion::{black_box, criterion_group, criterion_main, Criterion};
use m2pack::crypto::{self, BufferFlag};
use m2pack::version::PackVersion;
use m2pack::{Archive, PackEntry};

fn bench_pipelines(c: &mut Criterion) {
    let data = vec![42u8; 1024 * 1024];
    let version = PackVersion::Os2f;

    c.bench_function("xor_1mb", |b| {
        b.iter(|| crypto::encrypt(version, BufferFlag::Xor, black_box(&data)))
    });
    c.bench_function("aes_1mb", |b| {
        b.iter(|| crypto::encrypt(version, BufferFlag::Aes, black_box(&data)))
    });
    c.bench_function("aes_zstd_1mb", |b| {
        b.iter(|| crypto::encrypt(version, BufferFlag::AesZstd, black_box(&data)))
    });
}

fn bench_decrypt(c: &mut Criterion) {
    let data = vec![42u8; 1024 * 1024];
    let version = PackVersion::Os2f;
    let (cipher, sizes) = crypto::encrypt(version, BufferFlag::AesZstd, &data).unwrap();

    c.bench_function("decrypt_aes_zstd_1mb", |b| {
        b.iter(|| {
            crypto::decrypt(version, BufferFlag::AesZstd, sizes, black_box(&cipher), "bench")
        })
    });
}

fn bench_save(c: &mut Criterion) {
    let data = vec![7u8; 256 * 1024];
    let dir = tempfile::tempdir().unwrap();

    c.bench_function("save_8_entries_256kb", |b| {
        let mut n = 0u32;
        b.iter(|| {
            let mut ar = Archive::create(PackVersion::Os2f);
            for i in 0..8 {
                ar.add_entry("", PackEntry::new(format!("file_{i}.bin"), data.clone()))
                    .unwrap();
            }
            n += 1;
            let header = dir.path().join(format!("bench_{n}.m2h"));
            let data_path = dir.path().join(format!("bench_{n}.m2d"));
            ar.save(&header, &data_path, None).unwrap();
        })
    });
}

criterion_group!(benches, bench_pipelines, bench_decrypt, bench_save);
criterion_main!(benches);
