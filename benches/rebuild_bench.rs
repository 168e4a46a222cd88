use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gdpck::checksum::checksum;
use gdpck::header::{Header, ProducerVersion};
use gdpck::io_stream::{PckWriter, Planned, Source};
use gdpck::Container;
use std::fs;
use std::io::Cursor;
use tempfile::TempDir;

fn bench_write_in_memory(c: &mut Criterion) {
    let data = vec![42u8; 1024 * 1024];

    c.bench_function("write_1mb_single_entry", |b| {
        b.iter(|| {
            let plan = vec![Planned::new(
                "bench.bin".into(),
                data.len() as u64,
                checksum(&data),
                0,
                Source::Staged(black_box(data.clone())),
            )];
            let writer = PckWriter::new(Cursor::new(Vec::new()), Header::new(ProducerVersion::current(), 0));
            writer.finish::<Cursor<Vec<u8>>>(plan, None).unwrap();
        })
    });
}

fn bench_add_rebuild(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let mut pck = Container::create(tmp.path().join("bench.pck"));
    let blob = vec![7u8; 64 * 1024];
    for i in 0..100 {
        pck.add(&format!("assets/file_{i:03}.bin"), &blob).unwrap();
    }

    c.bench_function("add_to_100x64k", |b| {
        b.iter(|| pck.add("assets/extra.bin", black_box(b"extra")).unwrap())
    });

    c.bench_function("add_delete_100x64k", |b| {
        b.iter(|| {
            pck.add("assets/extra.bin", b"extra").unwrap();
            pck.delete("assets/extra.bin").unwrap();
        })
    });
}

fn bench_pack_tree(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    for d in 0..10 {
        let dir = src.join(format!("dir_{d}"));
        fs::create_dir_all(&dir).unwrap();
        for f in 0..20 {
            fs::write(dir.join(format!("f_{f}.dat")), vec![(d * f) as u8; 4096]).unwrap();
        }
    }
    let out = tmp.path().join("packed.pck");

    c.bench_function("pack_200x4k", |b| {
        b.iter(|| {
            let mut pck = Container::create(&out);
            pck.pack(black_box(&src), true).unwrap()
        })
    });
}

criterion_group!(benches, bench_write_in_memory, bench_add_rebuild, bench_pack_tree);
criterion_main!(benches);
