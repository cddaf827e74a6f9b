//! Write/drain benchmark for Buffer.

use commonware_bytepool::Buffer;
use criterion::{black_box, criterion_group, Criterion};

fn bench_write(c: &mut Criterion) {
    for chunk in [16, 256, 4_096] {
        let data = vec![0xAB; chunk];
        c.bench_function(
            &format!("{}/append chunk={} total=65536", module_path!(), chunk),
            |b| {
                b.iter(|| {
                    let mut buffer = Buffer::new();
                    for _ in 0..(65_536 / chunk) {
                        buffer.write(&data).unwrap();
                    }
                    black_box(buffer.capacity());
                })
            },
        );
    }
}

fn bench_write_to(c: &mut Criterion) {
    // Alternating writes and drains reuse the region through compaction
    let data = vec![0xAB; 1_024];
    let mut sink = Vec::with_capacity(1_024);
    c.bench_function(&format!("{}/interleaved chunk=1024", module_path!()), |b| {
        let mut buffer = Buffer::with_capacity(4_096);
        b.iter(|| {
            buffer.write(&data).unwrap();
            sink.clear();
            buffer.write_to(&mut sink).unwrap();
            black_box(sink.len());
        })
    });
}

criterion_group!(benches, bench_write, bench_write_to);
