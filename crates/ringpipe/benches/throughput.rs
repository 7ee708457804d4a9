//! Fast-path throughput: uncontended submit/consume pairs.

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use ringpipe::{BatchBuffer, BufferConfig, DType};
use std::time::Duration;

fn bench_submit_consume(c: &mut Criterion) {
    let buf = BatchBuffer::new(
        BufferConfig::new("bench", DType::F32)
            .with_ring_expo(8)
            .with_batch_expo(8),
    )
    .unwrap();
    let batch = buf.batch_capacity();
    let timeout = Duration::from_millis(1);

    let mut group = c.benchmark_group("buffer");
    group.throughput(Throughput::Elements(batch as u64));
    group.bench_function("submit_consume_256", |b| {
        b.iter(|| {
            let mut slot = buf.get_head();
            slot.t_ns = 0;
            slot.period_ns = 1000;
            slot.data_mut::<f32>().fill(1.0);
            slot.set_head(batch);
            slot.submit(timeout).unwrap();

            let tail = buf.get_tail(timeout).unwrap();
            let sum: f32 = tail.samples::<f32>().iter().sum();
            tail.finish();
            sum
        });
    });
    group.finish();
}

criterion_group!(benches, bench_submit_consume);
criterion_main!(benches);
