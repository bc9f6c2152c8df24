//! Throughput Benchmark for RelayKV
//!
//! This benchmark measures the pieces on the request path: the SPSC queue
//! handoff, the tokenizer and the storage engine.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use relaykv::protocol::{frame_length, tokenize};
use relaykv::queue;
use relaykv::storage::StorageEngine;
use std::thread;
use std::time::Duration;

/// Benchmark push/pop on one thread
fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue");
    group.throughput(Throughput::Elements(1));

    group.bench_function("push_pop", |b| {
        let (mut tx, mut rx) = queue::bounded::<u64>(1024).unwrap();
        let mut i = 0u64;
        b.iter(|| {
            let _ = tx.push(black_box(i));
            black_box(rx.pop());
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark a producer thread feeding a consumer thread
fn bench_queue_cross_thread(c: &mut Criterion) {
    const ITEMS: u64 = 100_000;

    let mut group = c.benchmark_group("queue_cross_thread");
    group.throughput(Throughput::Elements(ITEMS));
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("transfer_100k", |b| {
        b.iter(|| {
            let (mut tx, mut rx) = queue::bounded::<u64>(1024).unwrap();
            let producer = thread::spawn(move || {
                for mut item in 0..ITEMS {
                    while let Err(back) = tx.push(item) {
                        item = back;
                        std::hint::spin_loop();
                    }
                }
            });

            let mut received = 0;
            while received < ITEMS {
                if let Some(item) = rx.pop() {
                    black_box(item);
                    received += 1;
                }
            }
            producer.join().unwrap();
        });
    });

    group.finish();
}

/// Benchmark tokenizing and framing requests
fn bench_tokenizer(c: &mut Criterion) {
    let set = b"*5\r\n$3\r\nSET\r\n$8\r\nkey:1234\r\n$11\r\nsmall_value\r\n$2\r\npx\r\n$4\r\n1000\r\n";
    let pipeline: Vec<u8> = set.iter().copied().cycle().take(set.len() * 16).collect();

    let mut group = c.benchmark_group("tokenizer");

    group.throughput(Throughput::Bytes(set.len() as u64));
    group.bench_function("tokenize_set", |b| {
        b.iter(|| black_box(tokenize(black_box(set)).unwrap()));
    });

    group.throughput(Throughput::Elements(16));
    group.bench_function("frame_pipeline_16", |b| {
        b.iter(|| {
            let mut offset = 0;
            while let Ok(Some(len)) = frame_length(&pipeline[offset..]) {
                offset += len;
            }
            black_box(offset)
        });
    });

    group.finish();
}

/// Benchmark SET and GET
fn bench_storage(c: &mut Criterion) {
    let mut group = c.benchmark_group("storage");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_small", |b| {
        let mut engine = StorageEngine::new();
        let value = Bytes::from("small_value");
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            black_box(engine.set(key, value.clone(), None));
            i += 1;
        });
    });

    group.bench_function("set_with_ttl", |b| {
        let mut engine = StorageEngine::new();
        let value = Bytes::from("small_value");
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            black_box(engine.set(key, value.clone(), Some(Duration::from_secs(60))));
            i += 1;
        });
    });

    let mut engine = StorageEngine::new();
    for i in 0..100_000 {
        engine.set(
            Bytes::from(format!("key:{}", i)),
            Bytes::from(format!("value:{}", i)),
            None,
        );
    }

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 100_000);
            black_box(engine.get(key.as_bytes()));
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("missing:{}", i);
            black_box(engine.get(key.as_bytes()));
            i += 1;
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_queue,
    bench_queue_cross_thread,
    bench_tokenizer,
    bench_storage
);
criterion_main!(benches);
