//! WorkQueue throughput: uncontended push/pop and 1 producer vs 1 consumer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use netkit_runtime::WorkQueue;

fn push_pop_uncontended(c: &mut Criterion) {
    let mut group = c.benchmark_group("work_queue/uncontended");
    for &n in &[64usize, 1024, 16 * 1024] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            let q = WorkQueue::with_capacity(n);
            b.iter(|| {
                for i in 0..n {
                    q.push(i);
                }
                while let Some(v) = q.pop() {
                    black_box(v);
                }
            });
        });
    }
    group.finish();
}

fn producer_consumer(c: &mut Criterion) {
    const N: usize = 100_000;
    let mut group = c.benchmark_group("work_queue/spsc");
    group.throughput(Throughput::Elements(N as u64));
    group.sample_size(20);
    group.bench_function("100k", |b| {
        b.iter(|| {
            let q = Arc::new(WorkQueue::with_capacity(1024));
            let done = Arc::new(AtomicBool::new(false));

            let consumer = {
                let q = Arc::clone(&q);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    let mut got = 0usize;
                    while got < N {
                        match q.pop() {
                            Some(v) => {
                                black_box(v);
                                got += 1;
                            }
                            None if done.load(Ordering::Acquire) && q.is_empty() => break,
                            None => std::hint::spin_loop(),
                        }
                    }
                    got
                })
            };

            for i in 0..N {
                q.push(i);
            }
            done.store(true, Ordering::Release);
            assert_eq!(consumer.join().unwrap(), N);
        });
    });
    group.finish();
}

criterion_group!(benches, push_pop_uncontended, producer_consumer);
criterion_main!(benches);
