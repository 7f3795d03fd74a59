use std::hint::black_box;

use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use extsort_rs::record::{RECORD_SIZE, Record, RecordOrder, sort_batch};

fn generate_records(count: usize, shared_prefix: usize) -> Vec<Record> {
    let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
    (0..count)
        .map(|_| {
            let mut record = Record::with_prefix(&[]);
            let bytes = record.as_mut_bytes();
            for b in bytes[..shared_prefix].iter_mut() {
                *b = b'x';
            }
            for b in bytes[shared_prefix..].iter_mut() {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                // Never zero, so both orders look at the whole record
                *b = (state as u8) | 1;
            }
            record
        })
        .collect()
}

fn bench_compare(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_compare");
    // Worst case: records differ only in the last byte
    let a = vec![b'k'; RECORD_SIZE];
    let mut b = a.clone();
    b[RECORD_SIZE - 1] = b'l';
    for order in [RecordOrder::Bytes, RecordOrder::NulTerminated] {
        group.bench_with_input(BenchmarkId::new(order.name(), "4096B"), &order, |bench, order| {
            bench.iter(|| order.compare(black_box(&a), black_box(&b)))
        });
    }
    group.finish();
}

fn bench_sort_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("sort_batch");
    for shared_prefix in [0, 64] {
        let records = generate_records(1000, shared_prefix);
        for order in [RecordOrder::Bytes, RecordOrder::NulTerminated] {
            group.bench_function(
                BenchmarkId::new(order.name(), format!("prefix{}", shared_prefix)),
                |bench| {
                    bench.iter_batched(
                        || {
                            records
                                .iter()
                                .map(|r| Record::with_prefix(r.as_bytes()))
                                .collect::<Vec<_>>()
                        },
                        |mut batch| sort_batch(black_box(&mut batch), order),
                        BatchSize::LargeInput,
                    )
                },
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_compare, bench_sort_batch);
criterion_main!(benches);
