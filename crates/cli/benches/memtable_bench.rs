use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use memtable::Memtable;

const N_KEYS: u64 = 10_000;

fn memtable_put_benchmark(c: &mut Criterion) {
    c.bench_function("memtable_put_10k", |b| {
        b.iter_batched(
            Memtable::new,
            |mut mem| {
                for i in 0..N_KEYS {
                    mem.put(&i.to_be_bytes(), &i.to_be_bytes()).unwrap();
                }
                mem
            },
            BatchSize::SmallInput,
        );
    });
}

fn memtable_get_benchmark(c: &mut Criterion) {
    let mut mem = Memtable::new();
    for i in 0..N_KEYS {
        mem.put(&i.to_be_bytes(), &i.to_be_bytes()).unwrap();
    }
    c.bench_function("memtable_get_10k", |b| {
        b.iter(|| {
            for i in 0..N_KEYS {
                assert!(mem.get(&i.to_be_bytes()).is_some());
            }
        });
    });
}

criterion_group!(benches, memtable_put_benchmark, memtable_get_benchmark);
criterion_main!(benches);
