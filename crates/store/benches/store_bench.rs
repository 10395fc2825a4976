use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use store::{Constructor, Store};

const N_KEYS: usize = 10_000;
const VALUES_PER_KEY: usize = 4;
const VALUE_SIZE: usize = 32;

fn fill_constructor() -> Constructor {
    let mut cons = Constructor::new();
    for i in 0..N_KEYS {
        let key = format!("key{}", i).into_bytes();
        for j in 0..VALUES_PER_KEY {
            let mut value = vec![b'x'; VALUE_SIZE];
            value[..8].copy_from_slice(&((i * VALUES_PER_KEY + j) as u64).to_le_bytes());
            cons.add(&key, value);
        }
    }
    cons
}

fn build_store() -> Store {
    fill_constructor().build().unwrap()
}

fn store_build_benchmark(c: &mut Criterion) {
    c.bench_function("store_build_10k", |b| {
        b.iter_batched(
            fill_constructor,
            |cons| {
                black_box(cons.build().unwrap());
            },
            BatchSize::LargeInput,
        );
    });
}

fn store_load_benchmark(c: &mut Criterion) {
    let bytes = build_store().serialize();
    c.bench_function("store_load_10k", |b| {
        b.iter(|| {
            black_box(Store::from_bytes(bytes.clone()).unwrap());
        });
    });
}

fn store_get_hit_benchmark(c: &mut Criterion) {
    let db = build_store();
    let keys: Vec<Vec<u8>> = (0..N_KEYS).map(|i| format!("key{}", i).into_bytes()).collect();
    c.bench_function("store_get_hit_10k", |b| {
        b.iter(|| {
            for key in &keys {
                let n = db.get(key).iter().count();
                assert_eq!(n, VALUES_PER_KEY);
            }
        });
    });
}

fn store_get_miss_benchmark(c: &mut Criterion) {
    let db = build_store();
    let keys: Vec<Vec<u8>> = (0..N_KEYS)
        .map(|i| format!("missing{}", i).into_bytes())
        .collect();
    c.bench_function("store_get_miss_10k", |b| {
        b.iter(|| {
            for key in &keys {
                assert!(db.get(key).is_empty());
            }
        });
    });
}

criterion_group!(
    benches,
    store_build_benchmark,
    store_load_benchmark,
    store_get_hit_benchmark,
    store_get_miss_benchmark
);
criterion_main!(benches);
