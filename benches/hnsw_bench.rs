use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use hnsw_core::{Config, Space};

const DIM: usize = 32;

fn random_vectors(count: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut state = seed;
    let mut next = move || {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        ((state >> 33) as f32 / (1u32 << 31) as f32) - 1.0
    };
    (0..count)
        .map(|_| (0..DIM).map(|_| next()).collect())
        .collect()
}

struct HnswConfig {
    ef_construction: usize,
    m: usize,
}

fn bench_hnsw_insert(c: &mut Criterion) {
    let dataset = random_vectors(10_000, 1);
    let config = HnswConfig {
        ef_construction: 100,
        m: 16,
    };

    c.bench_function("hnsw_insert_10k", |b| {
        b.iter(|| {
            let index = Config::new(DIM)
                .space(Space::Euclidean)
                .ef_construction(config.ef_construction)
                .m(config.m)
                .build()
                .unwrap();

            for vec in &dataset {
                index.insert(vec, None).unwrap();
            }
        })
    });
}

fn bench_hnsw_incremental_insert(c: &mut Criterion) {
    let dataset = random_vectors(10_000, 1);
    let query = random_vectors(1, 2).remove(0);
    let config = HnswConfig {
        ef_construction: 100,
        m: 16,
    };

    c.bench_function("hnsw_incremental_insert", |b| {
        b.iter_batched(
            || {
                let index = Config::new(DIM)
                    .space(Space::Euclidean)
                    .ef_construction(config.ef_construction)
                    .m(config.m)
                    .build()
                    .unwrap();
                for vec in &dataset {
                    index.insert(vec, None).unwrap();
                }
                (index, query.clone())
            },
            |(index, query_vec)| {
                index.insert(black_box(&query_vec), None).unwrap();
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_search_layer(c: &mut Criterion) {
    let dataset = random_vectors(10_000, 1);
    let query = random_vectors(1, 3).remove(0);
    let config = HnswConfig {
        ef_construction: 100,
        m: 16,
    };

    let index = Config::new(DIM)
        .space(Space::Euclidean)
        .ef_construction(config.ef_construction)
        .m(config.m)
        .build()
        .unwrap();
    for vec in &dataset {
        index.insert(vec, None).unwrap();
    }

    c.bench_function("hnsw_search_k10", |b| {
        b.iter(|| {
            index.query(black_box(&query), 10, Some(32)).unwrap();
        })
    });
}

criterion_group!(
    benches,
    bench_hnsw_insert,
    bench_hnsw_incremental_insert,
    bench_search_layer
);
criterion_main!(benches);
