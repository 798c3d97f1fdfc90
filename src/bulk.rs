//! Thread-count-driven parallel insert/query dispatch (component I).
//!
//! A negative thread count means "use every available core" (via
//! [`num_cpus`]); `1` means run inline on the calling thread with no
//! spawning at all. Otherwise a transient pool of that many workers steals
//! work items off a shared atomic counter, every worker joins before
//! `dispatch` returns, and the first error observed (others are dropped)
//! is what the caller sees.
use crate::error::{Error, Result};
use crate::hnsw::Engine;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

fn dispatch<R: Send>(n: usize, threads: i32, work: impl Fn(usize) -> Result<R> + Sync) -> Result<Vec<R>> {
    if n == 0 {
        return Ok(Vec::new());
    }
    if threads == 1 {
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            out.push(work(i)?);
        }
        return Ok(out);
    }

    let worker_count = if threads < 0 {
        num_cpus::get()
    } else {
        threads as usize
    }
    .max(1)
    .min(n);

    let counter = AtomicUsize::new(0);
    let error: Mutex<Option<Error>> = Mutex::new(None);
    let results: Mutex<Vec<Option<R>>> = Mutex::new((0..n).map(|_| None).collect());

    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            scope.spawn(|| loop {
                if error.lock().is_some() {
                    break;
                }
                let idx = counter.fetch_add(1, Ordering::Relaxed);
                if idx >= n {
                    break;
                }
                match work(idx) {
                    Ok(value) => results.lock()[idx] = Some(value),
                    Err(e) => {
                        let mut guard = error.lock();
                        if guard.is_none() {
                            *guard = Some(e);
                        }
                    }
                }
            });
        }
    });

    if let Some(e) = error.into_inner() {
        return Err(e);
    }
    Ok(results
        .into_inner()
        .into_iter()
        .map(|slot| slot.expect("every index in 0..n is produced exactly once"))
        .collect())
}

/// Insert a batch of `(vector, label)` pairs, returning the resolved label
/// for each in input order. Labels repeated within the same batch are
/// rejected up front as `DuplicateLabel`, before any worker is spawned,
/// since cross-worker ordering for colliding labels is otherwise undefined.
#[tracing::instrument(skip_all)]
pub(crate) fn insert_many(engine: &Engine, items: &[(Vec<f32>, Option<u64>)], threads: i32) -> Result<Vec<u64>> {
    let mut seen = HashSet::new();
    for (_, label) in items {
        if let Some(label) = label {
            if !seen.insert(*label) {
                return Err(Error::DuplicateLabel(*label));
            }
        }
    }
    dispatch(items.len(), threads, |i| {
        let (vector, label) = &items[i];
        engine.insert(vector, *label)
    })
}

/// Query a batch of vectors, returning each query's top-k results in input
/// order.
#[tracing::instrument(skip_all)]
pub(crate) fn query_many(
    engine: &Engine,
    queries: &[Vec<f32>],
    k: usize,
    ef: Option<usize>,
    threads: i32,
) -> Result<Vec<Vec<(u64, f32)>>> {
    dispatch(queries.len(), threads, |i| engine.query(&queries[i], k, ef))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::Space;
    use crate::storage::Storage;

    fn engine() -> Engine {
        Engine::new(4, Space::Euclidean, Storage::F32, 8, 50, 10, 1, 64)
    }

    #[test]
    fn insert_many_single_threaded_matches_sequential_inserts() {
        let e = engine();
        let items: Vec<(Vec<f32>, Option<u64>)> =
            (0..20u64).map(|i| (vec![i as f32, 0.0, 0.0, 0.0], Some(i))).collect();
        let labels = insert_many(&e, &items, 1).unwrap();
        assert_eq!(labels, (0..20u64).collect::<Vec<_>>());
        assert_eq!(e.graph().len(), 20);
    }

    #[test]
    fn insert_many_parallel_inserts_every_item() {
        let e = engine();
        let items: Vec<(Vec<f32>, Option<u64>)> =
            (0..200u64).map(|i| (vec![i as f32, 1.0, 0.0, 0.0], Some(i))).collect();
        let labels = insert_many(&e, &items, 4).unwrap();
        assert_eq!(labels.len(), 200);
        assert_eq!(e.graph().len(), 200);
        for i in 0..200u64 {
            assert!(e.get_vector(i).is_ok());
        }
    }

    #[test]
    fn insert_many_rejects_intra_batch_duplicate_labels() {
        let e = engine();
        let items = vec![
            (vec![0.0, 0.0, 0.0, 0.0], Some(1)),
            (vec![1.0, 0.0, 0.0, 0.0], Some(1)),
        ];
        assert!(matches!(
            insert_many(&e, &items, 4),
            Err(Error::DuplicateLabel(1))
        ));
    }

    #[test]
    fn query_many_all_cores_returns_one_result_set_per_query() {
        let e = engine();
        let items: Vec<(Vec<f32>, Option<u64>)> =
            (0..50u64).map(|i| (vec![i as f32, 0.0, 0.0, 0.0], Some(i))).collect();
        insert_many(&e, &items, 1).unwrap();
        let queries: Vec<Vec<f32>> = (0..50u64).map(|i| vec![i as f32, 0.0, 0.0, 0.0]).collect();
        let results = query_many(&e, &queries, 1, None, -1).unwrap();
        assert_eq!(results.len(), 50);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result[0].0, i as u64);
        }
    }
}
