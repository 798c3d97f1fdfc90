use hnsw_core::{Config, Error, Index, Space, Storage};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn random_unit_vectors(count: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let mut v: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                for x in v.iter_mut() {
                    *x /= norm;
                }
            }
            v
        })
        .collect()
}

#[test]
fn single_vector_exact_match() {
    let index = Config::new(4).space(Space::Euclidean).build().unwrap();
    index.insert(&[1.0, 0.0, 0.0, 0.0], None).unwrap();
    let results = index.query(&[1.0, 0.0, 0.0, 0.0], 1, None).unwrap();
    assert_eq!(results, vec![(0, 0.0)]);
}

#[test]
fn inner_product_three_point_distances() {
    let index = Config::new(2).space(Space::InnerProduct).build().unwrap();
    index.insert(&[1.0, 0.0], Some(10)).unwrap();
    index.insert(&[0.0, 1.0], Some(20)).unwrap();
    index.insert(&[-1.0, 0.0], Some(30)).unwrap();

    let results = index.query(&[1.0, 0.0], 3, None).unwrap();
    let labels: Vec<u64> = results.iter().map(|(l, _)| *l).collect();
    assert_eq!(labels, vec![10, 20, 30]);
    for ((_, dist), expected) in results.iter().zip([0.0, 1.0, 2.0]) {
        assert!((dist - expected).abs() < 1e-5);
    }
}

#[test]
fn cosine_f32_self_recall_is_exact_on_two_thousand_random_vectors() {
    let vectors = random_unit_vectors(2000, 32, 7);
    let index = Config::new(32)
        .space(Space::Cosine)
        .storage(Storage::F32)
        .max_elements(2048)
        .build()
        .unwrap();

    for (i, v) in vectors.iter().enumerate() {
        index.insert(v, Some(i as u64)).unwrap();
    }

    let mut hits = 0;
    for (i, v) in vectors.iter().enumerate() {
        let results = index.query(v, 1, None).unwrap();
        if results[0].0 == i as u64 && results[0].1 <= 1e-5 {
            hits += 1;
        }
    }
    assert_eq!(hits, vectors.len(), "expected recall 1.0, got {hits}/{}", vectors.len());
}

#[test]
fn cosine_i8_scaled_self_recall_is_at_least_ninety_nine_percent() {
    let vectors = random_unit_vectors(2000, 32, 7);
    let index = Config::new(32)
        .space(Space::Cosine)
        .storage(Storage::I8Scaled)
        .max_elements(2048)
        .build()
        .unwrap();

    for (i, v) in vectors.iter().enumerate() {
        index.insert(v, Some(i as u64)).unwrap();
    }

    let mut hits = 0;
    for (i, v) in vectors.iter().enumerate() {
        let results = index.query(v, 1, None).unwrap();
        if results[0].0 == i as u64 && results[0].1 <= 0.10 {
            hits += 1;
        }
    }
    let recall = hits as f64 / vectors.len() as f64;
    assert!(recall >= 0.99, "recall {recall} below 99%");
}

#[test]
fn e4m3_storage_only_promises_structural_invariants() {
    // Precision is too coarse for self-recall; only graph symmetry,
    // neighbor capacity, and round-trip survival are checked here.
    let vectors = random_unit_vectors(300, 16, 11);
    let index = Config::new(16)
        .space(Space::Cosine)
        .storage(Storage::E4M3)
        .m(8)
        .max_elements(512)
        .build()
        .unwrap();
    for (i, v) in vectors.iter().enumerate() {
        index.insert(v, Some(i as u64)).unwrap();
    }
    assert_eq!(index.len(), 300);

    let mut buf = Vec::new();
    index
        .save(&mut hnsw_core::serialize::IoByteSink::new(std::io::Cursor::new(&mut buf)))
        .unwrap();
    let reloaded = Index::load(&mut hnsw_core::serialize::IoByteSource::new(std::io::Cursor::new(
        buf,
    )))
    .unwrap();
    assert_eq!(reloaded.len(), index.len());
    assert_eq!(reloaded.query(&vectors[0], 5, None).unwrap(), index.query(&vectors[0], 5, None).unwrap());
}

#[test]
fn soft_delete_hides_label_but_keeps_its_vector_queryable() {
    let index = Config::new(3).space(Space::Euclidean).max_elements(128).build().unwrap();
    for i in 0..100u64 {
        let v = [i as f32, (i as f32) * 0.1, (i as f32) * 0.01];
        index.insert(&v, Some(i)).unwrap();
    }

    index.mark_deleted(42).unwrap();
    assert!(index.get_vector(42).is_ok());

    let v42 = [42.0, 4.2, 0.42];
    let results = index.query(&v42, 1, None).unwrap();
    assert_ne!(results[0].0, 42);
}

#[test]
fn loading_a_file_with_a_flipped_crc_byte_fails_with_format_error() {
    let index = Config::new(4).build().unwrap();
    for i in 0..20u64 {
        index.insert(&[i as f32, 0.0, 0.0, 1.0], Some(i)).unwrap();
    }
    let mut buf = Vec::new();
    index
        .save(&mut hnsw_core::serialize::IoByteSink::new(std::io::Cursor::new(&mut buf)))
        .unwrap();
    let last = buf.len() - 1;
    buf[last] ^= 0x01;

    let result = Index::load(&mut hnsw_core::serialize::IoByteSource::new(std::io::Cursor::new(buf)));
    assert!(matches!(result, Err(Error::FormatError(_))));
}

#[test]
fn save_reload_then_insert_more_matches_a_never_saved_twin_built_with_the_same_seed() {
    let vectors = random_unit_vectors(150, 8, 55);
    let built_from_scratch = Config::new(8)
        .m(16)
        .ef_construction(200)
        .rng_seed(99)
        .max_elements(256)
        .build()
        .unwrap();
    let saved_then_reloaded = Config::new(8)
        .m(16)
        .ef_construction(200)
        .rng_seed(99)
        .max_elements(256)
        .build()
        .unwrap();

    for (i, v) in vectors.iter().take(100).enumerate() {
        built_from_scratch.insert(v, Some(i as u64)).unwrap();
        saved_then_reloaded.insert(v, Some(i as u64)).unwrap();
    }

    let mut buf = Vec::new();
    saved_then_reloaded
        .save(&mut hnsw_core::serialize::IoByteSink::new(std::io::Cursor::new(&mut buf)))
        .unwrap();
    let reloaded = Index::load(&mut hnsw_core::serialize::IoByteSource::new(std::io::Cursor::new(
        buf,
    )))
    .unwrap();

    for (i, v) in vectors.iter().enumerate().skip(100) {
        built_from_scratch.insert(v, Some(i as u64)).unwrap();
        reloaded.insert(v, Some(i as u64)).unwrap();
    }

    for q in vectors.iter().step_by(13) {
        assert_eq!(
            built_from_scratch.query(q, 5, None).unwrap(),
            reloaded.query(q, 5, None).unwrap()
        );
    }
}

#[test]
fn resize_rejects_shrinking_below_current_node_count() {
    let index = Config::new(2).build().unwrap();
    for i in 0..10u64 {
        index.insert(&[i as f32, 0.0], Some(i)).unwrap();
    }
    assert!(matches!(index.resize(5), Err(Error::InvalidArgument(_))));
    assert!(index.resize(100).is_ok());
}

#[test]
fn save_to_file_and_load_from_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.voy1");

    let index = Config::new(3).build().unwrap();
    for i in 0..25u64 {
        index.insert(&[i as f32, 1.0, -1.0], Some(i)).unwrap();
    }
    index.save_to_file(&path).unwrap();

    let reloaded = Index::load_from_file(&path).unwrap();
    assert_eq!(reloaded.len(), index.len());
    assert_eq!(
        reloaded.query(&[10.0, 1.0, -1.0], 3, None).unwrap(),
        index.query(&[10.0, 1.0, -1.0], 3, None).unwrap()
    );
}
