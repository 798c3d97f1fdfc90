use crate::distance::{l2_normalize, Space};
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::rng::LevelRng;
use crate::storage::Storage;
use crate::visited::VisitedPool;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicUsize, Ordering};
use parking_lot::Mutex;

/// Entry point and top level, published together under `structure` so a
/// reader never observes one updated without the other.
struct Structure {
    entry_point: Option<u32>,
    max_level: u32,
}

/// A single (distance, internal id) pair ordered by distance, ties broken by
/// ascending id for determinism (ties matter for the heuristic's accept/
/// reject comparisons and for stable query output ordering).
#[derive(Clone, Copy, Debug)]
struct DistItem {
    dist: f32,
    id: u32,
}

impl PartialEq for DistItem {
    fn eq(&self, other: &Self) -> bool {
        self.dist == other.dist && self.id == other.id
    }
}
impl Eq for DistItem {}
impl PartialOrd for DistItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for DistItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.dist.total_cmp(&other.dist).then(self.id.cmp(&other.id))
    }
}

/// The HNSW graph engine: layer assignment, greedy/beam search, heuristic
/// neighbor pruning, entry-point maintenance, soft delete, resize.
///
/// Locking discipline (§5): one neighbor-list lock per node (held inside
/// `Graph::Node`), one global `structure` lock guarding id allocation and
/// entry-point publication, and lock-free queries — `query` never touches
/// `structure` except for one brief read of the current entry point.
pub struct Engine {
    graph: Graph,
    space: Space,
    m: usize,
    m_max0: usize,
    ef_construction: usize,
    ef_default: AtomicUsize,
    inv_log_m: f64,
    rng: LevelRng,
    visited: VisitedPool,
    structure: Mutex<Structure>,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dim: usize,
        space: Space,
        storage: Storage,
        m: usize,
        ef_construction: usize,
        ef_default: usize,
        rng_seed: u64,
        max_elements: u32,
    ) -> Self {
        Self {
            graph: Graph::new(dim, storage, max_elements),
            space,
            m,
            m_max0: 2 * m,
            ef_construction,
            ef_default: AtomicUsize::new(ef_default),
            inv_log_m: 1.0 / (m as f64).ln(),
            rng: LevelRng::new(rng_seed),
            visited: VisitedPool::new(max_elements.max(1) as usize),
            structure: Mutex::new(Structure {
                entry_point: None,
                max_level: 0,
            }),
        }
    }

    /// Reconstruct an engine from already-materialized state (used by the
    /// serializer on load).
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        graph: Graph,
        space: Space,
        m: usize,
        ef_construction: usize,
        ef_default: usize,
        rng_state: u64,
        entry_point: Option<u32>,
        max_level: u32,
    ) -> Self {
        let capacity = graph.max_elements().max(1) as usize;
        Self {
            graph,
            space,
            m,
            m_max0: 2 * m,
            ef_construction,
            ef_default: AtomicUsize::new(ef_default),
            inv_log_m: 1.0 / (m as f64).ln(),
            rng: LevelRng::from_state(rng_state),
            visited: VisitedPool::new(capacity),
            structure: Mutex::new(Structure {
                entry_point,
                max_level,
            }),
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn space(&self) -> Space {
        self.space
    }

    pub fn m(&self) -> usize {
        self.m
    }

    pub fn ef_construction(&self) -> usize {
        self.ef_construction
    }

    pub fn ef_default(&self) -> usize {
        self.ef_default.load(Ordering::Relaxed)
    }

    pub fn set_ef_default(&self, ef: usize) {
        self.ef_default.store(ef, Ordering::Relaxed);
    }

    pub fn rng_state(&self) -> u64 {
        self.rng.state()
    }

    pub fn entry_point(&self) -> Option<u32> {
        self.structure.lock().entry_point
    }

    pub fn max_level(&self) -> u32 {
        self.structure.lock().max_level
    }

    fn m_for_layer(&self, layer: u32) -> usize {
        if layer == 0 {
            self.m_max0
        } else {
            self.m
        }
    }

    fn distance_to(&self, q: &[f32], id: u32) -> f32 {
        let v = self.graph.decode_vector(id);
        self.space.distance(q, &v)
    }

    fn validate_dim(&self, v: &[f32]) -> Result<()> {
        if v.len() != self.graph.dim() {
            return Err(Error::DimensionMismatch {
                expected: self.graph.dim(),
                found: v.len(),
            });
        }
        Ok(())
    }

    /// Greedy descent with ef=1: repeatedly hop to the strictly-closer
    /// neighbor until no neighbor improves on the current node.
    fn greedy_search_layer(&self, q: &[f32], mut current: u32, layer: u32) -> u32 {
        let mut current_dist = self.distance_to(q, current);
        loop {
            let mut improved = false;
            for neighbor in self.graph.node(current).neighbors_at(layer) {
                let d = self.distance_to(q, neighbor);
                if d < current_dist {
                    current_dist = d;
                    current = neighbor;
                    improved = true;
                }
            }
            if !improved {
                break;
            }
        }
        current
    }

    /// Beam search over one layer starting from `entry_set`, returning up to
    /// `ef` visited nodes sorted ascending by distance to `q`. Deleted nodes
    /// are traversed and may be returned here; filtering them out of a final
    /// query result is the caller's job.
    fn search_layer(&self, q: &[f32], entry_set: &[u32], layer: u32, ef: usize) -> Vec<u32> {
        let mut visited = self.visited.acquire();
        let mut candidates: BinaryHeap<Reverse<DistItem>> = BinaryHeap::new();
        let mut results: BinaryHeap<DistItem> = BinaryHeap::new();

        for &id in entry_set {
            if visited.is_visited(id as usize) {
                continue;
            }
            visited.mark(id as usize);
            let d = self.distance_to(q, id);
            candidates.push(Reverse(DistItem { dist: d, id }));
            results.push(DistItem { dist: d, id });
        }
        while results.len() > ef {
            results.pop();
        }

        while let Some(Reverse(current)) = candidates.pop() {
            if results.len() >= ef {
                if let Some(worst) = results.peek() {
                    if current.dist > worst.dist {
                        break;
                    }
                }
            }
            for neighbor in self.graph.node(current.id).neighbors_at(layer) {
                if visited.is_visited(neighbor as usize) {
                    continue;
                }
                visited.mark(neighbor as usize);
                let d = self.distance_to(q, neighbor);
                if results.len() < ef {
                    candidates.push(Reverse(DistItem { dist: d, id: neighbor }));
                    results.push(DistItem { dist: d, id: neighbor });
                } else if let Some(&worst) = results.peek() {
                    if d < worst.dist {
                        candidates.push(Reverse(DistItem { dist: d, id: neighbor }));
                        results.push(DistItem { dist: d, id: neighbor });
                        results.pop();
                    }
                }
            }
        }

        results
            .into_sorted_vec()
            .into_iter()
            .map(|item| item.id)
            .collect()
    }

    /// Diversity-preserving neighbor selection: walking `candidates` closest
    /// first, admit `c` into the chosen set iff it is strictly closer to the
    /// query than to every neighbor already chosen.
    fn select_neighbors_heuristic(&self, q: &[f32], candidates: &[u32], m: usize) -> Vec<u32> {
        let mut selected: Vec<u32> = Vec::with_capacity(m);
        for &c in candidates {
            if selected.len() >= m {
                break;
            }
            let c_vec = self.graph.decode_vector(c);
            let dist_qc = self.space.distance(q, &c_vec);
            let mut admit = true;
            for &r in &selected {
                let r_vec = self.graph.decode_vector(r);
                if dist_qc >= self.space.distance(&c_vec, &r_vec) {
                    admit = false;
                    break;
                }
            }
            if admit {
                selected.push(c);
            }
        }
        selected
    }

    /// Add `other` as a neighbor of `node_id` at `layer`, re-running the
    /// heuristic over `node_id`'s own neighbor set (viewed from `node_id`)
    /// if the addition overflows capacity.
    fn add_neighbor_with_pruning(&self, node_id: u32, other: u32, layer: u32, capacity: usize) {
        let node = self.graph.node(node_id);
        node.with_neighbors_locked(|layers| {
            let Some(list) = layers.get_mut(layer as usize) else {
                return;
            };
            if list.contains(&other) {
                return;
            }
            list.push(other);
            if list.len() <= capacity {
                return;
            }
            let anchor = self.graph.decode_vector(node_id);
            let mut ranked: Vec<DistItem> = list
                .iter()
                .map(|&id| DistItem {
                    dist: self.space.distance(&anchor, &self.graph.decode_vector(id)),
                    id,
                })
                .collect();
            ranked.sort();
            let ranked_ids: Vec<u32> = ranked.iter().map(|d| d.id).collect();
            *list = self
                .select_neighbors_heuristic(&anchor, &ranked_ids, capacity)
                .into();
        });
    }

    fn connect(&self, u: u32, layer: u32, selected: &[u32]) {
        let capacity = self.m_for_layer(layer);
        for &r in selected {
            // Ascending-id processing order: never a source of deadlock here
            // (each side's update takes only its own node lock), but kept so
            // a future joint-lock refactor inherits the right order for free.
            if u < r {
                self.add_neighbor_with_pruning(u, r, layer, capacity);
                self.add_neighbor_with_pruning(r, u, layer, capacity);
            } else {
                self.add_neighbor_with_pruning(r, u, layer, capacity);
                self.add_neighbor_with_pruning(u, r, layer, capacity);
            }
        }
    }

    #[tracing::instrument(skip_all)]
    pub fn insert(&self, v: &[f32], label: Option<u64>) -> Result<u64> {
        self.validate_dim(v)?;
        let mut encoded_source = v.to_vec();
        if self.space.normalizes() {
            l2_normalize(&mut encoded_source);
        }
        let mut payload = Vec::new();
        self.graph.storage().encode(&encoded_source, &mut payload);
        let level = self.rng.draw_level(self.inv_log_m);

        let (id, label, is_first) = {
            let mut structure = self.structure.lock();
            let (id, label, was_empty) = if let Some(lbl) = label {
                if let Some(existing_id) = self.graph.internal_id_for(lbl) {
                    if self.graph.node(existing_id).is_deleted() {
                        self.graph
                            .reinsert_into_deleted_slot(existing_id, level, lbl, payload);
                        (existing_id, lbl, false)
                    } else {
                        return Err(Error::DuplicateLabel(lbl));
                    }
                } else {
                    let was_empty = self.graph.is_empty();
                    let id = self.graph.allocate(level, lbl, payload);
                    (id, lbl, was_empty)
                }
            } else {
                let was_empty = self.graph.is_empty();
                let provisional_label = self.graph.len() as u64;
                let id = self.graph.allocate(level, provisional_label, payload);
                (id, provisional_label, was_empty)
            };
            if was_empty {
                structure.entry_point = Some(id);
                structure.max_level = level;
            }
            (id, label, was_empty)
        };

        // `allocate` may have grown the graph's capacity contract past what
        // the visited pool was last sized to (geometric growth, graph.rs);
        // keep the pool's capacity tracking `N` per §4.C so a traversal can
        // never mark an id past the end of its mark array.
        self.visited.resize(self.graph.max_elements() as usize);

        if is_first {
            return Ok(label);
        }

        let (mut current, current_level) = {
            let structure = self.structure.lock();
            (
                structure.entry_point.expect("non-empty index has an entry point"),
                structure.max_level,
            )
        };

        for layer in (level + 1..=current_level).rev() {
            current = self.greedy_search_layer(&encoded_source, current, layer);
        }

        let mut entry_set = vec![current];
        let top = level.min(current_level);
        for layer in (0..=top).rev() {
            let candidates =
                self.search_layer(&encoded_source, &entry_set, layer, self.ef_construction);
            let selected =
                self.select_neighbors_heuristic(&encoded_source, &candidates, self.m_for_layer(layer));
            self.connect(id, layer, &selected);
            entry_set = selected;
            if entry_set.is_empty() {
                entry_set = vec![current];
            }
        }

        if level > current_level {
            let mut structure = self.structure.lock();
            if level > structure.max_level {
                structure.entry_point = Some(id);
                structure.max_level = level;
            }
        }

        Ok(label)
    }

    #[tracing::instrument(skip_all)]
    pub fn query(&self, q: &[f32], k: usize, ef: Option<usize>) -> Result<Vec<(u64, f32)>> {
        self.validate_dim(q)?;
        if k == 0 {
            return Err(Error::InvalidArgument("k must be at least 1".to_string()));
        }
        let mut encoded_source = q.to_vec();
        if self.space.normalizes() {
            l2_normalize(&mut encoded_source);
        }

        let (entry, max_level) = {
            let structure = self.structure.lock();
            match structure.entry_point {
                Some(ep) => (ep, structure.max_level),
                None => return Err(Error::InsufficientResults { k, found: 0 }),
            }
        };

        let mut current = entry;
        for layer in (1..=max_level).rev() {
            current = self.greedy_search_layer(&encoded_source, current, layer);
        }

        let ef_eff = ef.unwrap_or_else(|| self.ef_default()).max(k);
        let candidates = self.search_layer(&encoded_source, &[current], 0, ef_eff);

        let mut results = Vec::with_capacity(k);
        for id in candidates {
            let node = self.graph.node(id);
            if node.is_deleted() {
                continue;
            }
            let dist = self.space.distance(&encoded_source, &self.graph.decode_vector(id));
            results.push((node.label(), dist));
            if results.len() == k {
                break;
            }
        }

        if results.len() < k {
            return Err(Error::InsufficientResults { k, found: results.len() });
        }
        Ok(results)
    }

    pub fn set_deleted(&self, label: u64, deleted: bool) -> Result<()> {
        let id = self
            .graph
            .internal_id_for(label)
            .ok_or(Error::UnknownLabel(label))?;
        self.graph.node(id).set_deleted(deleted);
        Ok(())
    }

    pub fn get_vector(&self, label: u64) -> Result<Vec<f32>> {
        let id = self
            .graph
            .internal_id_for(label)
            .ok_or(Error::UnknownLabel(label))?;
        Ok(self.graph.decode_vector(id))
    }

    /// Labels currently eligible to be returned by a query (i.e. not
    /// soft-deleted). `get_vector` remains callable for deleted labels; this
    /// accessor reflects the live, queryable set instead.
    pub fn live_labels(&self) -> Vec<u64> {
        (0..self.graph.len())
            .filter_map(|id| {
                let node = self.graph.node(id);
                if node.is_deleted() {
                    None
                } else {
                    Some(node.label())
                }
            })
            .collect()
    }

    pub fn resize(&self, new_max: u32) -> Result<()> {
        let _structure = self.structure.lock();
        if new_max < self.graph.len() {
            return Err(Error::InvalidArgument(format!(
                "new_max {} is smaller than current node count {}",
                new_max,
                self.graph.len()
            )));
        }
        self.graph.set_capacity(new_max);
        self.visited.resize(new_max as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(dim: usize, space: Space) -> Engine {
        Engine::new(dim, space, Storage::F32, 16, 200, 10, 1, 16)
    }

    #[test]
    fn single_vector_self_query_is_exact() {
        let e = engine(4, Space::Euclidean);
        e.insert(&[1.0, 0.0, 0.0, 0.0], None).unwrap();
        let results = e.query(&[1.0, 0.0, 0.0, 0.0], 1, None).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, 0);
        assert_eq!(results[0].1, 0.0);
    }

    #[test]
    fn inner_product_distances_match_the_boundary_scenario() {
        let e = engine(2, Space::InnerProduct);
        e.insert(&[1.0, 0.0], Some(10)).unwrap();
        e.insert(&[0.0, 1.0], Some(20)).unwrap();
        e.insert(&[-1.0, 0.0], Some(30)).unwrap();
        let results = e.query(&[1.0, 0.0], 3, None).unwrap();
        let labels: Vec<u64> = results.iter().map(|(l, _)| *l).collect();
        let dists: Vec<f32> = results.iter().map(|(_, d)| *d).collect();
        assert_eq!(labels, vec![10, 20, 30]);
        for (d, expected) in dists.iter().zip([0.0, 1.0, 2.0]) {
            assert!((d - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn soft_delete_hides_a_label_without_touching_its_vector() {
        let e = engine(2, Space::Euclidean);
        for i in 0..5u64 {
            e.insert(&[i as f32, 0.0], Some(i)).unwrap();
        }
        e.set_deleted(2, true).unwrap();
        assert!(e.get_vector(2).is_ok());
        let results = e.query(&[2.0, 0.0], 1, None).unwrap();
        assert_ne!(results[0].0, 2);
    }

    #[test]
    fn unknown_label_errors_are_reported() {
        let e = engine(2, Space::Euclidean);
        assert!(matches!(e.get_vector(99), Err(Error::UnknownLabel(99))));
        assert!(matches!(
            e.set_deleted(99, true),
            Err(Error::UnknownLabel(99))
        ));
    }

    #[test]
    fn duplicate_label_on_insert_is_rejected() {
        let e = engine(2, Space::Euclidean);
        e.insert(&[0.0, 0.0], Some(1)).unwrap();
        assert!(matches!(
            e.insert(&[1.0, 1.0], Some(1)),
            Err(Error::DuplicateLabel(1))
        ));
    }

    #[test]
    fn reinserting_a_deleted_label_reuses_its_slot() {
        let e = engine(2, Space::Euclidean);
        e.insert(&[0.0, 0.0], Some(1)).unwrap();
        e.set_deleted(1, true).unwrap();
        e.insert(&[5.0, 5.0], Some(1)).unwrap();
        let v = e.get_vector(1).unwrap();
        assert_eq!(v, vec![5.0, 5.0]);
        let results = e.query(&[5.0, 5.0], 1, None).unwrap();
        assert_eq!(results[0].0, 1);
    }

    #[test]
    fn neighbor_capacity_is_respected_after_many_inserts() {
        let e = Engine::new(3, Space::Euclidean, Storage::F32, 4, 50, 10, 7, 64);
        for i in 0..200u64 {
            let x = (i as f32 * 0.31).sin();
            let y = (i as f32 * 0.17).cos();
            e.insert(&[x, y, (x + y) / 2.0], Some(i)).unwrap();
        }
        for id in 0..e.graph().len() {
            let node = e.graph().node(id);
            assert!(node.neighbors_at(0).len() <= 2 * e.m());
            for layer in 1..=node.level() {
                assert!(node.neighbors_at(layer).len() <= e.m());
            }
        }
    }

    #[test]
    fn self_recall_on_small_random_set() {
        let e = Engine::new(8, Space::Cosine, Storage::F32, 16, 200, 10, 99, 64);
        let mut seed = 12345u64;
        let mut next = move || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            ((seed >> 33) as f32 / (1u32 << 31) as f32) - 1.0
        };
        let mut vectors = Vec::new();
        for i in 0..100u64 {
            let v: Vec<f32> = (0..8).map(|_| next()).collect();
            e.insert(&v, Some(i)).unwrap();
            vectors.push(v);
        }
        let mut hits = 0;
        for (i, v) in vectors.iter().enumerate() {
            let results = e.query(v, 1, None).unwrap();
            if results[0].0 == i as u64 {
                hits += 1;
            }
        }
        assert!(hits as f64 / vectors.len() as f64 >= 0.95);
    }

    #[test]
    fn resize_rejects_shrinking_below_current_count() {
        let e = engine(2, Space::Euclidean);
        e.insert(&[0.0, 0.0], Some(1)).unwrap();
        assert!(e.resize(0).is_err());
        assert!(e.resize(10).is_ok());
    }
}
