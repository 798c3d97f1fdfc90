//! Flat node-slot arena (component D).
//!
//! Nodes are addressed by a dense `u32` internal id and never hold owning
//! references to each other — neighbor lists are plain integer ids into this
//! same arena, which sidesteps the cyclic-ownership problem an HNSW graph
//! would otherwise pose to the borrow checker.
use crate::storage::Storage;
use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// A node's neighbor list at one layer. Bounded-degree by construction (at
/// most `2*M` at layer 0, `M` above it) so the common case never touches the
/// heap; inline storage sized for the layer-0 cap covers the typical `M`
/// used in practice (16) with headroom before spilling.
pub type NeighborList = SmallVec<[u32; 32]>;

/// One graph element. Neighbor lists at every layer live behind a single
/// lock per node (not one lock per node per layer, per the concurrency
/// model) so a read-modify-publish sequence against one node's edges is
/// atomic without serializing unrelated nodes.
pub struct Node {
    level: AtomicU32,
    label: AtomicU64,
    deleted: AtomicBool,
    neighbors: Mutex<Vec<NeighborList>>,
    vector_payload: RwLock<Vec<u8>>,
}

impl Node {
    fn new(level: u32, label: u64, vector_payload: Vec<u8>) -> Self {
        Self {
            level: AtomicU32::new(level),
            label: AtomicU64::new(label),
            deleted: AtomicBool::new(false),
            neighbors: Mutex::new((0..=level).map(|_| NeighborList::new()).collect()),
            vector_payload: RwLock::new(vector_payload),
        }
    }

    pub fn level(&self) -> u32 {
        self.level.load(Ordering::Acquire)
    }

    pub fn label(&self) -> u64 {
        self.label.load(Ordering::Acquire)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    pub fn set_deleted(&self, deleted: bool) {
        self.deleted.store(deleted, Ordering::Release);
    }

    pub fn vector_payload(&self) -> Vec<u8> {
        self.vector_payload.read().clone()
    }

    /// Snapshot of this node's neighbors at layer `layer`, or empty if the
    /// node doesn't participate in that layer.
    pub fn neighbors_at(&self, layer: u32) -> Vec<u32> {
        let guard = self.neighbors.lock();
        guard.get(layer as usize).map(|l| l.to_vec()).unwrap_or_default()
    }

    /// Replace the neighbor list at `layer` wholesale. Caller is responsible
    /// for holding any cross-node lock ordering required by the pruning
    /// algorithm before calling this.
    pub fn set_neighbors_at(&self, layer: u32, neighbors: Vec<u32>) {
        let mut guard = self.neighbors.lock();
        if (layer as usize) < guard.len() {
            guard[layer as usize] = NeighborList::from_vec(neighbors);
        }
    }

    /// Lock this node's neighbor table for the duration of the closure,
    /// giving read-modify-write access to every layer at once. Used by the
    /// heuristic-pruning step, which must read a node's current list,
    /// compute a replacement, and publish it without another insert
    /// interleaving.
    pub fn with_neighbors_locked<R>(&self, f: impl FnOnce(&mut Vec<NeighborList>) -> R) -> R {
        let mut guard = self.neighbors.lock();
        f(&mut guard)
    }

    /// Reinitialize a slot for reuse after its label was deleted and is now
    /// being re-inserted. Only ever called while the caller holds the
    /// graph's global structure lock.
    fn reinit(&self, level: u32, label: u64, vector_payload: Vec<u8>) {
        self.level.store(level, Ordering::Release);
        self.label.store(label, Ordering::Release);
        self.deleted.store(false, Ordering::Release);
        *self.neighbors.lock() = (0..=level).map(|_| NeighborList::new()).collect();
        *self.vector_payload.write() = vector_payload;
    }
}

/// The node arena plus the label bimap. `max_elements` is a capacity
/// contract used to pre-size the visited-set pool; the arena itself grows
/// precisely as nodes are allocated.
pub struct Graph {
    dim: usize,
    storage: Storage,
    nodes: RwLock<Vec<Node>>,
    label_to_internal: RwLock<AHashMap<u64, u32>>,
    max_elements: AtomicU32,
}

impl Graph {
    pub fn new(dim: usize, storage: Storage, max_elements: u32) -> Self {
        Self {
            dim,
            storage,
            nodes: RwLock::new(Vec::new()),
            label_to_internal: RwLock::new(AHashMap::new()),
            max_elements: AtomicU32::new(max_elements.max(1)),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn storage(&self) -> Storage {
        self.storage
    }

    pub fn len(&self) -> u32 {
        self.nodes.read().len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_elements(&self) -> u32 {
        self.max_elements.load(Ordering::Acquire)
    }

    /// Geometric growth applied when an allocation would exceed the current
    /// capacity contract: at least doubles, and always clears the requested
    /// floor.
    pub fn grow_capacity_to_at_least(&self, floor: u32) {
        let mut current = self.max_elements.load(Ordering::Acquire);
        while current < floor {
            let next = (current.saturating_mul(2)).max(floor).max(current + 1);
            match self.max_elements.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    /// Set an explicit capacity floor (the public `resize` operation).
    /// Errors are the caller's responsibility to check (`new_max >= N`).
    pub fn set_capacity(&self, new_max: u32) {
        self.max_elements.store(new_max, Ordering::Release);
    }

    pub fn internal_id_for(&self, label: u64) -> Option<u32> {
        self.label_to_internal.read().get(&label).copied()
    }

    pub fn contains_label(&self, label: u64) -> bool {
        self.label_to_internal.read().contains_key(&label)
    }

    /// Allocate a fresh internal id and node for `label`. Caller must hold
    /// the engine's global structure lock and must have already checked
    /// `label` is not a live duplicate.
    pub fn allocate(&self, level: u32, label: u64, vector_payload: Vec<u8>) -> u32 {
        let mut nodes = self.nodes.write();
        let id = nodes.len() as u32;
        nodes.push(Node::new(level, label, vector_payload));
        drop(nodes);
        self.label_to_internal.write().insert(label, id);
        if id + 1 > self.max_elements() {
            self.grow_capacity_to_at_least(id + 1);
        }
        id
    }

    /// Reuse a deleted label's existing slot for a fresh insert, per
    /// DESIGN.md's open-question decision to keep the internal id stable
    /// across delete/re-insert cycles.
    pub fn reinsert_into_deleted_slot(&self, id: u32, level: u32, label: u64, vector_payload: Vec<u8>) {
        self.nodes.read()[id as usize].reinit(level, label, vector_payload);
    }

    pub fn node(&self, id: u32) -> NodeRef<'_> {
        NodeRef {
            nodes: self.nodes.read(),
            id,
        }
    }

    pub fn decode_vector(&self, id: u32) -> Vec<f32> {
        let payload = self.node(id).vector_payload();
        let mut out = Vec::with_capacity(self.dim);
        self.storage.decode(&payload, &mut out);
        out
    }
}

/// Borrowed view onto one node, holding the arena's read lock for its
/// lifetime. Cheap: the arena itself never moves existing entries, only
/// grows, so this only blocks concurrent `allocate` calls, not other reads.
pub struct NodeRef<'a> {
    nodes: parking_lot::RwLockReadGuard<'a, Vec<Node>>,
    id: u32,
}

impl std::ops::Deref for NodeRef<'_> {
    type Target = Node;
    fn deref(&self) -> &Node {
        &self.nodes[self.id as usize]
    }
}
