//! In-memory approximate nearest-neighbor search over an HNSW graph.
//!
//! [`Index`] is the public façade: construct one via [`Config`], insert
//! vectors under either an explicit or an auto-assigned 64-bit label, then
//! query for the `k` nearest by Euclidean, inner-product, or cosine
//! distance. Indices serialize to a stable little-endian binary format
//! (see [`serialize`]) that round-trips across independent implementations
//! of the same wire layout.
pub mod bulk;
pub mod distance;
pub mod error;
mod graph;
mod hnsw;
pub mod serialize;
mod rng;
pub mod storage;
mod visited;

pub use distance::Space;
pub use error::{Error, Result};
pub use storage::Storage;

use hnsw::Engine;
use serialize::{ByteSink, ByteSource, IoByteSink, IoByteSource};
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};

/// Construction options for a new [`Index`], validated eagerly and
/// exhaustively before any allocation happens.
#[derive(Debug, Clone)]
pub struct Config {
    dim: usize,
    space: Space,
    storage: Storage,
    m: usize,
    ef_construction: usize,
    rng_seed: u64,
    max_elements: u32,
}

impl Config {
    /// Start a builder for a `dim`-dimensional index with the defaults from
    /// §6: `M = 16`, `ef_construction = 200`, `rng_seed = 1`,
    /// `max_elements = 1`, `storage = F32`, `space = Euclidean`.
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            space: Space::Euclidean,
            storage: Storage::F32,
            m: 16,
            ef_construction: 200,
            rng_seed: 1,
            max_elements: 1,
        }
    }

    pub fn space(mut self, space: Space) -> Self {
        self.space = space;
        self
    }

    pub fn storage(mut self, storage: Storage) -> Self {
        self.storage = storage;
        self
    }

    pub fn m(mut self, m: usize) -> Self {
        self.m = m;
        self
    }

    pub fn ef_construction(mut self, ef_construction: usize) -> Self {
        self.ef_construction = ef_construction;
        self
    }

    pub fn rng_seed(mut self, rng_seed: u64) -> Self {
        self.rng_seed = rng_seed;
        self
    }

    pub fn max_elements(mut self, max_elements: u32) -> Self {
        self.max_elements = max_elements;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.dim == 0 {
            return Err(Error::InvalidArgument("dim must be at least 1".to_string()));
        }
        if self.m < 2 {
            return Err(Error::InvalidArgument("M must be at least 2".to_string()));
        }
        if self.ef_construction == 0 {
            return Err(Error::InvalidArgument("ef_construction must be at least 1".to_string()));
        }
        if self.max_elements == 0 {
            return Err(Error::InvalidArgument("max_elements must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Validate and build the index. No allocation happens until every
    /// parameter has been checked.
    #[tracing::instrument(skip_all)]
    pub fn build(self) -> Result<Index> {
        self.validate()?;
        let engine = Engine::new(
            self.dim,
            self.space,
            self.storage,
            self.m,
            self.ef_construction,
            0, // ef_default unset: query() falls back to `max(k, 0) == k`.
            self.rng_seed,
            self.max_elements,
        );
        Ok(Index {
            engine,
            thread_count: AtomicI32::new(1),
        })
    }
}

/// An HNSW index over dense `f32` vectors. Cheap to share across threads:
/// every method takes `&self` (see the concurrency model in §5).
pub struct Index {
    engine: Engine,
    thread_count: AtomicI32,
}

impl Index {
    /// Insert one vector under an explicit label, or `None` to auto-assign
    /// the next free internal id as the label.
    pub fn insert(&self, vector: &[f32], label: Option<u64>) -> Result<u64> {
        self.engine.insert(vector, label)
    }

    /// Insert a batch using this index's stored default thread count. See
    /// [`Index::set_thread_count`].
    pub fn insert_many(&self, items: &[(Vec<f32>, Option<u64>)]) -> Result<Vec<u64>> {
        bulk::insert_many(&self.engine, items, self.thread_count())
    }

    /// Insert a batch, overriding the stored default thread count for this
    /// call only.
    pub fn insert_many_with_threads(
        &self,
        items: &[(Vec<f32>, Option<u64>)],
        threads: i32,
    ) -> Result<Vec<u64>> {
        bulk::insert_many(&self.engine, items, threads)
    }

    /// Query for the `k` nearest neighbors of `query`. `ef` overrides the
    /// beam width for this call only; `None` falls back to `max(k, ef_default)`.
    pub fn query(&self, query: &[f32], k: usize, ef: Option<usize>) -> Result<Vec<(u64, f32)>> {
        self.engine.query(query, k, ef)
    }

    /// Query a batch using this index's stored default thread count.
    pub fn query_many(
        &self,
        queries: &[Vec<f32>],
        k: usize,
        ef: Option<usize>,
    ) -> Result<Vec<Vec<(u64, f32)>>> {
        bulk::query_many(&self.engine, queries, k, ef, self.thread_count())
    }

    /// Query a batch, overriding the stored default thread count for this
    /// call only.
    pub fn query_many_with_threads(
        &self,
        queries: &[Vec<f32>],
        k: usize,
        ef: Option<usize>,
        threads: i32,
    ) -> Result<Vec<Vec<(u64, f32)>>> {
        bulk::query_many(&self.engine, queries, k, ef, threads)
    }

    pub fn get_vector(&self, label: u64) -> Result<Vec<f32>> {
        self.engine.get_vector(label)
    }

    pub fn get_vectors(&self, labels: &[u64]) -> Result<Vec<Vec<f32>>> {
        labels.iter().map(|&label| self.get_vector(label)).collect()
    }

    /// Labels currently eligible to be returned from a query (soft-deleted
    /// labels are excluded; see [`Index::get_vector`] for access to a
    /// deleted label's vector).
    pub fn get_labels(&self) -> Vec<u64> {
        self.engine.live_labels()
    }

    pub fn mark_deleted(&self, label: u64) -> Result<()> {
        self.engine.set_deleted(label, true)
    }

    pub fn unmark_deleted(&self, label: u64) -> Result<()> {
        self.engine.set_deleted(label, false)
    }

    pub fn resize(&self, new_max_elements: u32) -> Result<()> {
        self.engine.resize(new_max_elements)
    }

    pub fn ef_default(&self) -> usize {
        self.engine.ef_default()
    }

    pub fn set_ef_default(&self, ef_default: usize) {
        self.engine.set_ef_default(ef_default)
    }

    pub fn thread_count(&self) -> i32 {
        self.thread_count.load(Ordering::Relaxed)
    }

    pub fn set_thread_count(&self, threads: i32) {
        self.thread_count.store(threads, Ordering::Relaxed);
    }

    pub fn dim(&self) -> usize {
        self.engine.graph().dim()
    }

    pub fn space(&self) -> Space {
        self.engine.space()
    }

    pub fn storage(&self) -> Storage {
        self.engine.graph().storage()
    }

    pub fn m(&self) -> usize {
        self.engine.m()
    }

    pub fn ef_construction(&self) -> usize {
        self.engine.ef_construction()
    }

    /// Current node count `N`.
    pub fn len(&self) -> u32 {
        self.engine.graph().len()
    }

    pub fn is_empty(&self) -> bool {
        self.engine.graph().is_empty()
    }

    pub fn max_elements(&self) -> u32 {
        self.engine.graph().max_elements()
    }

    /// Serialize to an abstract byte sink (§6).
    pub fn save(&self, sink: &mut impl ByteSink) -> Result<()> {
        serialize::save(&self.engine, sink)
    }

    /// Serialize to a file on disk.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path)?;
        let mut sink = IoByteSink::new(file);
        self.save(&mut sink)
    }

    /// Load from an abstract byte source (§6).
    pub fn load(source: &mut impl ByteSource) -> Result<Index> {
        let engine = serialize::load(source)?;
        Ok(Index {
            engine,
            thread_count: AtomicI32::new(1),
        })
    }

    /// Load from a file on disk.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Index> {
        let file = File::open(path)?;
        let mut source = IoByteSource::new(file);
        Index::load(&mut source)
    }
}
