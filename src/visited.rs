//! Reusable visited-set pool (component C).
//!
//! A traversal needs a "have I seen this internal id yet" mark per node.
//! Rather than allocating and zeroing a fresh bitset per query, each slot
//! stores the generation it was last touched in; a slot counts as visited
//! iff its stored generation equals the set's current generation. Starting
//! a new traversal just bumps the generation, which is O(1) regardless of
//! how many slots exist.
use parking_lot::Mutex;

/// One lendable visited-set. `reset()` must be called (via `VisitedPool`)
/// before it is handed to a new traversal.
pub struct VisitedSet {
    generation: u64,
    marks: Vec<u64>,
}

impl VisitedSet {
    fn new(capacity: usize) -> Self {
        Self {
            generation: 1,
            marks: vec![0; capacity],
        }
    }

    fn grow(&mut self, capacity: usize) {
        if capacity > self.marks.len() {
            self.marks.resize(capacity, 0);
        }
    }

    fn reset(&mut self) {
        self.generation += 1;
        if self.generation == 0 {
            // Wrapped after ~2^64 traversals on one lease; clear explicitly
            // rather than relying on a stale generation never recurring.
            self.marks.fill(0);
            self.generation = 1;
        }
    }

    #[inline]
    pub fn is_visited(&self, id: usize) -> bool {
        self.marks[id] == self.generation
    }

    #[inline]
    pub fn mark(&mut self, id: usize) {
        self.marks[id] = self.generation;
    }
}

/// Lends [`VisitedSet`]s to concurrent traversals, growing every outstanding
/// set to the current capacity on `resize`.
pub struct VisitedPool {
    capacity: Mutex<usize>,
    free: Mutex<Vec<VisitedSet>>,
}

impl VisitedPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: Mutex::new(capacity),
            free: Mutex::new(Vec::new()),
        }
    }

    /// Borrow a set sized to the pool's current capacity. Returns it to the
    /// pool automatically when the guard is dropped.
    pub fn acquire(&self) -> VisitedGuard<'_> {
        let capacity = *self.capacity.lock();
        let mut set = self.free.lock().pop().unwrap_or_else(|| VisitedSet::new(capacity));
        set.grow(capacity);
        set.reset();
        VisitedGuard { pool: self, set: Some(set) }
    }

    /// Grow pool capacity; outstanding leased sets pick this up lazily the
    /// next time they are acquired, and sets sitting in `free` are grown on
    /// their next acquisition. Monotonic: a call racing against a concurrent
    /// grow to a larger capacity never shrinks it back down.
    pub fn resize(&self, new_capacity: usize) {
        let mut capacity = self.capacity.lock();
        if new_capacity > *capacity {
            *capacity = new_capacity;
        }
    }
}

pub struct VisitedGuard<'a> {
    pool: &'a VisitedPool,
    set: Option<VisitedSet>,
}

impl std::ops::Deref for VisitedGuard<'_> {
    type Target = VisitedSet;
    fn deref(&self) -> &VisitedSet {
        self.set.as_ref().expect("set taken only on drop")
    }
}

impl std::ops::DerefMut for VisitedGuard<'_> {
    fn deref_mut(&mut self) -> &mut VisitedSet {
        self.set.as_mut().expect("set taken only on drop")
    }
}

impl Drop for VisitedGuard<'_> {
    fn drop(&mut self) {
        if let Some(set) = self.set.take() {
            self.pool.free.lock().push(set);
        }
    }
}
