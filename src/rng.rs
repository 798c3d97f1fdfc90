//! Seeded, mutex-guarded PRNG driving HNSW level assignment.
//!
//! The wire format (§6) stores exactly one `u64` of PRNG state, so the
//! generator itself is a single splitmix64 register rather than a pulled-in
//! generic RNG crate with a larger, implementation-defined state layout.
//! splitmix64 is the generator Vigna describes as a SplitMix64 companion to
//! xoshiro/xorshift; it is the same family already used for `NodeId` hashing
//! elsewhere in this codebase, just run forward as a stream instead of once
//! over input bytes.
use parking_lot::Mutex;

/// A single splitmix64 register, shared across concurrent inserters behind a
/// mutex. Level draws are therefore serialized relative to each other but not
/// to anything else: the mutex is held only for the few nanoseconds it takes
/// to advance and return one `u64`.
#[derive(Debug)]
pub struct LevelRng {
    state: Mutex<u64>,
}

impl LevelRng {
    pub fn new(seed: u64) -> Self {
        Self {
            state: Mutex::new(seed),
        }
    }

    /// Reconstruct a generator from a previously-saved state word (used by
    /// the serializer to resume exactly where a saved index left off).
    pub fn from_state(state: u64) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// Current state word, for persistence.
    pub fn state(&self) -> u64 {
        *self.state.lock()
    }

    fn next_u64(&self) -> u64 {
        let mut guard = self.state.lock();
        *guard = guard.wrapping_add(0x9E3779B97F4A7C15);
        let mut z = *guard;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
        z ^ (z >> 31)
    }

    /// Draw a uniform value in (0, 1]. Never returns exactly 0.0 so that
    /// `-ln(u)` in the level-assignment formula is always finite.
    pub fn next_open01(&self) -> f64 {
        // Use the top 53 bits so the result maps cleanly onto an f64 mantissa.
        let bits = self.next_u64() >> 11;
        let unit = (bits as f64) / ((1u64 << 53) as f64);
        // unit is in [0, 1); invert to (0, 1] so ln() never sees 0.
        1.0 - unit
    }

    /// Draw a level for a newly inserted node using the standard HNSW
    /// exponential-decay distribution: `floor(-ln(U) * m_L)`.
    pub fn draw_level(&self, inv_log_m: f64) -> u32 {
        let u = self.next_open01();
        (-u.ln() * inv_log_m).floor() as u32
    }
}
