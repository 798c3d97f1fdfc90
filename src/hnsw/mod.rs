//! The HNSW engine (component E): insertion, query, soft delete, resize.
mod engine;

pub use engine::Engine;
