use thiserror::Error;

/// Errors surfaced by the index to callers. Nothing here is retried
/// internally; bulk operations surface the first error and drop the rest.
#[derive(Error, Debug)]
pub enum Error {
    #[error("expected a vector of length {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("label {0} is not present in the index")]
    UnknownLabel(u64),

    #[error("label {0} already exists in the index")]
    DuplicateLabel(u64),

    #[error("requested {k} results but only {found} non-deleted candidates were reachable")]
    InsufficientResults { k: usize, found: usize },

    #[error("corrupt or incompatible index file: {0}")]
    FormatError(String),

    #[error("capacity error: {0}")]
    CapacityError(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
