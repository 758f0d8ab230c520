use std::io;

use thiserror::Error;

/// Unified error type for all rowsink operations.
///
/// Errors propagate upward with the `?` operator. Schema-full rejection is
/// *not* an error: [`Fragment::add_rows`](crate::fragment) signals it through
/// its `bool` return so the dataset can chain a new fragment.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error while creating, flushing, or renaming a fragment file.
    ///
    /// Not retried internally; the caller is expected to discard the
    /// in-progress output.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Arrow error during columnar buffer or batch construction.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error while writing or reading row groups.
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Invalid user input or API misuse.
    ///
    /// Raised for calls on a closed dataset and for attempts to merge
    /// fragments that do not share a common ancestor.
    #[error("Invalid argument: {0}")]
    InvalidArgumentError(String),

    /// Internal error indicating a bug or unexpected state, such as
    /// exhaustion of the on-disk column namespace.
    #[error("An internal operation failed: {0}")]
    Internal(String),
}

/// Result type alias used throughout rowsink.
pub type Result<T> = std::result::Result<T, Error>;
