use thiserror::Error;

/// Errors that can occur when allocating string storage.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The requested size was zero or larger than the largest supported block.
    ///
    /// Rejected before any memory is allocated.
    #[error("invalid string size {size}: must be between 1 and {max} bytes")]
    InvalidSize {
        /// The size that was requested.
        size: usize,

        /// The largest size accepted by the operation that rejected the request.
        max: usize,
    },

    /// Backing storage could not be grown to satisfy the request.
    ///
    /// The operation that needed the memory has been abandoned without side effects; retry and
    /// backpressure policy is left to the caller.
    #[error("out of memory: failed to reserve {requested_bytes} bytes of backing storage")]
    OutOfMemory {
        /// The number of bytes the failed backing storage allocation asked for.
        requested_bytes: usize,
    },
}

/// A specialized `Result` type for string storage operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;
