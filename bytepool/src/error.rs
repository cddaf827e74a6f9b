//! Error types for buffer operations.

use thiserror::Error;

/// Errors returned by [crate::Buffer] operations.
///
/// Pool operations never fail: they fall back to fresh allocation (on acquire)
/// or discard the buffer (on release).
#[derive(Error, Debug)]
pub enum Error {
    #[error("allocation too large: {0} bytes")]
    AllocationTooLarge(usize),
    #[error("invalid argument: offset {offset} + length {requested} exceeds capacity {capacity}")]
    InvalidArgument {
        offset: usize,
        requested: usize,
        capacity: usize,
    },
    #[error("short write: {written} of {available} bytes accepted")]
    ShortWrite { written: usize, available: usize },
    #[error("sink failed after {written} bytes: {source}")]
    Sink {
        written: usize,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Returns the number of bytes a sink accepted before the error, if the
    /// error was produced while draining a buffer.
    pub fn written(&self) -> Option<usize> {
        match self {
            Self::ShortWrite { written, .. } | Self::Sink { written, .. } => Some(*written),
            _ => None,
        }
    }
}
