//! Error taxonomy for the channel's fallible entry points.
//!
//! Only message overflow unwinds a call (`transmit` returns `Err`). Every
//! other rejection in the taxonomy (validation failure, stale sequence,
//! reassembly gap, file rejection, lost fragment on finalize) is the common
//! path and is communicated through plain return values instead, so the hot
//! loop in [`crate::channel`] never pays for unwinding or allocation on a
//! dropped packet.

use thiserror::Error;

/// Fatal-to-the-channel error. The caller must reset the channel after
/// seeing this; the process itself is not expected to crash.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The pending reliable message buffer exceeded its write capacity.
    #[error("reliable message buffer overflowed (capacity {capacity} bytes)")]
    MessageOverflow { capacity: usize },

    /// A bit-buffer write exceeded its allocated capacity.
    #[error("bit buffer '{name}' overflowed at bit {attempted} (max {max})")]
    BufferOverflow {
        name: &'static str,
        attempted: usize,
        max: usize,
    },
}

/// Why an inbound file fragment stream was rejected. Not fatal: the file
/// stream is flushed and reset, the channel otherwise continues normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRejectReason {
    /// First fragment carried an empty filename.
    EmptyName,
    /// Filename contained a `..` path-traversal segment.
    PathTraversal,
    /// Destination file already exists; not overwritten.
    AlreadyExists,
}

impl std::fmt::Display for FileRejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileRejectReason::EmptyName => write!(f, "empty filename"),
            FileRejectReason::PathTraversal => write!(f, "path traversal in filename"),
            FileRejectReason::AlreadyExists => write!(f, "file already exists"),
        }
    }
}
