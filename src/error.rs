//! Error types for the tree and binding core.
//!
//! All failures are signaled synchronously and never recovered internally.
//! There is no retry policy anywhere in this crate: every operation is a
//! single synchronous attempt, and backpressure or partial-failure handling
//! belongs to collaborators.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TreeError>;

/// Failure conditions raised by tree mutation, mount cascades, and
/// binding-unit operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    /// Bad input to a public operation: an insertion target that is not a
    /// child of the receiver, an out-of-range affinity value, and the like.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A node or fastener is not where the caller claims it is.
    #[error("not found: {0}")]
    NotFound(String),

    /// `cascade_mount` called on a node whose `MOUNTED` flag is already set.
    #[error("node is already mounted")]
    AlreadyMounted,

    /// `cascade_unmount` called on a node that is not mounted.
    #[error("node is already unmounted")]
    AlreadyUnmounted,

    /// A hook callback mutated the tree in a way that invalidated an
    /// in-progress structural walk. This is a programming error in a
    /// collaborator, not a recoverable condition.
    #[error("inconsistent state: {0}")]
    InconsistentState(String),
}
