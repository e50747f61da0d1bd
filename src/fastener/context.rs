//! Context protocol - the lookup surface a fastener owner must provide.
//!
//! This trait is the entire surface a [`Fastener`](crate::Fastener) depends
//! on. It deliberately excludes the tree-mutation API so that owners other
//! than tree nodes can host fasteners too: a fastener only needs named
//! lookup, upward named lookup, and a decoherence sink.

use std::rc::Rc;
use std::time::Instant;

use super::Fastener;

/// The minimal interface a fastener's owner exposes to its fasteners.
///
/// [`Node`](crate::Node) implements this by walking its parent links for
/// super-lookup and by batching decoherent fasteners for recoherence, but
/// nothing in this trait mentions the tree.
pub trait FastenerContext {
    /// Direct lookup by name among already-materialized fasteners.
    /// No inheritance is involved.
    fn get_fastener(&self, name: &str) -> Option<Rc<dyn Fastener>>;

    /// Lookup by name, materializing a declared-but-unconstructed fastener
    /// on first access. Materialized fasteners are memoized: subsequent
    /// lookups return the same unit.
    fn get_lazy_fastener(&self, name: &str) -> Option<Rc<dyn Fastener>>;

    /// Resolve the same-named fastener on the nearest ancestor context,
    /// walking strictly upward. Returns `None` when no ancestor context
    /// exists or none of them declares the name.
    fn get_super_fastener(&self, name: &str) -> Option<Rc<dyn Fastener>>;

    /// Enqueue a fastener for the next batched recoherence pass. Appends
    /// without de-duplication; the pass tolerates duplicates.
    fn decohere_fastener(&self, fastener: Rc<dyn Fastener>);

    /// Run one recoherence pass over the pending fasteners.
    ///
    /// The pending list is swapped for an empty one *before* iterating, so
    /// fasteners may re-decohere themselves during the pass; re-enqueued
    /// units are handled by a future pass, not the current one. All units of
    /// one pass observe the same timestamp (a monotonic clock read when
    /// `timestamp` is `None`).
    fn recohere_fasteners(&self, timestamp: Option<Instant>);
}
