//! # weft
//!
//! Ownership-tree and reactive-binding runtime for UI frameworks.
//!
//! ## Architecture
//!
//! weft models a UI scene as a single-threaded ownership tree of [`Node`]s.
//! Each parent owns its children through an ordered sibling list plus a keyed
//! child map; all back-references (parent, previous sibling, last child) are
//! weak, so dropping a subtree's root releases the whole subtree.
//!
//! Nodes carry named binding units called *fasteners*. A fastener holds one
//! facet of a node's state (a [`Property`] holds a plain value), tracks the
//! *affinity* of its current value, and can inherit from the same-named
//! fastener on the nearest ancestor. Change propagates in two phases:
//! ```text
//! value write → decohere sub-fasteners → owner queue → recoherence pass
//! ```
//!
//! ## Modules
//!
//! - [`types`] - [`Affinity`] scale and [`UpdateFlags`]
//! - [`error`] - [`TreeError`] and the crate [`Result`] alias
//! - [`node`] - the ownership tree, mutation protocol, and mount cascade
//! - [`fastener`] - the [`Fastener`] trait, [`FastenerCore`] state machine,
//!   and [`Property`]

pub mod error;
pub mod fastener;
pub mod node;
pub mod types;

// Re-export commonly used items
pub use error::{Result, TreeError};
pub use types::{Affinity, UpdateFlags};

pub use node::{Node, NodeConfig, NodeDelegate, NodeFlags, NodeObserver};

pub use fastener::{
    Fastener, FastenerContext, FastenerCore, FastenerFlags, Inherits, Property,
};
