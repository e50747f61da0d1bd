//! Ownership node - tree participant with ordered children and mount state.
//!
//! A [`Node`] is a cheaply cloneable handle to one tree participant. Nodes
//! form an ownership tree: the parent owns its children collectively through
//! the `first_child` -> `next_sibling` chain and a keyed child map, while
//! `parent`, `last_child`, and `prev_sibling` are weak back-references that
//! are cleared on detach.
//!
//! All structural mutation goes through the bracketed hook protocol
//! (*will* -> mutate -> *on* -> *did*), applied symmetrically for attach and
//! detach. Mutation propagates mount state: inserting under a mounted parent
//! cascades a mount down the new subtree, and detaching a mounted child
//! cascades an unmount first, so `MOUNTED` always means "cascaded-mounted
//! and not yet cascaded-unmounted".
//!
//! Nodes also host fasteners through the [`FastenerContext`] protocol:
//! direct and lazy named lookup, upward super-lookup along parent links, and
//! the batched decoherence/recoherence queue.

pub mod delegate;
pub mod observer;

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};
use std::time::Instant;

use bitflags::bitflags;
use tracing::{debug, trace};

use crate::error::{Result, TreeError};
use crate::fastener::{Fastener, FastenerContext, Property};
use crate::types::UpdateFlags;

pub use delegate::{NodeConfig, NodeDelegate};
pub use observer::NodeObserver;
use observer::ObserverList;

// =============================================================================
// Flags and identity
// =============================================================================

bitflags! {
    /// Node state flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NodeFlags: u8 {
        /// The node has been cascaded-mounted and not yet cascaded-unmounted.
        const MOUNTED = 1 << 0;
        /// Transient guard set for the duration of a removal, making
        /// re-entrant removal during hook callbacks a detectable error.
        const REMOVING = 1 << 1;
    }
}

thread_local! {
    /// Counter for process-unique node ids. Ids are never reused.
    static NEXT_NODE_ID: Cell<u64> = const { Cell::new(1) };
}

/// Factory for a declared-but-unconstructed fastener, run on first lookup.
type FastenerFactory = Rc<dyn Fn(&Rc<dyn FastenerContext>) -> Rc<dyn Fastener>>;

// =============================================================================
// Node
// =============================================================================

/// Handle to one ownership-tree participant.
///
/// Clones share the same underlying node; equality and hashing use the
/// node's process-unique id.
pub struct Node {
    core: Rc<NodeCore>,
}

pub(crate) struct NodeCore {
    id: u64,
    /// Key unique among siblings, used for map-based child lookup. Cleared
    /// whenever the node is detached from its parent.
    key: RefCell<Option<String>>,
    flags: Cell<NodeFlags>,
    config: NodeConfig,
    parent: RefCell<Weak<NodeCore>>,
    first_child: RefCell<Option<Rc<NodeCore>>>,
    last_child: RefCell<Weak<NodeCore>>,
    next_sibling: RefCell<Option<Rc<NodeCore>>>,
    prev_sibling: RefCell<Weak<NodeCore>>,
    child_count: Cell<usize>,
    /// Keyed children, maintained in lockstep with the sibling list.
    child_map: RefCell<HashMap<String, Rc<NodeCore>>>,
    /// Attached fasteners in insertion order; at most one per name.
    fasteners: RefCell<Vec<Rc<dyn Fastener>>>,
    /// Declared fastener factories, materialized on first lazy lookup.
    fastener_factories: RefCell<Vec<(String, FastenerFactory)>>,
    /// Fasteners pending recoherence, appended without de-duplication.
    decoherent: RefCell<Vec<Rc<dyn Fastener>>>,
    update_flags: Cell<UpdateFlags>,
    delegate: RefCell<Option<Rc<dyn NodeDelegate>>>,
    observers: RefCell<ObserverList>,
    self_weak: RefCell<Weak<NodeCore>>,
}

impl Node {
    /// Create a detached root node with the default configuration.
    pub fn new() -> Node {
        Node::with_config(NodeConfig::default())
    }

    /// Create a detached root node with widget-class update-flag defaults.
    pub fn with_config(config: NodeConfig) -> Node {
        let id = NEXT_NODE_ID.with(|next| {
            let id = next.get();
            next.set(id + 1);
            id
        });
        let core = Rc::new(NodeCore {
            id,
            key: RefCell::new(None),
            flags: Cell::new(NodeFlags::empty()),
            config,
            parent: RefCell::new(Weak::new()),
            first_child: RefCell::new(None),
            last_child: RefCell::new(Weak::new()),
            next_sibling: RefCell::new(None),
            prev_sibling: RefCell::new(Weak::new()),
            child_count: Cell::new(0),
            child_map: RefCell::new(HashMap::new()),
            fasteners: RefCell::new(Vec::new()),
            fastener_factories: RefCell::new(Vec::new()),
            decoherent: RefCell::new(Vec::new()),
            update_flags: Cell::new(UpdateFlags::empty()),
            delegate: RefCell::new(None),
            observers: RefCell::new(ObserverList::default()),
            self_weak: RefCell::new(Weak::new()),
        });
        *core.self_weak.borrow_mut() = Rc::downgrade(&core);
        Node { core }
    }

    fn from_core(core: Rc<NodeCore>) -> Node {
        Node { core }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Process-unique id, assigned at construction and never reused.
    pub fn id(&self) -> u64 {
        self.core.id
    }

    /// The node's key among its siblings, if any.
    pub fn key(&self) -> Option<String> {
        self.core.key.borrow().clone()
    }

    /// Current state flags.
    pub fn flags(&self) -> NodeFlags {
        self.core.flags.get()
    }

    pub fn is_mounted(&self) -> bool {
        self.core.flags.get().contains(NodeFlags::MOUNTED)
    }

    pub fn parent(&self) -> Option<Node> {
        self.core.parent.borrow().upgrade().map(Node::from_core)
    }

    pub fn first_child(&self) -> Option<Node> {
        self.core.first_child.borrow().clone().map(Node::from_core)
    }

    pub fn last_child(&self) -> Option<Node> {
        self.core.last_child.borrow().upgrade().map(Node::from_core)
    }

    pub fn next_sibling(&self) -> Option<Node> {
        self.core.next_sibling.borrow().clone().map(Node::from_core)
    }

    pub fn prev_sibling(&self) -> Option<Node> {
        self.core.prev_sibling.borrow().upgrade().map(Node::from_core)
    }

    pub fn child_count(&self) -> usize {
        self.core.child_count.get()
    }

    /// Snapshot of the children, first to last.
    pub fn children(&self) -> Vec<Node> {
        let mut children = Vec::with_capacity(self.child_count());
        let mut current = self.first_child();
        while let Some(child) = current {
            let next = child.next_sibling();
            children.push(child);
            current = next;
        }
        children
    }

    /// Whether this node is a strict ancestor of `node`.
    pub fn is_ancestor_of(&self, node: &Node) -> bool {
        let mut ancestor = node.parent();
        while let Some(current) = ancestor {
            if current == *self {
                return true;
            }
            ancestor = current.parent();
        }
        false
    }

    /// The root of the tree this node belongs to (itself when detached).
    pub fn root(&self) -> Node {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    fn delegate(&self) -> Option<Rc<dyn NodeDelegate>> {
        self.core.delegate.borrow().clone()
    }

    /// Attach the behavioral delegate for this node.
    pub fn set_delegate(&self, delegate: Rc<dyn NodeDelegate>) {
        *self.core.delegate.borrow_mut() = Some(delegate);
    }

    // =========================================================================
    // Observers
    // =========================================================================

    /// Register an observer. Returns `false` (and changes nothing) if it is
    /// already registered.
    pub fn observe(&self, observer: Rc<dyn NodeObserver>) -> bool {
        self.core.observers.borrow_mut().insert(observer)
    }

    /// Deregister an observer. A listener that is not currently observing is
    /// a no-op returning `false`.
    pub fn unobserve(&self, observer: &Rc<dyn NodeObserver>) -> bool {
        self.core.observers.borrow_mut().remove(observer)
    }

    pub fn observer_count(&self) -> usize {
        self.core.observers.borrow().len()
    }

    fn observers_snapshot(&self) -> Vec<Rc<dyn NodeObserver>> {
        self.core.observers.borrow().snapshot()
    }

    // =========================================================================
    // Update requests
    // =========================================================================

    /// OR `flags` into this node's pending update set.
    pub fn require_update(&self, flags: UpdateFlags) {
        self.core.update_flags.set(self.core.update_flags.get() | flags);
    }

    /// The pending update flags, left in place.
    pub fn needs_update(&self) -> UpdateFlags {
        self.core.update_flags.get()
    }

    /// Drain the pending update flags.
    pub fn take_update_flags(&self) -> UpdateFlags {
        let flags = self.core.update_flags.get();
        self.core.update_flags.set(UpdateFlags::empty());
        flags
    }

    // =========================================================================
    // Raw linkage
    // =========================================================================

    fn set_flag(&self, flag: NodeFlags, on: bool) {
        let mut flags = self.core.flags.get();
        flags.set(flag, on);
        self.core.flags.set(flags);
    }

    /// Splice `child` into the sibling list before `before` (at the tail
    /// when `None`), updating all pointers, the count, and the child map.
    fn link_child(&self, child: &Node, before: Option<&Node>) {
        match before {
            Some(next) => {
                let prev = next.core.prev_sibling.borrow().upgrade();
                *child.core.next_sibling.borrow_mut() = Some(next.core.clone());
                *next.core.prev_sibling.borrow_mut() = Rc::downgrade(&child.core);
                match prev {
                    Some(prev) => {
                        *prev.next_sibling.borrow_mut() = Some(child.core.clone());
                        *child.core.prev_sibling.borrow_mut() = Rc::downgrade(&prev);
                    }
                    None => {
                        *self.core.first_child.borrow_mut() = Some(child.core.clone());
                        *child.core.prev_sibling.borrow_mut() = Weak::new();
                    }
                }
            }
            None => {
                match self.core.last_child.borrow().upgrade() {
                    Some(last) => {
                        *last.next_sibling.borrow_mut() = Some(child.core.clone());
                        *child.core.prev_sibling.borrow_mut() = Rc::downgrade(&last);
                    }
                    None => {
                        *self.core.first_child.borrow_mut() = Some(child.core.clone());
                        *child.core.prev_sibling.borrow_mut() = Weak::new();
                    }
                }
                *child.core.next_sibling.borrow_mut() = None;
                *self.core.last_child.borrow_mut() = Rc::downgrade(&child.core);
            }
        }
        *child.core.parent.borrow_mut() = Rc::downgrade(&self.core);
        self.core.child_count.set(self.core.child_count.get() + 1);
        if let Some(key) = child.core.key.borrow().clone() {
            self.core
                .child_map
                .borrow_mut()
                .insert(key, child.core.clone());
        }
    }

    /// Splice `child` out of the sibling list, clearing its back-references
    /// and key.
    fn unlink_child(&self, child: &Node) {
        let prev = child.core.prev_sibling.borrow().upgrade();
        let next = child.core.next_sibling.borrow_mut().take();
        match &prev {
            Some(prev) => *prev.next_sibling.borrow_mut() = next.clone(),
            None => *self.core.first_child.borrow_mut() = next.clone(),
        }
        let prev_weak = match &prev {
            Some(prev) => Rc::downgrade(prev),
            None => Weak::new(),
        };
        match &next {
            Some(next) => *next.prev_sibling.borrow_mut() = prev_weak,
            None => *self.core.last_child.borrow_mut() = prev_weak,
        }
        *child.core.prev_sibling.borrow_mut() = Weak::new();
        *child.core.parent.borrow_mut() = Weak::new();
        self.core.child_count.set(self.core.child_count.get() - 1);
        if let Some(key) = child.core.key.borrow().clone() {
            self.core.child_map.borrow_mut().remove(&key);
        }
        *child.core.key.borrow_mut() = None;
    }

    // =========================================================================
    // Attach / detach
    // =========================================================================

    /// Low-level attach: link this node under `parent` before
    /// `next_sibling` (at the tail when `None`), running the attach hooks
    /// and cascading a mount when the parent is mounted.
    ///
    /// Fails with `InvalidArgument` when this node already has a parent,
    /// when `next_sibling` is not a child of `parent`, or when the attach
    /// would create a cycle.
    pub fn attach_parent(&self, parent: &Node, next_sibling: Option<&Node>) -> Result<()> {
        if self.parent().is_some() {
            return Err(TreeError::InvalidArgument(
                "node already has a parent".into(),
            ));
        }
        if self == parent || self.is_ancestor_of(parent) {
            return Err(TreeError::InvalidArgument(
                "attach would create a cycle".into(),
            ));
        }
        if let Some(next) = next_sibling {
            if next.parent().as_ref() != Some(parent) {
                return Err(TreeError::InvalidArgument(
                    "next sibling is not a child of the given parent".into(),
                ));
            }
        }
        let delegate = self.delegate();
        if let Some(ref d) = delegate {
            d.will_attach_parent(self, parent);
        }
        parent.link_child(self, next_sibling);
        if let Some(ref d) = delegate {
            d.on_attach_parent(self, parent);
        }
        if parent.is_mounted() && !self.is_mounted() {
            self.cascade_mount()?;
        }
        if let Some(ref d) = delegate {
            d.did_attach_parent(self, parent);
        }
        Ok(())
    }

    /// Low-level detach: unlink this node from `parent`, cascading an
    /// unmount first when mounted, and clearing the parent back-reference
    /// and key.
    ///
    /// Fails with `NotFound` when this node is not a child of `parent`.
    pub fn detach_parent(&self, parent: &Node) -> Result<()> {
        if self.parent().as_ref() != Some(parent) {
            return Err(TreeError::NotFound(
                "node is not a child of the given parent".into(),
            ));
        }
        let delegate = self.delegate();
        if let Some(ref d) = delegate {
            d.will_detach_parent(self, parent);
        }
        if self.is_mounted() {
            self.cascade_unmount()?;
        }
        parent.unlink_child(self);
        if let Some(ref d) = delegate {
            d.on_detach_parent(self, parent);
            d.did_detach_parent(self, parent);
        }
        Ok(())
    }

    // =========================================================================
    // Mutation protocol
    // =========================================================================

    /// Insert `child` before `target` (at the tail when `None`), optionally
    /// under `key`.
    ///
    /// Fails with `InvalidArgument` when `target` is not currently a child
    /// of this node. A child that already has a parent is first removed from
    /// it (idempotent re-parenting). When `key` collides with an existing
    /// child, that child is transactionally removed first and the new child
    /// takes its slot.
    pub fn insert_child(
        &self,
        child: &Node,
        target: Option<&Node>,
        key: Option<&str>,
    ) -> Result<()> {
        if let Some(target) = target {
            if target.parent().as_ref() != Some(self) {
                return Err(TreeError::InvalidArgument(
                    "insertion target is not a child of this node".into(),
                ));
            }
        }
        if let Some(prior) = child.parent() {
            prior.remove_child(child)?;
        }
        let mut before = target.cloned();
        if let Some(key) = key {
            if let Some(existing) = self.get_child(key) {
                // Replace-by-key: the new child takes the removed child's slot.
                let slot = existing.next_sibling();
                self.remove_child(&existing)?;
                before = slot;
            }
            *child.core.key.borrow_mut() = Some(key.to_string());
        }
        debug!(parent = self.core.id, child = child.core.id, key = ?key, "insert child");
        let delegate = self.delegate();
        if let Some(ref d) = delegate {
            d.will_insert_child(self, child);
        }
        for observer in self.observers_snapshot() {
            observer.will_insert_child(self, child);
        }
        child.attach_parent(self, before.as_ref())?;
        child.cascade_insert();
        if let Some(ref d) = delegate {
            d.on_insert_child(self, child);
        }
        self.require_update(self.core.config.insert_child_flags);
        if let Some(ref d) = delegate {
            d.did_insert_child(self, child);
        }
        for observer in self.observers_snapshot() {
            observer.did_insert_child(self, child);
        }
        Ok(())
    }

    /// Insert `child` at the tail of the child list.
    pub fn append_child(&self, child: &Node) -> Result<()> {
        self.insert_child(child, None, None)
    }

    /// Insert `child` at the head of the child list.
    pub fn prepend_child(&self, child: &Node) -> Result<()> {
        let first = self.first_child();
        self.insert_child(child, first.as_ref(), None)
    }

    /// Remove `child` from this node.
    ///
    /// Fails with `NotFound` when `child` is not currently a child of this
    /// node, and with `InconsistentState` when the child is already being
    /// removed (re-entrant removal from a hook callback).
    pub fn remove_child(&self, child: &Node) -> Result<()> {
        if child.parent().as_ref() != Some(self) {
            return Err(TreeError::NotFound(
                "node is not a child of this node".into(),
            ));
        }
        if child.core.flags.get().contains(NodeFlags::REMOVING) {
            return Err(TreeError::InconsistentState(
                "re-entrant removal of a child already being removed".into(),
            ));
        }
        debug!(parent = self.core.id, child = child.core.id, "remove child");
        child.set_flag(NodeFlags::REMOVING, true);
        let result = self.remove_child_guarded(child);
        child.set_flag(NodeFlags::REMOVING, false);
        result
    }

    fn remove_child_guarded(&self, child: &Node) -> Result<()> {
        let delegate = self.delegate();
        if let Some(ref d) = delegate {
            d.will_remove_child(self, child);
        }
        for observer in self.observers_snapshot() {
            observer.will_remove_child(self, child);
        }
        child.detach_parent(self)?;
        if let Some(ref d) = delegate {
            d.on_remove_child(self, child);
        }
        self.require_update(self.core.config.remove_child_flags);
        if let Some(ref d) = delegate {
            d.did_remove_child(self, child);
        }
        for observer in self.observers_snapshot() {
            observer.did_remove_child(self, child);
        }
        Ok(())
    }

    /// Remove the child registered under `key`, returning it, or `Ok(None)`
    /// when no child carries that key.
    pub fn remove_child_by_key(&self, key: &str) -> Result<Option<Node>> {
        let Some(child) = self.get_child(key) else {
            return Ok(None);
        };
        self.remove_child(&child)?;
        Ok(Some(child))
    }

    /// Remove all children, tail to head.
    ///
    /// Fails with `InconsistentState` when any child already carries the
    /// removal guard, which indicates recursive misuse from a hook.
    pub fn remove_children(&self) -> Result<()> {
        while let Some(child) = self.last_child() {
            if child.core.flags.get().contains(NodeFlags::REMOVING) {
                return Err(TreeError::InconsistentState(
                    "child already being removed during remove_children".into(),
                ));
            }
            self.remove_child(&child)?;
        }
        Ok(())
    }

    /// Atomically replace `old_child` with `new_child` in the same slot,
    /// transferring the old child's key.
    ///
    /// Fails with `NotFound` when `old_child` is not a child of this node.
    pub fn replace_child(&self, new_child: &Node, old_child: &Node) -> Result<()> {
        if old_child.parent().as_ref() != Some(self) {
            return Err(TreeError::NotFound(
                "old child is not a child of this node".into(),
            ));
        }
        if new_child == old_child {
            return Ok(());
        }
        let key = old_child.key();
        let slot = old_child.next_sibling();
        self.remove_child(old_child)?;
        self.insert_child(new_child, slot.as_ref(), key.as_deref())
    }

    /// The child registered under `key`, if any.
    pub fn get_child(&self, key: &str) -> Option<Node> {
        self.core
            .child_map
            .borrow()
            .get(key)
            .cloned()
            .map(Node::from_core)
    }

    /// Set or clear the child registered under `key`, returning the child
    /// previously held there.
    ///
    /// `Some(child)` inserts `child` under `key`, taking the slot of any
    /// existing keyed child (which is removed, its key cleared); `None`
    /// removes and returns the keyed child.
    pub fn set_child(&self, key: &str, child: Option<&Node>) -> Result<Option<Node>> {
        match child {
            Some(child) => {
                let old = self.get_child(key);
                self.insert_child(child, None, Some(key))?;
                Ok(old)
            }
            None => self.remove_child_by_key(key),
        }
    }

    /// Stable-sort the child list by `compare` and relink the sibling
    /// pointers. The comparator must be a total order over siblings.
    pub fn sort_children(&self, mut compare: impl FnMut(&Node, &Node) -> Ordering) {
        let mut children = self.children();
        if children.len() < 2 {
            return;
        }
        children.sort_by(|a, b| compare(a, b));
        *self.core.first_child.borrow_mut() = Some(children[0].core.clone());
        *self.core.last_child.borrow_mut() = Rc::downgrade(&children[children.len() - 1].core);
        for (index, child) in children.iter().enumerate() {
            *child.core.prev_sibling.borrow_mut() = if index == 0 {
                Weak::new()
            } else {
                Rc::downgrade(&children[index - 1].core)
            };
            *child.core.next_sibling.borrow_mut() =
                children.get(index + 1).map(|next| next.core.clone());
        }
    }

    // =========================================================================
    // Ancestor lookup
    // =========================================================================

    /// The nearest strict ancestor satisfying `predicate`. Tests each
    /// ancestor on the way up.
    pub fn get_super(&self, predicate: impl Fn(&Node) -> bool) -> Option<Node> {
        let mut ancestor = self.parent();
        while let Some(node) = ancestor {
            if predicate(&node) {
                return Some(node);
            }
            ancestor = node.parent();
        }
        None
    }

    /// The farthest strict ancestor satisfying `predicate`. Recurses to the
    /// root before testing, so outermost matches win.
    pub fn get_base(&self, predicate: impl Fn(&Node) -> bool) -> Option<Node> {
        self.get_base_inner(&predicate)
    }

    fn get_base_inner(&self, predicate: &dyn Fn(&Node) -> bool) -> Option<Node> {
        let parent = self.parent()?;
        let outer = parent.get_base_inner(predicate);
        if outer.is_some() {
            return outer;
        }
        if predicate(&parent) { Some(parent) } else { None }
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    /// Visit live children first to last, short-circuiting on the first
    /// `Some` result.
    ///
    /// The next sibling is captured before each visit, so the visitor may
    /// remove the *current* child. Fails with `InconsistentState` when the
    /// captured next sibling is no longer under this node, which indicates
    /// unrelated restructuring from inside the visitor.
    pub fn for_each_child<R>(
        &self,
        mut visitor: impl FnMut(&Node) -> Option<R>,
    ) -> Result<Option<R>> {
        let mut current = self.first_child();
        while let Some(child) = current {
            let next = child.next_sibling();
            if let Some(result) = visitor(&child) {
                return Ok(Some(result));
            }
            if let Some(ref next_node) = next {
                if next_node.parent().as_ref() != Some(self) {
                    return Err(TreeError::InconsistentState(
                        "child list changed during iteration".into(),
                    ));
                }
            }
            current = next;
        }
        Ok(None)
    }

    // =========================================================================
    // Mount cascade
    // =========================================================================

    /// Mount this node and its whole subtree, parent first.
    ///
    /// Order at each level: *will* hooks, set `MOUNTED`, *on* hooks (which
    /// mount the attached fasteners in insertion order), children first to
    /// last, *did* hooks. Fails with `AlreadyMounted` when the flag is
    /// already set, with `InvalidArgument` when the parent exists but is not
    /// mounted, and with `InconsistentState` when a hook restructures the
    /// child list mid-cascade.
    pub fn cascade_mount(&self) -> Result<()> {
        if self.is_mounted() {
            return Err(TreeError::AlreadyMounted);
        }
        if let Some(parent) = self.parent() {
            if !parent.is_mounted() {
                return Err(TreeError::InvalidArgument(
                    "cannot mount under an unmounted parent".into(),
                ));
            }
        }
        debug!(node = self.core.id, "cascade mount");
        let delegate = self.delegate();
        if let Some(ref d) = delegate {
            d.will_mount(self);
        }
        for observer in self.observers_snapshot() {
            observer.will_mount(self);
        }
        self.set_flag(NodeFlags::MOUNTED, true);
        if let Some(ref d) = delegate {
            d.on_mount(self);
        }
        self.require_update(self.core.config.mount_flags);
        self.mount_fasteners();
        let mut current = self.first_child();
        while let Some(child) = current {
            let next = child.next_sibling();
            child.cascade_mount()?;
            if let Some(ref next_node) = next {
                if next_node.parent().as_ref() != Some(self) {
                    return Err(TreeError::InconsistentState(
                        "child list changed during mount cascade".into(),
                    ));
                }
            }
            current = next;
        }
        if let Some(ref d) = delegate {
            d.did_mount(self);
        }
        for observer in self.observers_snapshot() {
            observer.did_mount(self);
        }
        Ok(())
    }

    /// Unmount this node and its whole subtree, the exact reverse of
    /// [`cascade_mount`](Node::cascade_mount): children tail to head before
    /// own fasteners (in reverse insertion order), parent last.
    ///
    /// Fails with `AlreadyUnmounted` when the node is not mounted.
    pub fn cascade_unmount(&self) -> Result<()> {
        if !self.is_mounted() {
            return Err(TreeError::AlreadyUnmounted);
        }
        debug!(node = self.core.id, "cascade unmount");
        let delegate = self.delegate();
        if let Some(ref d) = delegate {
            d.will_unmount(self);
        }
        for observer in self.observers_snapshot() {
            observer.will_unmount(self);
        }
        let mut current = self.last_child();
        while let Some(child) = current {
            let prev = child.prev_sibling();
            child.cascade_unmount()?;
            if let Some(ref prev_node) = prev {
                if prev_node.parent().as_ref() != Some(self) {
                    return Err(TreeError::InconsistentState(
                        "child list changed during unmount cascade".into(),
                    ));
                }
            }
            current = prev;
        }
        self.unmount_fasteners();
        self.set_flag(NodeFlags::MOUNTED, false);
        if let Some(ref d) = delegate {
            d.on_unmount(self);
            d.did_unmount(self);
        }
        for observer in self.observers_snapshot() {
            observer.did_unmount(self);
        }
        Ok(())
    }

    /// Walk a freshly inserted subtree, invoking the delegate's
    /// `on_cascade_insert` hook on every node. No-op by default.
    pub fn cascade_insert(&self) {
        if let Some(delegate) = self.delegate() {
            delegate.on_cascade_insert(self);
        }
        let mut current = self.first_child();
        while let Some(child) = current {
            let next = child.next_sibling();
            child.cascade_insert();
            current = next;
        }
    }

    // =========================================================================
    // Fasteners
    // =========================================================================

    /// This node as a fastener owner, for constructing fasteners.
    pub fn context(&self) -> Rc<dyn FastenerContext> {
        self.core.clone()
    }

    /// Attach a fastener. Fails with `InvalidArgument` when one with the
    /// same name is already attached. Attaching to a mounted node mounts the
    /// fastener immediately.
    pub fn add_fastener(&self, fastener: Rc<dyn Fastener>) -> Result<()> {
        let name = fastener.core().name();
        if self.get_fastener(&name).is_some() {
            return Err(TreeError::InvalidArgument(format!(
                "fastener {name:?} already attached"
            )));
        }
        self.core.fasteners.borrow_mut().push(fastener.clone());
        if self.is_mounted() {
            fastener.core().mount();
        }
        Ok(())
    }

    /// Declare a fastener to be materialized on first lazy lookup and
    /// memoized thereafter.
    pub fn declare_fastener(
        &self,
        name: impl Into<String>,
        factory: impl Fn(&Rc<dyn FastenerContext>) -> Rc<dyn Fastener> + 'static,
    ) {
        self.core
            .fastener_factories
            .borrow_mut()
            .push((name.into(), Rc::new(factory)));
    }

    /// Direct lookup among already-materialized fasteners.
    pub fn get_fastener(&self, name: &str) -> Option<Rc<dyn Fastener>> {
        FastenerContext::get_fastener(&*self.core, name)
    }

    /// Lookup, materializing a declared fastener on first access.
    pub fn get_lazy_fastener(&self, name: &str) -> Option<Rc<dyn Fastener>> {
        FastenerContext::get_lazy_fastener(&*self.core, name)
    }

    /// Resolve the same-named fastener on the nearest ancestor node.
    pub fn get_super_fastener(&self, name: &str) -> Option<Rc<dyn Fastener>> {
        FastenerContext::get_super_fastener(&*self.core, name)
    }

    /// Typed lookup of a [`Property`] fastener.
    pub fn get_property<T: Clone + PartialEq + 'static>(
        &self,
        name: &str,
    ) -> Option<Rc<Property<T>>> {
        let fastener = self.get_fastener(name)?;
        fastener.as_any_rc().downcast::<Property<T>>().ok()
    }

    /// Enqueue a fastener for the next recoherence pass.
    pub fn decohere_fastener(&self, fastener: Rc<dyn Fastener>) {
        FastenerContext::decohere_fastener(&*self.core, fastener);
    }

    /// Run one recoherence pass; see
    /// [`FastenerContext::recohere_fasteners`].
    pub fn recohere_fasteners(&self, timestamp: Option<Instant>) {
        FastenerContext::recohere_fasteners(&*self.core, timestamp);
    }

    fn mount_fasteners(&self) {
        let fasteners: Vec<_> = self.core.fasteners.borrow().clone();
        for fastener in fasteners {
            fastener.core().mount();
        }
    }

    fn unmount_fasteners(&self) {
        let fasteners: Vec<_> = self.core.fasteners.borrow().clone();
        for fastener in fasteners.into_iter().rev() {
            fastener.core().unmount();
        }
    }
}

impl Default for Node {
    fn default() -> Self {
        Node::new()
    }
}

impl Clone for Node {
    fn clone(&self) -> Self {
        Node {
            core: self.core.clone(),
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Node) -> bool {
        self.core.id == other.core.id
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.core.id.hash(state);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.core.id)
            .field("key", &*self.core.key.borrow())
            .field("flags", &self.core.flags.get())
            .field("children", &self.core.child_count.get())
            .finish()
    }
}

// =============================================================================
// FastenerContext implementation
// =============================================================================

impl FastenerContext for NodeCore {
    fn get_fastener(&self, name: &str) -> Option<Rc<dyn Fastener>> {
        self.fasteners
            .borrow()
            .iter()
            .find(|fastener| fastener.core().name() == name)
            .cloned()
    }

    fn get_lazy_fastener(&self, name: &str) -> Option<Rc<dyn Fastener>> {
        if let Some(fastener) = self.get_fastener(name) {
            return Some(fastener);
        }
        let factory = self
            .fastener_factories
            .borrow()
            .iter()
            .find(|(declared, _)| declared == name)
            .map(|(_, factory)| factory.clone())?;
        let owner: Rc<dyn FastenerContext> = self.self_weak.borrow().upgrade()?;
        let fastener = factory(&owner);
        trace!(node = self.id, name, "materialize lazy fastener");
        self.fasteners.borrow_mut().push(fastener.clone());
        if self.flags.get().contains(NodeFlags::MOUNTED) {
            fastener.core().mount();
        }
        Some(fastener)
    }

    fn get_super_fastener(&self, name: &str) -> Option<Rc<dyn Fastener>> {
        let mut ancestor = self.parent.borrow().upgrade();
        while let Some(node) = ancestor {
            if let Some(fastener) = node.get_lazy_fastener(name) {
                return Some(fastener);
            }
            ancestor = node.parent.borrow().upgrade();
        }
        None
    }

    fn decohere_fastener(&self, fastener: Rc<dyn Fastener>) {
        // Append without de-duplication; the pass skips stale duplicates.
        self.decoherent.borrow_mut().push(fastener);
    }

    fn recohere_fasteners(&self, timestamp: Option<Instant>) {
        let pending = self.decoherent.take();
        if pending.is_empty() {
            return;
        }
        let timestamp = timestamp.unwrap_or_else(Instant::now);
        trace!(node = self.id, count = pending.len(), "recohere fasteners");
        for fastener in pending {
            if fastener.core().is_decoherent() {
                fastener.core().clear_decoherent();
                fastener.recohere(timestamp);
            }
        }
    }
}
