//! Node delegates - the subclass-style hook surface.
//!
//! Widgets attach behavior to a node through a delegate implementing the
//! will/on/did hooks of the mutation protocol and mount lifecycle. Hooks are
//! pure extension points with no-op defaults; the base protocol's own `on`
//! phase (requesting updates, mounting fasteners, cascading mount state)
//! runs regardless of the delegate.

use super::Node;
use crate::types::UpdateFlags;

/// Per-node behavioral hooks, the seam where widget subclasses attach.
///
/// Hook ordering is fixed: `will` fires before the mutation, `on` right
/// after it (side effects such as requesting a re-layout), `did` last. An
/// implementation must not assume any other interleaving.
pub trait NodeDelegate {
    fn will_attach_parent(&self, _node: &Node, _parent: &Node) {}
    fn on_attach_parent(&self, _node: &Node, _parent: &Node) {}
    fn did_attach_parent(&self, _node: &Node, _parent: &Node) {}

    fn will_detach_parent(&self, _node: &Node, _parent: &Node) {}
    fn on_detach_parent(&self, _node: &Node, _parent: &Node) {}
    fn did_detach_parent(&self, _node: &Node, _parent: &Node) {}

    fn will_insert_child(&self, _node: &Node, _child: &Node) {}
    fn on_insert_child(&self, _node: &Node, _child: &Node) {}
    fn did_insert_child(&self, _node: &Node, _child: &Node) {}

    fn will_remove_child(&self, _node: &Node, _child: &Node) {}
    fn on_remove_child(&self, _node: &Node, _child: &Node) {}
    fn did_remove_child(&self, _node: &Node, _child: &Node) {}

    fn will_mount(&self, _node: &Node) {}
    fn on_mount(&self, _node: &Node) {}
    fn did_mount(&self, _node: &Node) {}

    fn will_unmount(&self, _node: &Node) {}
    fn on_unmount(&self, _node: &Node) {}
    fn did_unmount(&self, _node: &Node) {}

    /// Visited for every node of a freshly inserted subtree. Default no-op.
    fn on_cascade_insert(&self, _node: &Node) {}
}

/// Update-flag defaults issued by the base mutation protocol, the knobs a
/// widget class would otherwise hardcode. Supplied at node construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeConfig {
    /// Flags requested by the base `on_insert_child` phase.
    pub insert_child_flags: UpdateFlags,
    /// Flags requested by the base `on_remove_child` phase.
    pub remove_child_flags: UpdateFlags,
    /// Flags requested by the base `on_mount` phase.
    pub mount_flags: UpdateFlags,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            insert_child_flags: UpdateFlags::NEEDS_UPDATE | UpdateFlags::NEEDS_LAYOUT,
            remove_child_flags: UpdateFlags::NEEDS_UPDATE | UpdateFlags::NEEDS_LAYOUT,
            mount_flags: UpdateFlags::NEEDS_UPDATE | UpdateFlags::NEEDS_RENDER,
        }
    }
}
