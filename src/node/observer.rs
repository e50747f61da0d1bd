//! Node observers - external listeners on structural and lifecycle events.
//!
//! Observers are registered per node with idempotent set semantics:
//! insertion order is preserved, duplicates are rejected, and unobserving a
//! listener that is not registered is a no-op. Every method has a no-op
//! default, so a listener only implements the notifications it cares about;
//! dispatch simply invokes the method on every registered observer.

use std::rc::Rc;

use super::Node;

/// Listener interface for node events.
///
/// All methods default to no-ops; implement the subset you need. `will`
/// notifications fire before the mutation, `did` notifications after the
/// post-mutation side effects.
pub trait NodeObserver {
    fn will_insert_child(&self, _parent: &Node, _child: &Node) {}
    fn did_insert_child(&self, _parent: &Node, _child: &Node) {}

    fn will_remove_child(&self, _parent: &Node, _child: &Node) {}
    fn did_remove_child(&self, _parent: &Node, _child: &Node) {}

    fn will_mount(&self, _node: &Node) {}
    fn did_mount(&self, _node: &Node) {}

    fn will_unmount(&self, _node: &Node) {}
    fn did_unmount(&self, _node: &Node) {}
}

/// Insertion-ordered observer list with duplicate rejection.
#[derive(Default)]
pub(crate) struct ObserverList {
    observers: Vec<Rc<dyn NodeObserver>>,
}

impl ObserverList {
    /// Register an observer. Returns `false` if it is already registered.
    pub(crate) fn insert(&mut self, observer: Rc<dyn NodeObserver>) -> bool {
        if self
            .observers
            .iter()
            .any(|existing| Rc::ptr_eq(existing, &observer))
        {
            return false;
        }
        self.observers.push(observer);
        true
    }

    /// Deregister an observer. Returns `false` if it was not registered.
    pub(crate) fn remove(&mut self, observer: &Rc<dyn NodeObserver>) -> bool {
        let before = self.observers.len();
        self.observers
            .retain(|existing| !Rc::ptr_eq(existing, observer));
        self.observers.len() != before
    }

    /// Snapshot for dispatch, so callbacks may observe/unobserve freely.
    pub(crate) fn snapshot(&self) -> Vec<Rc<dyn NodeObserver>> {
        self.observers.clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.observers.len()
    }
}
