//! Fastener - named, owner-attached binding unit.
//!
//! A fastener is a value holder attached to an owning context under a name.
//! It carries an [`Affinity`] deciding whether its local value or an
//! inherited value wins, can inherit from a same-named fastener found on an
//! ancestor context, and supports lazy recomputation through a decoherence
//! flag and the owner's batched recoherence pass.
//!
//! Concrete fasteners implement the [`Fastener`] trait around a
//! [`FastenerCore`], which holds the shared state machine. The canonical
//! concrete unit is [`Property`](crate::Property).
//!
//! # Inheritance
//!
//! While the `INHERITS` flag is set, mounting resolves a *super-fastener*:
//! the same-named unit on the nearest ancestor context, found through
//! [`FastenerContext::get_super_fastener`]. The unit registers itself as a
//! sub-fastener of its super-fastener and enters the `INHERITED` state
//! whenever its own affinity does not exceed
//! `min(super affinity, Affinity::INTRINSIC)`. `INHERITED` is re-derived on
//! every affinity change and every super-binding change; it is never cached
//! beyond the flag itself.

pub mod context;
pub mod property;

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Instant;

use bitflags::bitflags;
use tracing::{debug, trace};

use crate::error::Result;
use crate::types::Affinity;

pub use context::FastenerContext;
pub use property::Property;

// =============================================================================
// Flags
// =============================================================================

bitflags! {
    /// Fastener state flags. The affinity lives in a separate field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FastenerFlags: u8 {
        /// The fastener's owner has mounted it.
        const MOUNTED = 1 << 0;
        /// The fastener wants to inherit from a same-named ancestor unit.
        const INHERITS = 1 << 1;
        /// The fastener currently mirrors its super-fastener's value.
        const INHERITED = 1 << 2;
        /// Marked dirty, pending recomputation.
        const DECOHERENT = 1 << 3;
    }
}

/// Inheritance request passed to [`FastenerCore::set_inherits`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inherits {
    /// Do not inherit.
    Disabled,
    /// Inherit from the same-named ancestor fastener.
    Enabled,
    /// Inherit under an alternate lookup name, overwriting the fastener's
    /// name.
    Named(String),
}

thread_local! {
    /// Counter for process-unique fastener ids.
    static NEXT_FASTENER_ID: Cell<u64> = const { Cell::new(1) };
}

// =============================================================================
// Fastener trait
// =============================================================================

/// A named binding unit attached to a [`FastenerContext`] owner.
///
/// Implementations embed a [`FastenerCore`] and return it from [`core`];
/// every state-machine operation (affinity, inheritance, decoherence,
/// mounting) lives on the core, and the trait's remaining methods are
/// overridable hooks with no-op defaults.
///
/// [`core`]: Fastener::core
pub trait Fastener: 'static {
    /// The shared state machine.
    fn core(&self) -> &FastenerCore;

    /// Typed access for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Typed access for downcasting behind `Rc`.
    fn as_any_rc(self: Rc<Self>) -> Rc<dyn Any>;

    /// Recomputation step run by the owner's recoherence pass. Default
    /// no-op; all fasteners of one pass observe the same `timestamp`.
    fn recohere(&self, _timestamp: Instant) {}

    // -- affinity hooks ------------------------------------------------------

    fn will_set_affinity(&self, _new: Affinity, _old: Affinity) {}
    fn on_set_affinity(&self, _new: Affinity, _old: Affinity) {}
    fn did_set_affinity(&self, _new: Affinity, _old: Affinity) {}

    // -- inheritance hooks ---------------------------------------------------

    fn will_set_inherits(&self, _inherits: bool) {}
    fn on_set_inherits(&self, _inherits: bool) {}
    fn did_set_inherits(&self, _inherits: bool) {}

    fn will_inherit(&self, _super_fastener: &Rc<dyn Fastener>) {}
    fn on_inherit(&self, _super_fastener: &Rc<dyn Fastener>) {}
    fn did_inherit(&self, _super_fastener: &Rc<dyn Fastener>) {}

    fn will_uninherit(&self) {}
    fn on_uninherit(&self) {}
    fn did_uninherit(&self) {}

    // -- super/sub binding hooks ---------------------------------------------

    fn will_bind_super_fastener(&self, _super_fastener: &Rc<dyn Fastener>) {}
    fn on_bind_super_fastener(&self, _super_fastener: &Rc<dyn Fastener>) {}
    fn did_bind_super_fastener(&self, _super_fastener: &Rc<dyn Fastener>) {}

    fn will_unbind_super_fastener(&self, _super_fastener: &Rc<dyn Fastener>) {}
    fn on_unbind_super_fastener(&self, _super_fastener: &Rc<dyn Fastener>) {}
    fn did_unbind_super_fastener(&self, _super_fastener: &Rc<dyn Fastener>) {}

    fn on_attach_sub_fastener(&self, _sub_fastener: &Rc<dyn Fastener>) {}
    fn on_detach_sub_fastener(&self, _sub_fastener: &Rc<dyn Fastener>) {}

    // -- lifecycle hooks -----------------------------------------------------

    fn will_mount(&self) {}
    fn on_mount(&self) {}
    fn did_mount(&self) {}

    fn will_unmount(&self) {}
    fn on_unmount(&self) {}
    fn did_unmount(&self) {}
}

// =============================================================================
// FastenerCore
// =============================================================================

/// Shared state machine embedded by every concrete fastener.
///
/// Holds the owner back-reference, name, flags, affinity, and the super/sub
/// fastener graph. The super-fastener and sub-fastener references are weak:
/// they are never the sole thing keeping a unit alive and are cleared during
/// unbind.
pub struct FastenerCore {
    /// Process-unique id, used for equality and diagnostics.
    id: u64,
    /// Non-owning back-reference to the owning context; fixed at construction.
    owner: Weak<dyn FastenerContext>,
    /// Name among the owner's fasteners; overwritten when switching to named
    /// inheritance.
    name: RefCell<String>,
    flags: Cell<FastenerFlags>,
    affinity: Cell<Affinity>,
    /// Lazily-resolved same-named unit on an ancestor context.
    super_fastener: RefCell<Option<Weak<dyn Fastener>>>,
    /// Units currently inheriting from this one.
    sub_fasteners: RefCell<Vec<Weak<dyn Fastener>>>,
    /// Back-reference to the concrete fastener embedding this core, for hook
    /// dispatch. Set once by `bind_self` right after construction.
    self_ref: RefCell<Option<Weak<dyn Fastener>>>,
}

impl FastenerCore {
    /// Create a core owned by `owner` under `name`.
    pub fn new(owner: &Rc<dyn FastenerContext>, name: impl Into<String>) -> FastenerCore {
        let id = NEXT_FASTENER_ID.with(|next| {
            let id = next.get();
            next.set(id + 1);
            id
        });
        FastenerCore {
            id,
            owner: Rc::downgrade(owner),
            name: RefCell::new(name.into()),
            flags: Cell::new(FastenerFlags::empty()),
            affinity: Cell::new(Affinity::EXTRINSIC),
            super_fastener: RefCell::new(None),
            sub_fasteners: RefCell::new(Vec::new()),
            self_ref: RefCell::new(None),
        }
    }

    /// Register the concrete fastener embedding this core. Must be called by
    /// the concrete constructor before the fastener is used.
    pub fn bind_self(&self, this: Weak<dyn Fastener>) {
        *self.self_ref.borrow_mut() = Some(this);
    }

    fn this(&self) -> Option<Rc<dyn Fastener>> {
        self.self_ref.borrow().as_ref().and_then(Weak::upgrade)
    }

    // -- accessors -----------------------------------------------------------

    /// Process-unique id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The fastener's name among its owner's fasteners.
    pub fn name(&self) -> String {
        self.name.borrow().clone()
    }

    /// The owning context, if still alive.
    pub fn owner(&self) -> Option<Rc<dyn FastenerContext>> {
        self.owner.upgrade()
    }

    /// Current state flags.
    pub fn flags(&self) -> FastenerFlags {
        self.flags.get()
    }

    /// Current affinity.
    pub fn affinity(&self) -> Affinity {
        self.affinity.get()
    }

    pub fn is_mounted(&self) -> bool {
        self.flags.get().contains(FastenerFlags::MOUNTED)
    }

    pub fn inherits(&self) -> bool {
        self.flags.get().contains(FastenerFlags::INHERITS)
    }

    pub fn is_inherited(&self) -> bool {
        self.flags.get().contains(FastenerFlags::INHERITED)
    }

    pub fn is_decoherent(&self) -> bool {
        self.flags.get().contains(FastenerFlags::DECOHERENT)
    }

    /// The currently bound super-fastener, if any.
    pub fn super_fastener(&self) -> Option<Rc<dyn Fastener>> {
        self.super_fastener
            .borrow()
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// Snapshot of the units currently inheriting from this one.
    pub fn sub_fasteners(&self) -> Vec<Rc<dyn Fastener>> {
        self.sub_fasteners
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    fn set_flag(&self, flag: FastenerFlags, on: bool) {
        let mut flags = self.flags.get();
        flags.set(flag, on);
        self.flags.set(flags);
    }

    // -- affinity ------------------------------------------------------------

    /// Set the affinity. [`Affinity::REFLEXIVE`] keeps the current level;
    /// any other out-of-range level is an `InvalidArgument`.
    ///
    /// A change re-derives the `INHERITED` state: a unit exits `INHERITED`
    /// when its own affinity rises above `min(super affinity, INTRINSIC)`,
    /// and an actively-inheriting unit enters it when its affinity drops back
    /// to that ceiling or below.
    pub fn set_affinity(&self, affinity: Affinity) -> Result<()> {
        if affinity.is_reflexive() {
            return Ok(());
        }
        let new = Affinity::from_raw(affinity.raw())?;
        let old = self.affinity.get();
        if new == old {
            return Ok(());
        }
        let this = self.this();
        if let Some(ref t) = this {
            t.will_set_affinity(new, old);
        }
        self.affinity.set(new);
        if let Some(ref t) = this {
            t.on_set_affinity(new, old);
        }
        self.rederive_inherited();
        if let Some(ref t) = this {
            t.did_set_affinity(new, old);
        }
        Ok(())
    }

    /// Raise the affinity to at least `affinity`, never lowering it.
    ///
    /// Returns whether the requested level prevails, i.e. whether it is at
    /// least the previously held affinity. Derived-value setters use this to
    /// avoid downgrading a stronger override: a `false` return means a
    /// stronger source owns the value and the write should be skipped.
    pub fn min_affinity(&self, affinity: Affinity) -> Result<bool> {
        if affinity.is_reflexive() {
            return Ok(true);
        }
        let requested = Affinity::from_raw(affinity.raw())?;
        let old = self.affinity.get();
        if old < requested {
            self.set_affinity(requested)?;
        }
        Ok(requested >= old)
    }

    /// Re-derive the `INHERITED` flag from current affinities. Exact at all
    /// times: `INHERITED` holds iff `INHERITS` is set, a super-fastener is
    /// bound, and own affinity <= min(super affinity, INTRINSIC).
    fn rederive_inherited(&self) {
        let flags = self.flags.get();
        if !flags.contains(FastenerFlags::INHERITS) {
            return;
        }
        let Some(super_fastener) = self.super_fastener() else {
            return;
        };
        let ceiling = Affinity::INTRINSIC.min(super_fastener.core().affinity());
        let own = self.affinity.get();
        if flags.contains(FastenerFlags::INHERITED) {
            if own > ceiling {
                self.uninherit();
            }
        } else if own <= ceiling {
            self.inherit(&super_fastener);
        }
    }

    fn inherit(&self, super_fastener: &Rc<dyn Fastener>) {
        let this = self.this();
        if let Some(ref t) = this {
            t.will_inherit(super_fastener);
        }
        self.set_flag(FastenerFlags::INHERITED, true);
        if let Some(ref t) = this {
            t.on_inherit(super_fastener);
            t.did_inherit(super_fastener);
        }
    }

    fn uninherit(&self) {
        let this = self.this();
        if let Some(ref t) = this {
            t.will_uninherit();
        }
        self.set_flag(FastenerFlags::INHERITED, false);
        if let Some(ref t) = this {
            t.on_uninherit();
            t.did_uninherit();
        }
    }

    // -- inheritance binding -------------------------------------------------

    /// Change whether (and under which name) this fastener inherits.
    ///
    /// Unbinds any current super-fastener first, updates the flag and the
    /// optional alternate lookup name, then re-binds while mounted.
    pub fn set_inherits(&self, inherits: Inherits) {
        let enable = !matches!(inherits, Inherits::Disabled);
        self.unbind_super_fastener();
        let this = self.this();
        if let Some(ref t) = this {
            t.will_set_inherits(enable);
        }
        if let Inherits::Named(name) = inherits {
            *self.name.borrow_mut() = name;
        }
        self.set_flag(FastenerFlags::INHERITS, enable);
        if let Some(ref t) = this {
            t.on_set_inherits(enable);
            t.did_set_inherits(enable);
        }
        if enable && self.is_mounted() {
            self.bind_super_fastener();
        }
    }

    /// Resolve and bind the super-fastener through the owner's context
    /// protocol. No-op unless `INHERITS` is set and the owner chain resolves
    /// a same-named unit.
    pub fn bind_super_fastener(&self) {
        if !self.flags.get().contains(FastenerFlags::INHERITS) {
            return;
        }
        let Some(owner) = self.owner.upgrade() else {
            return;
        };
        let name = self.name();
        let Some(super_fastener) = owner.get_super_fastener(&name) else {
            return;
        };
        debug!(fastener = self.id, name = %name, super_fastener = super_fastener.core().id, "bind super fastener");
        let this = self.this();
        if let Some(ref t) = this {
            t.will_bind_super_fastener(&super_fastener);
        }
        *self.super_fastener.borrow_mut() = Some(Rc::downgrade(&super_fastener));
        if let Some(ref t) = this {
            super_fastener.core().attach_sub_fastener(t);
            t.on_bind_super_fastener(&super_fastener);
        }
        self.rederive_inherited();
        if let Some(ref t) = this {
            t.did_bind_super_fastener(&super_fastener);
        }
    }

    /// Unbind from the super-fastener, always clearing `INHERITED`.
    pub fn unbind_super_fastener(&self) {
        let super_fastener = self.super_fastener();
        let this = self.this();
        if let Some(super_fastener) = super_fastener {
            debug!(fastener = self.id, super_fastener = super_fastener.core().id, "unbind super fastener");
            if let Some(ref t) = this {
                t.will_unbind_super_fastener(&super_fastener);
            }
            if let Some(ref t) = this {
                super_fastener.core().detach_sub_fastener(t);
            }
            *self.super_fastener.borrow_mut() = None;
            if self.flags.get().contains(FastenerFlags::INHERITED) {
                self.uninherit();
            }
            if let Some(ref t) = this {
                t.on_unbind_super_fastener(&super_fastener);
                t.did_unbind_super_fastener(&super_fastener);
            }
        } else {
            *self.super_fastener.borrow_mut() = None;
            if self.flags.get().contains(FastenerFlags::INHERITED) {
                self.uninherit();
            }
        }
    }

    fn attach_sub_fastener(&self, sub_fastener: &Rc<dyn Fastener>) {
        self.sub_fasteners
            .borrow_mut()
            .push(Rc::downgrade(sub_fastener));
        if let Some(this) = self.this() {
            this.on_attach_sub_fastener(sub_fastener);
        }
    }

    fn detach_sub_fastener(&self, sub_fastener: &Rc<dyn Fastener>) {
        self.sub_fasteners.borrow_mut().retain(|weak| {
            weak.upgrade()
                .is_none_or(|sub| !Rc::ptr_eq(&sub, sub_fastener))
        });
        if let Some(this) = self.this() {
            this.on_detach_sub_fastener(sub_fastener);
        }
    }

    // -- decoherence ---------------------------------------------------------

    /// Mark this fastener dirty and ask the owner to enqueue it for the next
    /// recoherence pass. The owner appends without de-duplication.
    pub fn decohere(&self) {
        trace!(fastener = self.id, name = %self.name.borrow(), "decohere");
        self.set_flag(FastenerFlags::DECOHERENT, true);
        if let (Some(owner), Some(this)) = (self.owner.upgrade(), self.this()) {
            owner.decohere_fastener(this);
        }
    }

    /// Decohere every unit currently inheriting from this one. Called by
    /// concrete fasteners when their effective value changes.
    pub fn decohere_sub_fasteners(&self) {
        for sub_fastener in self.sub_fasteners() {
            sub_fastener.core().decohere();
        }
    }

    pub(crate) fn clear_decoherent(&self) {
        self.set_flag(FastenerFlags::DECOHERENT, false);
    }

    // -- lifecycle -----------------------------------------------------------

    /// Mount this fastener. Idempotent: a redundant call is a no-op, not an
    /// error, because multiple code paths may legitimately request mounting.
    /// Mounting attempts to bind the super-fastener.
    pub fn mount(&self) {
        if self.is_mounted() {
            return;
        }
        let this = self.this();
        if let Some(ref t) = this {
            t.will_mount();
        }
        self.set_flag(FastenerFlags::MOUNTED, true);
        if let Some(ref t) = this {
            t.on_mount();
        }
        self.bind_super_fastener();
        if let Some(ref t) = this {
            t.did_mount();
        }
    }

    /// Unmount this fastener, unbinding the super-fastener. Idempotent.
    pub fn unmount(&self) {
        if !self.is_mounted() {
            return;
        }
        let this = self.this();
        if let Some(ref t) = this {
            t.will_unmount();
        }
        self.unbind_super_fastener();
        self.set_flag(FastenerFlags::MOUNTED, false);
        if let Some(ref t) = this {
            t.on_unmount();
            t.did_unmount();
        }
    }
}

impl fmt::Debug for FastenerCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FastenerCore")
            .field("id", &self.id)
            .field("name", &*self.name.borrow())
            .field("flags", &self.flags.get())
            .field("affinity", &self.affinity.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use std::cell::RefCell;

    /// Minimal fastener recording hook invocations.
    struct TestUnit {
        core: FastenerCore,
        log: RefCell<Vec<String>>,
        recohered: Cell<u32>,
        redecohere_once: Cell<bool>,
    }

    impl TestUnit {
        fn new(node: &Node, name: &str) -> Rc<TestUnit> {
            let unit = Rc::new(TestUnit {
                core: FastenerCore::new(&node.context(), name),
                log: RefCell::new(Vec::new()),
                recohered: Cell::new(0),
                redecohere_once: Cell::new(false),
            });
            unit.core.bind_self(Rc::downgrade(&unit) as Weak<dyn Fastener>);
            unit
        }

        fn log_entries(&self) -> Vec<String> {
            self.log.borrow().clone()
        }
    }

    impl Fastener for TestUnit {
        fn core(&self) -> &FastenerCore {
            &self.core
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_any_rc(self: Rc<Self>) -> Rc<dyn Any> {
            self
        }

        fn will_mount(&self) {
            self.log.borrow_mut().push("will_mount".into());
        }

        fn did_mount(&self) {
            self.log.borrow_mut().push("did_mount".into());
        }

        fn will_unmount(&self) {
            self.log.borrow_mut().push("will_unmount".into());
        }

        fn did_unmount(&self) {
            self.log.borrow_mut().push("did_unmount".into());
        }

        fn did_inherit(&self, _super_fastener: &Rc<dyn Fastener>) {
            self.log.borrow_mut().push("did_inherit".into());
        }

        fn did_uninherit(&self) {
            self.log.borrow_mut().push("did_uninherit".into());
        }

        fn recohere(&self, _timestamp: Instant) {
            self.recohered.set(self.recohered.get() + 1);
            if self.redecohere_once.get() {
                self.redecohere_once.set(false);
                self.core.decohere();
            }
        }
    }

    #[test]
    fn test_mount_is_idempotent() {
        let node = Node::new();
        let unit = TestUnit::new(&node, "u");
        node.add_fastener(unit.clone()).unwrap();

        unit.core.mount();
        unit.core.mount();
        assert!(unit.core.is_mounted());
        assert_eq!(unit.log_entries(), vec!["will_mount", "did_mount"]);

        unit.core.unmount();
        unit.core.unmount();
        assert!(!unit.core.is_mounted());
        assert_eq!(
            unit.log_entries(),
            vec!["will_mount", "did_mount", "will_unmount", "did_unmount"]
        );
    }

    #[test]
    fn test_set_affinity_updates_level() {
        let node = Node::new();
        let unit = TestUnit::new(&node, "u");
        assert!(unit.core.set_affinity(Affinity::INTRINSIC).is_ok());
        assert_eq!(unit.core.affinity(), Affinity::INTRINSIC);
    }

    #[test]
    fn test_set_affinity_reflexive_keeps_current() {
        let node = Node::new();
        let unit = TestUnit::new(&node, "u");
        unit.core.set_affinity(Affinity::TRANSIENT).unwrap();
        unit.core.set_affinity(Affinity::REFLEXIVE).unwrap();
        assert_eq!(unit.core.affinity(), Affinity::TRANSIENT);
    }

    #[test]
    fn test_min_affinity_never_lowers() {
        let node = Node::new();
        let unit = TestUnit::new(&node, "u");
        assert!(unit.core.min_affinity(Affinity::INTRINSIC).unwrap());
        assert_eq!(unit.core.affinity(), Affinity::INTRINSIC);

        // A weaker request does not downgrade and reports defeat.
        assert!(!unit.core.min_affinity(Affinity::EXTRINSIC).unwrap());
        assert_eq!(unit.core.affinity(), Affinity::INTRINSIC);

        // An equal request prevails without change.
        assert!(unit.core.min_affinity(Affinity::INTRINSIC).unwrap());
    }

    #[test]
    fn test_inheritance_binding_on_mount() {
        let parent = Node::new();
        let child = Node::new();
        parent.append_child(&child).unwrap();

        let parent_unit = TestUnit::new(&parent, "shared");
        parent.add_fastener(parent_unit.clone()).unwrap();
        let child_unit = TestUnit::new(&child, "shared");
        child_unit.core.set_inherits(Inherits::Enabled);
        child.add_fastener(child_unit.clone()).unwrap();

        assert!(child_unit.core.super_fastener().is_none());

        parent.cascade_mount().unwrap();
        let bound = child_unit.core.super_fastener().unwrap();
        assert_eq!(bound.core().id(), parent_unit.core.id());
        assert!(child_unit.core.is_inherited());
        assert_eq!(parent_unit.core.sub_fasteners().len(), 1);

        parent.cascade_unmount().unwrap();
        assert!(child_unit.core.super_fastener().is_none());
        assert!(!child_unit.core.is_inherited());
        assert!(parent_unit.core.sub_fasteners().is_empty());
    }

    #[test]
    fn test_affinity_inheritance_law() {
        let parent = Node::new();
        let child = Node::new();
        parent.append_child(&child).unwrap();

        let parent_unit = TestUnit::new(&parent, "shared");
        parent_unit.core.set_affinity(Affinity::INTRINSIC).unwrap();
        parent.add_fastener(parent_unit.clone()).unwrap();

        let child_unit = TestUnit::new(&child, "shared");
        child_unit.core.set_inherits(Inherits::Enabled);
        child.add_fastener(child_unit.clone()).unwrap();

        parent.cascade_mount().unwrap();

        // super affinity >= own affinity: mirrors the ancestor.
        assert!(child_unit.core.is_inherited());
        assert!(child_unit.core.inherits());

        // Raising own affinity above min(super, INTRINSIC) exits INHERITED
        // without changing INHERITS.
        child_unit.core.set_affinity(Affinity::from_raw(3).unwrap()).unwrap();
        assert!(!child_unit.core.is_inherited());
        assert!(child_unit.core.inherits());

        // Lowering back to the ceiling re-enters INHERITED.
        child_unit.core.set_affinity(Affinity::TRANSIENT).unwrap();
        assert!(child_unit.core.is_inherited());
        assert_eq!(
            child_unit.log_entries(),
            vec![
                "will_mount",
                "did_inherit",
                "did_mount",
                "did_uninherit",
                "did_inherit"
            ]
        );
    }

    #[test]
    fn test_named_inheritance_overwrites_name() {
        let parent = Node::new();
        let child = Node::new();
        parent.append_child(&child).unwrap();

        let parent_unit = TestUnit::new(&parent, "accent");
        parent.add_fastener(parent_unit.clone()).unwrap();

        let child_unit = TestUnit::new(&child, "color");
        child.add_fastener(child_unit.clone()).unwrap();
        child_unit.core.set_inherits(Inherits::Named("accent".into()));
        assert_eq!(child_unit.core.name(), "accent");

        parent.cascade_mount().unwrap();
        assert_eq!(
            child_unit.core.super_fastener().unwrap().core().id(),
            parent_unit.core.id()
        );
    }

    #[test]
    fn test_set_inherits_disabled_unbinds() {
        let parent = Node::new();
        let child = Node::new();
        parent.append_child(&child).unwrap();

        let parent_unit = TestUnit::new(&parent, "shared");
        parent.add_fastener(parent_unit).unwrap();
        let child_unit = TestUnit::new(&child, "shared");
        child_unit.core.set_inherits(Inherits::Enabled);
        child.add_fastener(child_unit.clone()).unwrap();
        parent.cascade_mount().unwrap();
        assert!(child_unit.core.is_inherited());

        child_unit.core.set_inherits(Inherits::Disabled);
        assert!(!child_unit.core.inherits());
        assert!(!child_unit.core.is_inherited());
        assert!(child_unit.core.super_fastener().is_none());
    }

    #[test]
    fn test_decoherence_batching() {
        let node = Node::new();
        let u1 = TestUnit::new(&node, "u1");
        let u2 = TestUnit::new(&node, "u2");
        node.add_fastener(u1.clone()).unwrap();
        node.add_fastener(u2.clone()).unwrap();

        u1.core.decohere();
        u2.core.decohere();
        assert!(u1.core.is_decoherent());
        assert!(u2.core.is_decoherent());

        node.recohere_fasteners(None);
        assert_eq!(u1.recohered.get(), 1);
        assert_eq!(u2.recohered.get(), 1);
        assert!(!u1.core.is_decoherent());
        assert!(!u2.core.is_decoherent());
    }

    #[test]
    fn test_redecohere_during_pass_survives_to_next_pass() {
        let node = Node::new();
        let unit = TestUnit::new(&node, "u");
        node.add_fastener(unit.clone()).unwrap();

        unit.redecohere_once.set(true);
        unit.core.decohere();

        node.recohere_fasteners(None);
        // Ran once; the re-enqueue from inside recohere is still pending.
        assert_eq!(unit.recohered.get(), 1);
        assert!(unit.core.is_decoherent());

        node.recohere_fasteners(None);
        assert_eq!(unit.recohered.get(), 2);
        assert!(!unit.core.is_decoherent());
    }
}
