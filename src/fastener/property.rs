//! Property - the canonical value-holding fastener.
//!
//! A `Property<T>` holds one value of type `T` with affinity-guarded writes.
//! While `INHERITED` it mirrors its super-property's value: an inherited
//! property copies the ancestor value when it enters the inherited state, is
//! decohered whenever the ancestor value changes, and re-reads the ancestor
//! during its owner's recoherence pass.

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Instant;

use crate::error::Result;
use crate::types::Affinity;

use super::{Fastener, FastenerContext, FastenerCore};

/// A named, owner-attached value of type `T`.
///
/// # Example
///
/// ```ignore
/// let node = Node::new();
/// let width = Property::new(&node.context(), "width", 80u16);
/// node.add_fastener(width.clone())?;
///
/// width.set(120)?;                      // extrinsic write
/// width.set_intrinsic(200)?;            // derived write, raises affinity
/// assert_eq!(width.get(), 200);
/// width.set(10)?;                       // defeated: intrinsic still owns it
/// assert_eq!(width.get(), 200);
/// ```
pub struct Property<T> {
    core: FastenerCore,
    value: RefCell<T>,
}

impl<T: Clone + PartialEq + 'static> Property<T> {
    /// Create a property owned by `owner` under `name` with an initial value.
    pub fn new(
        owner: &Rc<dyn FastenerContext>,
        name: impl Into<String>,
        value: T,
    ) -> Rc<Property<T>> {
        let property = Rc::new(Property {
            core: FastenerCore::new(owner, name),
            value: RefCell::new(value),
        });
        property
            .core
            .bind_self(Rc::downgrade(&property) as Weak<dyn Fastener>);
        property
    }

    /// The current value.
    pub fn get(&self) -> T {
        self.value.borrow().clone()
    }

    /// Write with [`Affinity::EXTRINSIC`]. Skipped when a stronger source
    /// currently owns the value.
    pub fn set(&self, value: T) -> Result<()> {
        self.set_with_affinity(value, Affinity::EXTRINSIC)
    }

    /// Write with [`Affinity::INTRINSIC`], the level used by derived values.
    pub fn set_intrinsic(&self, value: T) -> Result<()> {
        self.set_with_affinity(value, Affinity::INTRINSIC)
    }

    /// Write with an explicit affinity. The affinity is raised to `affinity`
    /// if currently lower; the write is skipped when a stronger source owns
    /// the value. [`Affinity::REFLEXIVE`] writes at the current affinity.
    pub fn set_with_affinity(&self, value: T, affinity: Affinity) -> Result<()> {
        if self.core.min_affinity(affinity)? {
            self.set_value(value);
        }
        Ok(())
    }

    /// Unconditional write, bypassing the affinity guard. Used internally by
    /// inheritance mirroring.
    fn set_value(&self, value: T) {
        {
            if *self.value.borrow() == value {
                return;
            }
        }
        *self.value.borrow_mut() = value;
        self.core.decohere_sub_fasteners();
    }

    fn mirror_super(&self, super_fastener: &Rc<dyn Fastener>) {
        if let Some(super_property) = super_fastener.as_any().downcast_ref::<Property<T>>() {
            self.set_value(super_property.get());
        }
    }
}

impl<T: Clone + PartialEq + 'static> Fastener for Property<T> {
    fn core(&self) -> &FastenerCore {
        &self.core
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_rc(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }

    fn on_inherit(&self, super_fastener: &Rc<dyn Fastener>) {
        self.mirror_super(super_fastener);
    }

    fn recohere(&self, _timestamp: Instant) {
        if self.core.is_inherited()
            && let Some(super_fastener) = self.core.super_fastener()
        {
            self.mirror_super(&super_fastener);
        }
    }
}

impl<T: Clone + PartialEq + std::fmt::Debug + 'static> std::fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Property")
            .field("core", &self.core)
            .field("value", &*self.value.borrow())
            .finish()
    }
}
