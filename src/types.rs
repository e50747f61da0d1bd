//! Core types for weft.
//!
//! These types define the foundation that everything builds on: the affinity
//! precedence scale used by binding units, and the generic update-request
//! flags issued by the ownership tree's mutation protocol.

use bitflags::bitflags;

use crate::error::{Result, TreeError};

// =============================================================================
// Affinity
// =============================================================================

/// Precedence level deciding which of two competing value sources wins.
///
/// Higher values win when a local value and an inherited value contend for a
/// binding unit's effective value. Levels in ascending order:
///
/// - [`Affinity::EXTRINSIC`] - low default for externally supplied values
/// - [`Affinity::TRANSIENT`] - short-lived values (animations, interactions)
/// - [`Affinity::INTRINSIC`] - programmatically derived values
///
/// [`Affinity::REFLEXIVE`] is an out-of-band sentinel meaning "keep the
/// current affinity" when used as a requested value. It is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Affinity(u8);

impl Affinity {
    /// Low default for externally supplied values.
    pub const EXTRINSIC: Affinity = Affinity(0);

    /// Short-lived values that may be superseded at any time.
    pub const TRANSIENT: Affinity = Affinity(1);

    /// Programmatically derived values; also the ceiling used when deciding
    /// whether a unit mirrors its super-fastener.
    pub const INTRINSIC: Affinity = Affinity(2);

    /// Sentinel: keep the current affinity unchanged.
    pub const REFLEXIVE: Affinity = Affinity(4);

    /// Highest encodable level (two-bit width).
    pub const MAX: u8 = 3;

    /// Validate a raw level against the two-bit width.
    pub fn from_raw(raw: u8) -> Result<Affinity> {
        if raw > Self::MAX {
            return Err(TreeError::InvalidArgument(format!(
                "affinity {raw} exceeds maximum {}",
                Self::MAX
            )));
        }
        Ok(Affinity(raw))
    }

    /// The raw level.
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Whether this is the "keep current affinity" sentinel.
    pub const fn is_reflexive(self) -> bool {
        self.0 == Self::REFLEXIVE.0
    }

    /// The lower of two levels.
    pub fn min(self, other: Affinity) -> Affinity {
        if self.0 <= other.0 { self } else { other }
    }
}

impl Default for Affinity {
    fn default() -> Self {
        Affinity::EXTRINSIC
    }
}

// =============================================================================
// Update Flags
// =============================================================================

bitflags! {
    /// Generic "update required" flags issued by the base mutation protocol.
    ///
    /// Structural mutation and mounting OR component-specific flags into the
    /// node's pending set; render/layout collaborators drain the set with
    /// [`Node::take_update_flags`](crate::Node::take_update_flags).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct UpdateFlags: u32 {
        /// Generic re-process request.
        const NEEDS_UPDATE = 1 << 0;
        /// Layout must be recomputed.
        const NEEDS_LAYOUT = 1 << 1;
        /// Output must be regenerated.
        const NEEDS_RENDER = 1 << 2;
    }
}
