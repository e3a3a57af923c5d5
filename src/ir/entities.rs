//! Dense entity references into the IR buffer and its side tables.
//!
//! An [`SsaId`] *is* a node's position in the [`super::buffer::IrBuffer`]; [`SnapshotId`] and
//! [`LiveRangeId`] key the parallel snapshot and live-range tables the same way. All three
//! follow Cranelift's entity-reference convention: a newtype around a `u32` index,
//! implementing `EntityRef` so they can key `PrimaryMap`/`SecondaryMap` arenas instead of
//! being threaded through the IR as real pointers.

use cranelift_entity::entity_impl;
use std::fmt;

/// An opaque reference to an IR node, equal to its index in the IR buffer.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SsaId(u32);
entity_impl!(SsaId, "v");

/// An opaque reference to a snapshot in a trace's snapshot table.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnapshotId(u32);
entity_impl!(SnapshotId, "ss");

/// An opaque reference to a live range computed by the register allocator.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LiveRangeId(u32);
entity_impl!(LiveRangeId, "lr");

/// A node operand: either a prior SSA id, or the `NONE` sentinel.
///
/// Kept as a distinct type rather than `Option<SsaId>` so that `NONE` prints the same way
/// the rest of the IR's entity references do, matching Cranelift's `PackedOption` display
/// convention of rendering an absent reference as a recognizable placeholder instead of
/// `None`.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Operand(Option<SsaId>);

impl Operand {
    /// The `NONE` sentinel: no operand.
    pub const NONE: Operand = Operand(None);

    /// Wrap a present operand.
    pub fn some(id: SsaId) -> Self {
        Operand(Some(id))
    }

    /// `true` if this is the `NONE` sentinel.
    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    /// The referenced id, if any.
    pub fn expand(&self) -> Option<SsaId> {
        self.0
    }
}

impl From<SsaId> for Operand {
    fn from(id: SsaId) -> Self {
        Operand::some(id)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(id) => id.fmt(f),
            None => write!(f, "-"),
        }
    }
}

impl fmt::Debug for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (self as &dyn fmt::Display).fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_entity::EntityRef;

    #[test]
    fn ssa_id_is_a_dense_index() {
        let a = SsaId::new(0);
        let b = SsaId::new(1);
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "v0");
    }

    #[test]
    fn operand_none_round_trips() {
        let none = Operand::NONE;
        assert!(none.is_none());
        assert_eq!(none.expand(), None);
        assert_eq!(none.to_string(), "-");

        let some = Operand::from(SsaId::new(3));
        assert!(!some.is_none());
        assert_eq!(some.expand(), Some(SsaId::new(3)));
    }
}
