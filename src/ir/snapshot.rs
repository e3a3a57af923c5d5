//! Deoptimization snapshots and their shared entry pool.

use crate::ir::entities::SsaId;

/// One `(interpreter stack slot, SSA id)` pair: on deoptimization, the slot is populated
/// from that id's value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub slot: u32,
    pub value: SsaId,
}

/// Captured interpreter state at one speculative decision point.
///
/// `entries` is a `(start, length)` range into the IR buffer's shared
/// [`super::buffer::IrBuffer::snapshot_entries`] pool, not an owned `Vec`, so cloning a
/// snapshot table (e.g. into a [`crate::jit::trace::CompiledTrace`]) is cheap and so that
/// pass rewrites touch one pool instead of N independent vectors.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    /// Bytecode PC to resume interpretation at if the guard this snapshot backs fails.
    pub resume_pc: u32,
    /// Interpreter stack depth (`stack_base`-relative slot count) to restore.
    pub stack_depth: u32,
    /// Offset into the shared entry pool.
    pub entries_start: u32,
    /// Number of entries belonging to this snapshot.
    pub entries_len: u32,
    /// Index, within the buffer, of the last side-exit (guard) that can still deoptimize
    /// through this snapshot. Used by the register allocator to extend referenced SSA ids'
    /// live ranges through the *last* consuming exit rather than just the first, so a later
    /// guard sharing the snapshot never deoptimizes to a stale value.
    pub last_consuming_guard: Option<u32>,
}

impl Snapshot {
    pub fn entry_range(&self) -> std::ops::Range<usize> {
        self.entries_start as usize..(self.entries_start + self.entries_len) as usize
    }
}
