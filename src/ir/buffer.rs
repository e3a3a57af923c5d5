//! The ordered IR node sequence plus its snapshot side tables.

use crate::ir::entities::{Operand, SnapshotId, SsaId};
use crate::ir::node::{IrNode, Opcode};
use crate::ir::snapshot::{Snapshot, SnapshotEntry};
use cranelift_entity::PrimaryMap;

/// An ordered sequence of [`IrNode`]s, capped at a fixed maximum, plus the snapshot table
/// and shared snapshot-entry pool a trace needs end to end.
///
/// Mirrors how Cranelift's `Function` bundles a `DataFlowGraph` with its side tables
/// (stack slots, jump tables) in one struct that the optimizer mutates in place and the
/// code generator later walks read-only.
#[derive(Debug)]
pub struct IrBuffer {
    nodes: PrimaryMap<SsaId, IrNode>,
    cap: usize,
    loop_header: Option<SsaId>,
    loop_back: Option<SsaId>,
    snapshots: PrimaryMap<SnapshotId, Snapshot>,
    snapshot_entries: Vec<SnapshotEntry>,
    call_args: Vec<SsaId>,
    max_snapshots: usize,
    max_snapshot_entries_per_snapshot: usize,
}

/// The buffer reached its node cap; the recorder must abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferFull;

impl IrBuffer {
    pub fn new(cap: usize, max_snapshots: usize, max_snapshot_entries_per_snapshot: usize) -> Self {
        IrBuffer {
            nodes: PrimaryMap::new(),
            cap,
            loop_header: None,
            loop_back: None,
            snapshots: PrimaryMap::new(),
            snapshot_entries: Vec::new(),
            call_args: Vec::new(),
            max_snapshots,
            max_snapshot_entries_per_snapshot,
        }
    }

    /// Append a node, returning its freshly assigned SSA id, or `Err(BufferFull)` once the
    /// cap is reached.
    pub fn push(&mut self, node: IrNode) -> Result<SsaId, BufferFull> {
        if self.nodes.len() >= self.cap {
            return Err(BufferFull);
        }
        if node.opcode == Opcode::LoopHeader {
            debug_assert!(self.loop_header.is_none(), "at most one loop-header node");
        }
        if node.opcode == Opcode::LoopBack {
            debug_assert!(self.loop_back.is_none(), "at most one loop-back node");
        }
        let id = self.nodes.push(node);
        match self.nodes[id].opcode {
            Opcode::LoopHeader => self.loop_header = Some(id),
            Opcode::LoopBack => self.loop_back = Some(id),
            _ => {}
        }
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// The fixed node cap this buffer was constructed with. GVN's open-addressed table
    /// sizes itself off this.
    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: SsaId) -> &IrNode {
        &self.nodes[id]
    }

    pub fn get_mut(&mut self, id: SsaId) -> &mut IrNode {
        &mut self.nodes[id]
    }

    /// Iterate `(id, node)` pairs in buffer order — the order every pass walks in.
    pub fn iter(&self) -> impl Iterator<Item = (SsaId, &IrNode)> {
        self.nodes.iter()
    }

    pub fn loop_header(&self) -> Option<SsaId> {
        self.loop_header
    }

    pub fn loop_back(&self) -> Option<SsaId> {
        self.loop_back
    }

    /// Record a new snapshot, returning its id, or `None` once `max_snapshots` is hit.
    pub fn push_snapshot(
        &mut self,
        resume_pc: u32,
        stack_depth: u32,
        entries: &[SnapshotEntry],
    ) -> Option<SnapshotId> {
        if self.snapshots.len() >= self.max_snapshots {
            return None;
        }
        if entries.len() > self.max_snapshot_entries_per_snapshot {
            return None;
        }
        let start = self.snapshot_entries.len() as u32;
        self.snapshot_entries.extend_from_slice(entries);
        Some(self.snapshots.push(Snapshot {
            resume_pc,
            stack_depth,
            entries_start: start,
            entries_len: entries.len() as u32,
            last_consuming_guard: None,
        }))
    }

    pub fn snapshot(&self, id: SnapshotId) -> &Snapshot {
        &self.snapshots[id]
    }

    pub fn snapshot_mut(&mut self, id: SnapshotId) -> &mut Snapshot {
        &mut self.snapshots[id]
    }

    pub fn snapshot_entries(&self, id: SnapshotId) -> &[SnapshotEntry] {
        let s = self.snapshots[id];
        &self.snapshot_entries[s.entry_range()]
    }

    pub fn snapshot_entries_mut(&mut self, id: SnapshotId) -> &mut [SnapshotEntry] {
        let range = self.snapshots[id].entry_range();
        &mut self.snapshot_entries[range]
    }

    pub fn snapshots_iter(&self) -> impl Iterator<Item = (SnapshotId, &Snapshot)> {
        self.snapshots.iter()
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Rewrite every use of `from` (in node operands *and* in snapshot entries) to `to`.
    /// Every rewriting pass relies on this touching both the node array and the
    /// snapshot-entry pool, or a hoisted/replaced value would go stale in a deopt snapshot.
    pub fn replace_all_uses(&mut self, from: SsaId, to: SsaId) {
        for (_, node) in self.nodes.iter_mut() {
            node.replace_uses(from, to);
        }
        for entry in &mut self.snapshot_entries {
            if entry.value == from {
                entry.value = to;
            }
        }
    }

    /// Push a run of extra call arguments into the shared pool, returning `(start, len)`
    /// for the node's `SlotField` immediate.
    pub fn push_call_args(&mut self, args: &[SsaId]) -> (u32, u32) {
        let start = self.call_args.len() as u32;
        self.call_args.extend_from_slice(args);
        (start, args.len() as u32)
    }

    pub fn call_args(&self, start: u32, len: u32) -> &[SsaId] {
        &self.call_args[start as usize..(start + len) as usize]
    }

    /// `true` if `operand` is an in-range, not-dead reference — the check both the
    /// verifier and release-mode guards against `CoreBug` use.
    pub fn operand_is_live(&self, operand: Operand) -> bool {
        match operand.expand() {
            None => true,
            Some(id) => (id.index()) < self.nodes.len() && !self.nodes[id].is_dead(),
        }
    }
}
