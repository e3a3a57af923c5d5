//! Live range computation.

use super::RegClass;
use crate::ir::{IrBuffer, IrNode, IrType, Opcode, SsaId};
use cranelift_entity::EntityRef;
use std::collections::HashMap;

/// One SSA id's lifetime, expressed as `[start, end]` node-index bounds.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LiveRange {
    pub ssa_id: SsaId,
    pub class: RegClass,
    pub start: u32,
    pub end: u32,
}

fn produces_value(node: &IrNode) -> bool {
    node.ty != IrType::Void && !node.is_dead()
}

/// Compute every live-valued node's range, compacted and sorted by start ascending (end as
/// tiebreaker).
pub fn compute_live_ranges(buffer: &IrBuffer) -> Vec<LiveRange> {
    let mut ranges: HashMap<SsaId, LiveRange> = HashMap::new();

    for (id, node) in buffer.iter() {
        if produces_value(node) {
            let idx = id.index() as u32;
            ranges.insert(
                id,
                LiveRange {
                    ssa_id: id,
                    class: RegClass::for_type(node.ty),
                    start: idx,
                    end: idx,
                },
            );
        }
    }

    for (id, node) in buffer.iter() {
        let idx = id.index() as u32;
        for operand in &node.operands {
            if let Some(used) = operand.expand() {
                if let Some(range) = ranges.get_mut(&used) {
                    range.end = range.end.max(idx);
                }
            }
        }
    }

    // Snapshot entries extend their referenced id through the last side-exit that can still
    // deoptimize via that snapshot; fall back to the snapshot node's own position if no
    // guard has claimed it yet.
    let mut snapshot_positions: HashMap<_, u32> = HashMap::new();
    for (id, node) in buffer.iter() {
        if node.opcode == Opcode::Snapshot {
            if let Some(snap) = node.imm.as_snapshot() {
                snapshot_positions.insert(snap, id.index() as u32);
            }
        }
    }
    for (snap_id, snapshot) in buffer.snapshots_iter() {
        let exit_index = snapshot
            .last_consuming_guard
            .unwrap_or_else(|| snapshot_positions.get(&snap_id).copied().unwrap_or(0));
        for entry in buffer.snapshot_entries(snap_id) {
            if let Some(range) = ranges.get_mut(&entry.value) {
                range.end = range.end.max(exit_index);
            }
        }
    }

    // PHIs: both the PHI itself and its back-edge operand live through loop-back.
    if let Some(back) = buffer.loop_back() {
        let back_idx = back.index() as u32;
        for (id, node) in buffer.iter() {
            if node.opcode == Opcode::Phi {
                if let Some(range) = ranges.get_mut(&id) {
                    range.end = range.end.max(back_idx);
                }
                if let Some(back_operand) = node.op1().expand() {
                    if let Some(range) = ranges.get_mut(&back_operand) {
                        range.end = range.end.max(back_idx);
                    }
                }
            }
        }
    }

    let mut out: Vec<LiveRange> = ranges.into_values().collect();
    out.sort_by(|a, b| a.start.cmp(&b.start).then(a.end.cmp(&b.end)));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Immediate, Operand};

    fn node(opcode: Opcode, ty: IrType, operands: [Operand; 2], imm: Immediate) -> IrNode {
        IrNode::new(opcode, ty, operands, imm)
    }

    #[test]
    fn start_equals_definition_and_end_extends_to_last_use() {
        let mut buf = IrBuffer::new(16, 8, 8);
        let a = buf
            .push(node(Opcode::ConstNum, IrType::Num, [Operand::NONE, Operand::NONE], Immediate::Num(1.0)))
            .unwrap();
        let b = buf
            .push(node(Opcode::ConstNum, IrType::Num, [Operand::NONE, Operand::NONE], Immediate::Num(2.0)))
            .unwrap();
        buf.push(node(
            Opcode::Arith,
            IrType::Num,
            [Operand::from(a), Operand::from(b)],
            Immediate::Arith(crate::ir::ArithOp::Add),
        ))
        .unwrap();

        let ranges = compute_live_ranges(&buf);
        let a_range = ranges.iter().find(|r| r.ssa_id == a).unwrap();
        assert_eq!(a_range.start, 0);
        assert_eq!(a_range.end, 2);
        assert_eq!(a_range.class, RegClass::Fp);
    }

    #[test]
    fn dead_nodes_produce_no_range() {
        let mut buf = IrBuffer::new(16, 8, 8);
        let mut n = node(Opcode::ConstNum, IrType::Num, [Operand::NONE, Operand::NONE], Immediate::Num(1.0));
        n.kill();
        let id = buf.push(n).unwrap();
        let ranges = compute_live_ranges(&buf);
        assert!(!ranges.iter().any(|r| r.ssa_id == id));
    }

    #[test]
    fn snapshot_entry_extends_range_to_consuming_guard() {
        let mut buf = IrBuffer::new(16, 8, 8);
        let a = buf
            .push(node(Opcode::ConstNum, IrType::Num, [Operand::NONE, Operand::NONE], Immediate::Num(1.0)))
            .unwrap();
        let snap = buf
            .push_snapshot(0, 0, &[crate::ir::SnapshotEntry { slot: 0, value: a }])
            .unwrap();
        buf.push(node(
            Opcode::Snapshot,
            IrType::Void,
            [Operand::NONE, Operand::NONE],
            Immediate::Snapshot(snap),
        ))
        .unwrap();
        let guard_id = buf
            .push(node(
                Opcode::Guard,
                IrType::Void,
                [Operand::from(a), Operand::NONE],
                Immediate::Guard(crate::ir::GuardKind::Num, snap),
            ))
            .unwrap();
        buf.snapshot_mut(snap).last_consuming_guard = Some(guard_id.index() as u32);

        let ranges = compute_live_ranges(&buf);
        let a_range = ranges.iter().find(|r| r.ssa_id == a).unwrap();
        assert_eq!(a_range.end, guard_id.index() as u32);
    }
}
