//! Passes 11 and 14: dead-code elimination.
//!
//! Mark-sweep over the buffer. Roots are every node with an effect the rest of the trace
//! can't recover if it's gone — stores, guards (which double as side-exits), loop-header and
//! loop-back, calls, snapshots, and phis — plus every SSA id a snapshot entry still
//! references. Liveness propagates backward through operands from there; anything left
//! unmarked is killed. Proof-guard elimination's phase B (pass 12) pre-kills the stack
//! stores it proves dispensable before this pass's second run, so those are simply already
//! dead by the time DCE looks at them — no separate bookkeeping needed.

use super::snapshot_referenced_ids;
use crate::ir::{IrBuffer, Opcode, SsaId};
use cranelift_entity::EntityRef;
use std::collections::HashSet;

pub fn run(buffer: &mut IrBuffer) {
    let mut live: HashSet<SsaId> = snapshot_referenced_ids(buffer);
    let mut worklist: Vec<SsaId> = live.iter().copied().collect();

    for idx in 0..buffer.len() {
        let id = SsaId::new(idx);
        let node = buffer.get(id);
        if node.is_dead() || !is_root(node.opcode) {
            continue;
        }
        if live.insert(id) {
            worklist.push(id);
        }
    }

    while let Some(id) = worklist.pop() {
        let node = buffer.get(id);
        for operand in node.operands {
            if let Some(op_id) = operand.expand() {
                if live.insert(op_id) {
                    worklist.push(op_id);
                }
            }
        }
    }

    for idx in 0..buffer.len() {
        let id = SsaId::new(idx);
        if buffer.get(id).is_dead() || live.contains(&id) {
            continue;
        }
        buffer.get_mut(id).kill();
    }
}

fn is_root(opcode: Opcode) -> bool {
    matches!(
        opcode,
        Opcode::StoreStack
            | Opcode::StoreField
            | Opcode::StoreModuleVar
            | Opcode::LoopHeader
            | Opcode::LoopBack
            | Opcode::CallCtor
            | Opcode::Snapshot
            | Opcode::Phi
            | Opcode::Guard
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Immediate, IrNode, IrType, Operand, SnapshotEntry};

    #[test]
    fn unused_pure_arithmetic_is_killed() {
        let mut buf = IrBuffer::new(32, 8, 8);
        let a = buf
            .push(IrNode::new(Opcode::ConstNum, IrType::Num, [Operand::NONE, Operand::NONE], Immediate::Num(1.0)))
            .unwrap();
        let b = buf
            .push(IrNode::new(Opcode::ConstNum, IrType::Num, [Operand::NONE, Operand::NONE], Immediate::Num(2.0)))
            .unwrap();
        let sum = buf
            .push(IrNode::new(
                Opcode::Arith,
                IrType::Num,
                [Operand::from(a), Operand::from(b)],
                Immediate::Arith(crate::ir::ArithOp::Add),
            ))
            .unwrap();

        run(&mut buf);

        assert!(buf.get(sum).is_dead());
        assert!(buf.get(a).is_dead());
        assert!(buf.get(b).is_dead());
    }

    #[test]
    fn value_feeding_a_store_survives() {
        let mut buf = IrBuffer::new(32, 8, 8);
        let v = buf
            .push(IrNode::new(Opcode::ConstNum, IrType::Num, [Operand::NONE, Operand::NONE], Immediate::Num(1.0)))
            .unwrap();
        buf.push(IrNode::new(
            Opcode::StoreStack,
            IrType::Void,
            [Operand::from(v), Operand::NONE],
            Immediate::Slot(0),
        ))
        .unwrap();

        run(&mut buf);

        assert!(!buf.get(v).is_dead());
    }

    #[test]
    fn value_referenced_only_by_a_snapshot_survives() {
        let mut buf = IrBuffer::new(32, 8, 8);
        let v = buf
            .push(IrNode::new(Opcode::ConstNum, IrType::Num, [Operand::NONE, Operand::NONE], Immediate::Num(1.0)))
            .unwrap();
        buf.push_snapshot(0, 1, &[SnapshotEntry { slot: 0, value: v }]).unwrap();

        run(&mut buf);

        assert!(!buf.get(v).is_dead());
    }

    #[test]
    fn pre_killed_store_does_not_keep_its_value_alive() {
        let mut buf = IrBuffer::new(32, 8, 8);
        let v = buf
            .push(IrNode::new(Opcode::ConstNum, IrType::Num, [Operand::NONE, Operand::NONE], Immediate::Num(1.0)))
            .unwrap();
        let store = buf
            .push(IrNode::new(
                Opcode::StoreStack,
                IrType::Void,
                [Operand::from(v), Operand::NONE],
                Immediate::Slot(0),
            ))
            .unwrap();
        buf.get_mut(store).kill();

        run(&mut buf);

        assert!(buf.get(v).is_dead());
    }
}
