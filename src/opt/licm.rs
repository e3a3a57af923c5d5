//! Pass 6: loop-invariant code motion.
//!
//! Between loop-header and loop-back, iterates to a fixed point marking a non-side-effecting,
//! non-PHI node invariant once every operand is either defined before the header, a
//! constant, or already invariant, then relocates every invariant node into a pre-header
//! slot in ascending order so dependency chains keep resolving to lower ids. A load-stack is
//! excluded from hoisting when its slot is written anywhere in the loop body — the classic
//! aliasing hazard LICM must respect.

use super::{is_const_opcode, relocate, take_pre_header_slot};
use crate::ir::{Immediate, IrBuffer, Opcode, SsaId};
use cranelift_entity::EntityRef;
use std::collections::HashSet;

pub fn run(buffer: &mut IrBuffer) {
    let (Some(header), Some(back)) = (buffer.loop_header(), buffer.loop_back()) else {
        return;
    };
    let header_idx = header.index();
    let back_idx = back.index();
    if back_idx <= header_idx + 1 {
        return;
    }

    let written_slots = written_stack_slots(buffer, header_idx, back_idx);

    loop {
        let mut changed = false;
        for idx in (header_idx + 1)..back_idx {
            let id = SsaId::new(idx);
            let node = buffer.get(id);
            if node.is_dead() || node.flags.invariant || node.opcode.has_side_effect() || node.opcode == Opcode::Phi
            {
                continue;
            }
            if node.opcode == Opcode::LoadStack {
                if let Immediate::Slot(slot) = node.imm {
                    if written_slots.contains(&slot) {
                        continue;
                    }
                }
            }
            let operands_ok = node
                .operands
                .iter()
                .filter_map(|op| op.expand())
                .all(|operand_id| operand_is_loop_invariant(buffer, operand_id, header_idx));
            if operands_ok {
                buffer.get_mut(id).flags.invariant = true;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    for idx in (header_idx + 1)..back_idx {
        let id = SsaId::new(idx);
        let node = buffer.get(id);
        if node.is_dead() || !node.flags.invariant {
            continue;
        }
        let Some(slot) = take_pre_header_slot(buffer, header_idx) else {
            break;
        };
        relocate(buffer, id, slot);
    }
}

fn operand_is_loop_invariant(buffer: &IrBuffer, id: SsaId, header_idx: usize) -> bool {
    if id.index() < header_idx {
        return true;
    }
    let node = buffer.get(id);
    is_const_opcode(node.opcode) || node.flags.invariant
}

fn written_stack_slots(buffer: &IrBuffer, header_idx: usize, back_idx: usize) -> HashSet<u32> {
    let mut slots = HashSet::new();
    for idx in header_idx..=back_idx {
        let node = buffer.get(SsaId::new(idx));
        if node.is_dead() || node.opcode != Opcode::StoreStack {
            continue;
        }
        if let Immediate::Slot(slot) = node.imm {
            slots.insert(slot);
        }
    }
    slots
}
