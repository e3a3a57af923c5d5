//! Pass 7: guard hoisting.
//!
//! Moves a guard whose operand(s) are all defined before the loop header into a pre-header
//! slot, same relocation mechanism as LICM. Guards are excluded from LICM itself (they carry
//! a side effect) but the invariance test applies to them one node at a time once LICM has
//! already hoisted whatever those operands depended on.

use super::{relocate, take_pre_header_slot};
use crate::ir::{IrBuffer, Opcode, SsaId};
use cranelift_entity::EntityRef;

pub fn run(buffer: &mut IrBuffer) {
    let (Some(header), Some(back)) = (buffer.loop_header(), buffer.loop_back()) else {
        return;
    };
    let header_idx = header.index();
    let back_idx = back.index();

    for idx in (header_idx + 1)..back_idx {
        let id = SsaId::new(idx);
        let node = buffer.get(id);
        if node.is_dead() || node.opcode != Opcode::Guard {
            continue;
        }
        let all_before_header = node
            .operands
            .iter()
            .filter_map(|op| op.expand())
            .all(|operand_id| operand_id.index() < header_idx);
        if !all_before_header {
            continue;
        }
        let Some(slot) = take_pre_header_slot(buffer, header_idx) else {
            continue;
        };
        relocate(buffer, id, slot);
    }
}
