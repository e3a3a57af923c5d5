//! Pass 2: box/unbox elimination.
//!
//! (a) Cancels adjacent inverse pairs and unboxes of constants outright. (b) When every
//! consumer of a box-num is an unbox-num, and the box never escapes into a snapshot entry,
//! routes those consumers straight to the pre-box value and kills the whole chain.

use super::{consumers_of, snapshot_referenced_ids};
use crate::ir::{IrBuffer, IrType, Opcode, SsaId};
use cranelift_entity::EntityRef;

pub fn run(buffer: &mut IrBuffer) {
    cancel_inverse_pairs(buffer);
    eliminate_box_with_only_unbox_uses(buffer);
}

fn cancel_inverse_pairs(buffer: &mut IrBuffer) {
    for idx in 0..buffer.len() {
        let id = SsaId::new(idx);
        let node = buffer.get(id);
        if node.is_dead() {
            continue;
        }
        let (opcode, inner) = (node.opcode, node.op0().expand());

        // unbox_num(const_num) -> const_num
        if opcode == Opcode::UnboxNum {
            if let Some(inner_id) = inner {
                let inner_node = buffer.get(inner_id);
                if !inner_node.is_dead() && inner_node.opcode == Opcode::ConstNum {
                    buffer.replace_all_uses(id, inner_id);
                    buffer.get_mut(id).kill();
                    continue;
                }
            }
        }

        let cancels = match opcode {
            Opcode::BoxNum => Some(Opcode::UnboxNum),
            Opcode::UnboxNum => Some(Opcode::BoxNum),
            Opcode::BoxObj => Some(Opcode::UnboxObj),
            Opcode::UnboxObj => Some(Opcode::BoxObj),
            _ => None,
        };
        let Some(inverse) = cancels else { continue };
        let Some(inner_id) = inner else { continue };
        let inner_node = buffer.get(inner_id);
        if inner_node.is_dead() || inner_node.opcode != inverse {
            continue;
        }
        let Some(original) = inner_node.op0().expand() else {
            continue;
        };
        buffer.replace_all_uses(id, original);
        buffer.get_mut(id).kill();
    }
}

fn eliminate_box_with_only_unbox_uses(buffer: &mut IrBuffer) {
    let snapshot_referenced = snapshot_referenced_ids(buffer);

    for idx in 0..buffer.len() {
        let id = SsaId::new(idx);
        let node = buffer.get(id);
        if node.is_dead() || node.opcode != Opcode::BoxNum || node.ty != IrType::Value {
            continue;
        }
        if snapshot_referenced.contains(&id) {
            continue;
        }
        let Some(pre_box) = buffer.get(id).op0().expand() else {
            continue;
        };

        let consumers = consumers_of(buffer, id);
        if consumers.is_empty() {
            continue;
        }
        let all_unboxes = consumers
            .iter()
            .all(|&c| buffer.get(c).opcode == Opcode::UnboxNum && buffer.get(c).op0().expand() == Some(id));
        if !all_unboxes {
            continue;
        }

        for &c in &consumers {
            buffer.replace_all_uses(c, pre_box);
            buffer.get_mut(c).kill();
        }
        buffer.get_mut(id).kill();
    }
}
