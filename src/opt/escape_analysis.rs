//! Pass 10: escape analysis.
//!
//! (a) A constructor call whose result never escapes beyond its own field loads — no store
//! writes through it, no use as another call's argument, no snapshot reference — is replaced
//! by its own constructor arguments and killed outright. (b) Store-to-load forwarding: a
//! field load with a dominating store to the same `(object, field)` and nothing aliasing in
//! between (no intervening call, no other write to the same object) takes the stored value
//! directly instead of reading it back.

use super::{consumers_of, snapshot_referenced_ids};
use crate::ir::{Immediate, IrBuffer, Opcode, SsaId};
use cranelift_entity::EntityRef;

pub fn run(buffer: &mut IrBuffer) {
    eliminate_non_escaping_constructors(buffer);
    forward_stores_to_loads(buffer);
}

fn consumers_including_pooled_args(buffer: &IrBuffer, id: SsaId) -> Vec<SsaId> {
    let mut out = consumers_of(buffer, id);
    for idx in 0..buffer.len() {
        let cid = SsaId::new(idx);
        let node = buffer.get(cid);
        if node.is_dead() || node.opcode != Opcode::CallCtor || out.contains(&cid) {
            continue;
        }
        if let Immediate::SlotField(start, len) = node.imm {
            if buffer.call_args(start, len).contains(&id) {
                out.push(cid);
            }
        }
    }
    out
}

fn call_arg(buffer: &IrBuffer, call_id: SsaId, field: u32) -> Option<SsaId> {
    let node = buffer.get(call_id);
    match field {
        0 => node.op0().expand(),
        1 => node.op1().expand(),
        n => {
            if let Immediate::SlotField(start, len) = node.imm {
                buffer.call_args(start, len).get((n - 2) as usize).copied()
            } else {
                None
            }
        }
    }
}

fn eliminate_non_escaping_constructors(buffer: &mut IrBuffer) {
    let snapshot_referenced = snapshot_referenced_ids(buffer);

    for idx in 0..buffer.len() {
        let id = SsaId::new(idx);
        let node = buffer.get(id);
        if node.is_dead() || node.opcode != Opcode::CallCtor {
            continue;
        }
        if snapshot_referenced.contains(&id) {
            continue;
        }
        let consumers = consumers_including_pooled_args(buffer, id);
        if consumers.is_empty() {
            continue;
        }
        let all_plain_loads = consumers.iter().all(|&c| {
            let cn = buffer.get(c);
            cn.opcode == Opcode::LoadField && cn.op0().expand() == Some(id)
        });
        if !all_plain_loads {
            continue;
        }

        let mut ok = true;
        let mut rewrites = Vec::new();
        for &load_id in &consumers {
            let Immediate::SlotField(_, field) = buffer.get(load_id).imm else {
                ok = false;
                break;
            };
            let Some(arg) = call_arg(buffer, id, field) else {
                ok = false;
                break;
            };
            rewrites.push((load_id, arg));
        }
        if !ok {
            continue;
        }
        for (load_id, arg) in rewrites {
            buffer.replace_all_uses(load_id, arg);
            buffer.get_mut(load_id).kill();
        }
        buffer.get_mut(id).kill();
    }
}

fn forward_stores_to_loads(buffer: &mut IrBuffer) {
    for idx in 0..buffer.len() {
        let id = SsaId::new(idx);
        let node = buffer.get(id);
        if node.is_dead() || node.opcode != Opcode::LoadField {
            continue;
        }
        let Some(object) = node.op0().expand() else { continue };
        let Immediate::SlotField(_, field) = node.imm else { continue };

        for scan_idx in (0..idx).rev() {
            let scan_id = SsaId::new(scan_idx);
            let scan_node = buffer.get(scan_id);
            if scan_node.is_dead() {
                continue;
            }
            match scan_node.opcode {
                Opcode::CallCtor => break,
                Opcode::StoreField => {
                    if scan_node.op0().expand() != Some(object) {
                        continue;
                    }
                    if let Immediate::SlotField(_, store_field) = scan_node.imm {
                        if store_field == field {
                            if let Some(stored) = scan_node.op1().expand() {
                                buffer.replace_all_uses(id, stored);
                                buffer.get_mut(id).kill();
                            }
                        }
                    }
                    break;
                }
                _ => {}
            }
        }
    }
}
