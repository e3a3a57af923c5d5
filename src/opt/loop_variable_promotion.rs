//! Pass 1: loop-variable promotion.
//!
//! Recognizes the load/unbox/...modify.../box/store pattern a loop-carried local or module
//! variable leaves in the buffer and replaces the unboxed value flowing through it with a
//! PHI seated in the pre-header region, so later passes (bounds-check dedup, integer-IV
//! inference) see a single SSA value rather than a load-then-reload pair.
//!
//! The recorder always loads every live slot once, right after the loop header
//! ([`crate::recorder::Recorder::start`]); that load therefore sits *after* the header in
//! buffer order even though it represents the value flowing in from the previous iteration.
//! This pass is what actually moves it (and its unbox) into the pre-header slots reserved
//! for exactly this purpose, establishing the "pre-loop operand defined before the header"
//! invariant PHIs otherwise couldn't satisfy.

use super::{relocate, take_pre_header_slot};
use crate::ir::{Immediate, IrBuffer, IrNode, IrType, Opcode, Operand, SsaId};
use cranelift_entity::EntityRef;
use std::collections::HashMap;

#[derive(Copy, Clone, PartialEq, Eq, Hash)]
enum Storage {
    Stack,
    ModuleVar,
}

pub fn run(buffer: &mut IrBuffer) {
    let (Some(header), Some(back)) = (buffer.loop_header(), buffer.loop_back()) else {
        return;
    };
    let header_idx = header.index();
    let back_idx = back.index();

    let mut last_store: HashMap<(Storage, u32), SsaId> = HashMap::new();
    for idx in header_idx..=back_idx {
        let id = SsaId::new(idx);
        let node = buffer.get(id);
        if node.is_dead() {
            continue;
        }
        let key = match (node.opcode, node.imm) {
            (Opcode::StoreStack, Immediate::Slot(k)) => Some((Storage::Stack, k)),
            (Opcode::StoreModuleVar, Immediate::Slot(k)) => Some((Storage::ModuleVar, k)),
            _ => None,
        };
        if let Some(key) = key {
            last_store.insert(key, id);
        }
    }

    let mut candidates: Vec<(Storage, u32, SsaId)> = last_store
        .into_iter()
        .map(|((s, k), id)| (s, k, id))
        .collect();
    // Deterministic order: lower slot/address first, so repeated runs always hoist in the
    // same order.
    candidates.sort_by_key(|&(_, k, _)| k);

    for (storage, key, store_id) in candidates {
        promote_one(buffer, header_idx, back_idx, storage, key, store_id);
    }
}

fn promote_one(
    buffer: &mut IrBuffer,
    header_idx: usize,
    back_idx: usize,
    storage: Storage,
    key: u32,
    store_id: SsaId,
) {
    let Some(entry_load) = find_entry_load(buffer, storage, key, header_idx, store_id.index())
    else {
        return;
    };

    let store_node = buffer.get(store_id);
    let Some(boxed_id) = store_node.op0().expand() else {
        return;
    };
    let boxed_node = buffer.get(boxed_id);
    if boxed_node.is_dead() || boxed_node.opcode != Opcode::BoxNum {
        return;
    }
    let Some(back_val) = boxed_node.op0().expand() else {
        return;
    };
    if back_val.index() <= header_idx || back_val.index() > back_idx {
        return;
    }

    let Some(unbox_id) = find_unbox_of(buffer, entry_load, back_idx) else {
        return;
    };

    let Some(load_slot) = take_pre_header_slot(buffer, header_idx) else {
        return;
    };
    relocate(buffer, entry_load, load_slot);

    let Some(unbox_slot) = take_pre_header_slot(buffer, header_idx) else {
        return;
    };
    relocate(buffer, unbox_id, unbox_slot);

    let Some(phi_slot) = take_pre_header_slot(buffer, header_idx) else {
        return;
    };
    buffer.replace_all_uses(unbox_slot, phi_slot);
    *buffer.get_mut(phi_slot) = IrNode::new(
        Opcode::Phi,
        IrType::Num,
        [Operand::from(unbox_slot), Operand::from(back_val)],
        Immediate::None,
    );
}

fn find_entry_load(
    buffer: &IrBuffer,
    storage: Storage,
    key: u32,
    header_idx: usize,
    before: usize,
) -> Option<SsaId> {
    let want = match storage {
        Storage::Stack => Opcode::LoadStack,
        Storage::ModuleVar => Opcode::LoadModuleVar,
    };
    for idx in (header_idx + 1)..before {
        let id = SsaId::new(idx);
        let node = buffer.get(id);
        if node.is_dead() {
            continue;
        }
        if node.opcode == want && node.imm == Immediate::Slot(key) {
            return Some(id);
        }
    }
    None
}

fn find_unbox_of(buffer: &IrBuffer, entry_load: SsaId, back_idx: usize) -> Option<SsaId> {
    for idx in (entry_load.index() + 1)..back_idx {
        let id = SsaId::new(idx);
        let node = buffer.get(id);
        if node.is_dead() {
            continue;
        }
        if node.opcode == Opcode::UnboxNum && node.op0().expand() == Some(entry_load) {
            return Some(id);
        }
    }
    None
}
