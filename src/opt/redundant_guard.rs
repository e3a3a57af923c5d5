//! Pass 3: redundant guard elimination.
//!
//! Walks the buffer keeping a per-guard-kind set of already-guarded SSA ids; a repeat guard
//! on the same id and kind is killed. The tracked state resets at the loop header — the
//! guarded dynamic value differs between the recorded prologue and the traced iteration
//! itself. Class guards are keyed by
//! `(id, class pointer)` since two different expected classes are not redundant with each
//! other.

use crate::ir::{GuardKind, IrBuffer, Opcode, SsaId};
use bit_set::BitSet;
use cranelift_entity::EntityRef;
use std::collections::HashMap;

/// Index of a non-class [`GuardKind`] into the `seen_by_kind` bitset array.
fn kind_slot(kind: GuardKind) -> usize {
    match kind {
        GuardKind::Num => 0,
        GuardKind::True => 1,
        GuardKind::False => 2,
        GuardKind::NotNull => 3,
        GuardKind::Class => unreachable!("class guards are tracked in seen_by_class"),
    }
}

pub fn run(buffer: &mut IrBuffer) {
    let cap = buffer.capacity();
    let mut seen_by_kind: [BitSet; 4] = [
        BitSet::with_capacity(cap),
        BitSet::with_capacity(cap),
        BitSet::with_capacity(cap),
        BitSet::with_capacity(cap),
    ];
    let mut seen_by_class: HashMap<u64, BitSet> = HashMap::new();
    let header_idx = buffer.loop_header().map(|h| h.index());

    for idx in 0..buffer.len() {
        let id = SsaId::new(idx);
        if header_idx == Some(idx) {
            for set in &mut seen_by_kind {
                set.clear();
            }
            seen_by_class.clear();
        }
        let node = buffer.get(id);
        if node.is_dead() || node.opcode != Opcode::Guard {
            continue;
        }
        let operand = match node.op0().expand() {
            Some(o) => o,
            None => continue,
        };
        let redundant = if let Some(class_ptr) = node.imm.as_class_ptr() {
            let set = seen_by_class.entry(class_ptr).or_insert_with(|| BitSet::with_capacity(cap));
            !set.insert(operand.index())
        } else if let Some(kind) = node.imm.as_guard_kind() {
            !seen_by_kind[kind_slot(kind)].insert(operand.index())
        } else {
            continue;
        };
        if redundant {
            buffer.get_mut(id).kill();
        }
    }
}
