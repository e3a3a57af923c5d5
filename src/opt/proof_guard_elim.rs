//! Pass 12: proof-based guard elimination.
//!
//! Phase A re-runs guard deduplication globally, without resetting at the loop header (unlike
//! pass 3, which intentionally does reset there): any `GuardKind::Num` whose operand is
//! provably numeric — traced back through stack-slot stores that always write a boxed or
//! already-numeric value — is killed outright, and any later exact `(id, kind)` duplicate of
//! any guard is killed the same way pass 3 does within a single region. Phase B marks a
//! `StoreStack` dead when nothing downstream could observe it: no call intervenes before the
//! next snapshot or guard, and no `LoadStack` of that slot exists anywhere in the loop body.
//! DCE's second run (pass 14) then sweeps up whatever this pass killed.

use crate::ir::{GuardKind, Immediate, IrBuffer, Opcode, SsaId};
use bit_set::BitSet;
use cranelift_entity::EntityRef;
use std::collections::HashMap;

pub fn run(buffer: &mut IrBuffer) {
    let provably_numeric = compute_provably_numeric(buffer);
    dedupe_guards_globally(buffer, &provably_numeric);
    mark_dispensable_stores_dead(buffer);
}

/// Opcodes whose own result is known-numeric without consulting any store.
fn is_intrinsically_numeric(opcode: Opcode) -> bool {
    matches!(opcode, Opcode::BoxNum | Opcode::ConstNum | Opcode::Arith | Opcode::Neg | Opcode::UnboxNum)
}

/// Fixed-point worklist: a stack slot is provably numeric once every live `StoreStack` to it
/// writes a provably-numeric value, and a `LoadStack` of such a slot is itself provably
/// numeric in turn (so a value that round-trips through the stack still gets proven).
///
/// Spec §4.2 pass 12 calls this a "provably numeric" bitset; sized to the IR node cap.
fn compute_provably_numeric(buffer: &IrBuffer) -> BitSet {
    let mut numeric = BitSet::with_capacity(buffer.capacity());
    for (id, node) in buffer.iter() {
        if !node.is_dead() && is_intrinsically_numeric(node.opcode) {
            numeric.insert(id.index());
        }
    }

    loop {
        let mut slot_all_numeric: HashMap<u32, bool> = HashMap::new();
        for (_, node) in buffer.iter() {
            if node.is_dead() || node.opcode != Opcode::StoreStack {
                continue;
            }
            let Immediate::Slot(slot) = node.imm else { continue };
            let Some(stored) = node.op0().expand() else { continue };
            let entry = slot_all_numeric.entry(slot).or_insert(true);
            if !numeric.contains(stored.index()) {
                *entry = false;
            }
        }

        let mut changed = false;
        for (id, node) in buffer.iter() {
            if node.is_dead() || node.opcode != Opcode::LoadStack || numeric.contains(id.index()) {
                continue;
            }
            let Immediate::Slot(slot) = node.imm else { continue };
            if slot_all_numeric.get(&slot) == Some(&true) {
                numeric.insert(id.index());
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    numeric
}

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

fn dedupe_guards_globally(buffer: &mut IrBuffer, provably_numeric: &BitSet) {
    let cap = buffer.capacity();
    let mut seen_by_kind: [BitSet; 4] = [
        BitSet::with_capacity(cap),
        BitSet::with_capacity(cap),
        BitSet::with_capacity(cap),
        BitSet::with_capacity(cap),
    ];
    let mut seen_by_class: HashMap<u64, BitSet> = HashMap::new();

    for idx in 0..buffer.len() {
        let id = SsaId::new(idx);
        let node = buffer.get(id);
        if node.is_dead() || node.opcode != Opcode::Guard {
            continue;
        }
        let Some(operand) = node.op0().expand() else { continue };

        if node.imm.as_guard_kind() == Some(GuardKind::Num) && provably_numeric.contains(operand.index()) {
            buffer.get_mut(id).kill();
            continue;
        }

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

fn mark_dispensable_stores_dead(buffer: &mut IrBuffer) {
    let (Some(header), Some(back)) = (buffer.loop_header(), buffer.loop_back()) else {
        return;
    };
    let (header_idx, back_idx) = (header.index(), back.index());

    for idx in 0..buffer.len() {
        let id = SsaId::new(idx);
        let node = buffer.get(id);
        if node.is_dead() || node.opcode != Opcode::StoreStack {
            continue;
        }
        let Immediate::Slot(slot) = node.imm else { continue };

        let mut call_before_boundary = false;
        for scan in (idx + 1)..buffer.len() {
            let n = buffer.get(SsaId::new(scan));
            if n.is_dead() {
                continue;
            }
            if matches!(n.opcode, Opcode::Snapshot | Opcode::Guard) {
                break;
            }
            if n.opcode == Opcode::CallCtor {
                call_before_boundary = true;
                break;
            }
        }
        if call_before_boundary {
            continue;
        }

        let mut loaded_in_loop = false;
        for scan in header_idx..=back_idx {
            let n = buffer.get(SsaId::new(scan));
            if n.is_dead() || n.opcode != Opcode::LoadStack {
                continue;
            }
            if n.imm == Immediate::Slot(slot) {
                loaded_in_loop = true;
                break;
            }
        }
        if loaded_in_loop {
            continue;
        }

        buffer.get_mut(id).kill();
    }
}
