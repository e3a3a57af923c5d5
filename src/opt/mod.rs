//! Fixed-order optimizer pipeline over an [`IrBuffer`].
//!
//! Each pass is its own module, mirroring Cranelift's one-pass-per-file layout
//! (`simple_gvn.rs`, `licm.rs`, `dce.rs`, ...) under `cranelift-codegen/src`. [`run_pipeline`]
//! is the single entry point; passes are never reordered or skipped.

mod bounds_check_dedup;
mod box_unbox;
mod constfold;
mod dce;
mod escape_analysis;
mod guard_hoist;
mod gvn;
mod integer_iv;
mod licm;
mod loop_variable_promotion;
mod proof_guard_elim;
mod redundant_guard;
mod strength_reduction;

use crate::error::CompileError;
use crate::ir::{IrBuffer, IrType, Opcode, SsaId};
use std::collections::{HashMap, HashSet};

/// Run the full canonical pass order.
pub fn run_pipeline(buffer: &mut IrBuffer) -> Result<(), CompileError> {
    loop_variable_promotion::run(buffer);
    box_unbox::run(buffer);
    redundant_guard::run(buffer);
    constfold::run(buffer);
    gvn::run(buffer);
    licm::run(buffer);
    guard_hoist::run(buffer);
    strength_reduction::run(buffer);
    bounds_check_dedup::run(buffer);
    escape_analysis::run(buffer);
    dce::run(buffer);
    proof_guard_elim::run(buffer);
    integer_iv::run(buffer);
    dce::run(buffer);

    if buffer.snapshot_count() == 0 {
        return Err(CompileError::NoSnapshots);
    }
    Ok(())
}

/// The lowest-indexed still-reserved pre-header slot before `header_idx`, or `None` once
/// `pre_header_reserved_nodes` is exhausted. Consumed in ascending call order by loop-variable
/// promotion (pass 1), LICM (pass 6), and guard hoisting (pass 7) so a hoisted node's
/// operands — themselves possibly hoisted earlier in the same pass — always land at a lower
/// buffer index than the node that uses them.
pub(crate) fn take_pre_header_slot(buffer: &mut IrBuffer, header_idx: usize) -> Option<SsaId> {
    use cranelift_entity::EntityRef;
    for idx in 0..header_idx {
        let id = SsaId::new(idx);
        if buffer.get(id).opcode == Opcode::PreHeaderSlot {
            return Some(id);
        }
    }
    None
}

/// `true` for the constant-producing opcodes LICM treats as trivially invariant.
pub(crate) fn is_const_opcode(opcode: Opcode) -> bool {
    matches!(
        opcode,
        Opcode::ConstNum | Opcode::ConstInt | Opcode::ConstBool | Opcode::ConstNull | Opcode::ConstPtr
    )
}

/// How many times each SSA id is referenced, across node operands and snapshot entries.
/// Box/unbox elimination (pass 2b) and strength reduction (pass 8) both need this to decide
/// whether a producer node can be rewritten in place without affecting another consumer.
pub(crate) fn count_uses(buffer: &IrBuffer) -> HashMap<SsaId, u32> {
    let mut counts = HashMap::new();
    for (_, node) in buffer.iter() {
        for op in &node.operands {
            if let Some(id) = op.expand() {
                *counts.entry(id).or_insert(0) += 1;
            }
        }
    }
    for (snap_id, _) in buffer.snapshots_iter() {
        for entry in buffer.snapshot_entries(snap_id) {
            *counts.entry(entry.value).or_insert(0) += 1;
        }
    }
    counts
}

/// Class a node's result type belongs to for the purposes of int/num retyping checks.
pub(crate) fn is_num_or_int(ty: IrType) -> bool {
    matches!(ty, IrType::Num | IrType::Int)
}

/// Move a node from `old_id` into an already-reserved, lower-indexed slot `new_id`,
/// redirecting every existing reference to `old_id` at the same time. Used by loop-variable
/// promotion (pass 1), LICM (pass 6), and guard hoisting (pass 7) — the three passes that
/// relocate a node into the pre-header region rather than killing it outright.
///
/// `old_id`'s slot becomes a dead no-op; `new_id` must currently hold a live
/// [`Opcode::PreHeaderSlot`] (as returned by [`take_pre_header_slot`]).
pub(crate) fn relocate(buffer: &mut IrBuffer, old_id: SsaId, new_id: SsaId) {
    let mut node = buffer.get(old_id).clone();
    node.flags.hoisted = true;
    buffer.get_mut(old_id).kill();
    *buffer.get_mut(new_id) = node;
    buffer.replace_all_uses(old_id, new_id);
}

/// Every SSA id referenced by some snapshot's entry pool — DCE roots (pass 11/14) and the
/// escape-analysis/box-elimination "not snapshot-referenced" guards (pass 2b, pass 10) both
/// need this same set.
pub(crate) fn snapshot_referenced_ids(buffer: &IrBuffer) -> HashSet<SsaId> {
    let mut out = HashSet::new();
    for (snap_id, _) in buffer.snapshots_iter() {
        for entry in buffer.snapshot_entries(snap_id) {
            out.insert(entry.value);
        }
    }
    out
}

/// Every currently-live node whose operand 0 or operand 1 references `id` — the
/// "every use" scans that box/unbox elimination (pass 2b), escape analysis (pass 10), and
/// integer-IV inference (pass 13) all perform. O(n) per call; the IR node cap keeps this
/// cheap relative to the rest of a pass.
pub(crate) fn consumers_of(buffer: &IrBuffer, id: SsaId) -> Vec<SsaId> {
    use cranelift_entity::EntityRef;
    (0..buffer.len())
        .map(SsaId::new)
        .filter(|&cid| {
            let n = buffer.get(cid);
            !n.is_dead() && (n.op0().expand() == Some(id) || n.op1().expand() == Some(id))
        })
        .collect()
}
