//! Pass 9: bounds-check deduplication.
//!
//! Identifies induction PHIs — phis whose back-edge operand is an add of the phi and a
//! positive constant step — then, for every `guard-true` over a less-than whose left
//! operand is such a phi and whose right operand is loop-invariant, dedupes repeats of the
//! same `(iv, bound)` pair the same way redundant-guard elimination dedupes `(id, kind)`
//! pairs, except keyed on the induction variable's identity rather than raw SSA equality.

use crate::ir::{ArithOp, GuardKind, IrBuffer, Opcode, SsaId};
use cranelift_entity::EntityRef;
use std::collections::HashSet;

pub fn run(buffer: &mut IrBuffer) {
    let header_idx = buffer.loop_header().map(|h| h.index());
    let mut seen: HashSet<(SsaId, SsaId)> = HashSet::new();

    for idx in 0..buffer.len() {
        let id = SsaId::new(idx);
        let node = buffer.get(id);
        if node.is_dead() || node.opcode != Opcode::Guard {
            continue;
        }
        if node.imm.as_guard_kind() != Some(GuardKind::True) {
            continue;
        }
        let Some(guarded) = node.op0().expand() else { continue };
        let Some((iv, bound)) = resolve_iv_bound_comparison(buffer, guarded) else {
            continue;
        };
        if !is_induction_phi(buffer, iv) {
            continue;
        }
        if !is_loop_invariant(buffer, bound, header_idx) {
            continue;
        }
        if !seen.insert((iv, bound)) {
            buffer.get_mut(id).kill();
        }
    }
}

/// Trace a guarded boxed-bool value back to the `Lt` comparison feeding it (through the
/// dedicated bool-boxing node the recorder always interposes), returning its `(left, right)`
/// operands.
fn resolve_iv_bound_comparison(buffer: &IrBuffer, guarded: SsaId) -> Option<(SsaId, SsaId)> {
    let guarded_node = buffer.get(guarded);
    let comparison_id = if guarded_node.opcode == Opcode::BoxBool {
        guarded_node.op0().expand()?
    } else {
        guarded
    };
    let comparison = buffer.get(comparison_id);
    if comparison.is_dead() || comparison.opcode != Opcode::Arith {
        return None;
    }
    if comparison.imm.as_arith() != Some(ArithOp::Lt) {
        return None;
    }
    let left = comparison.op0().expand()?;
    let right = comparison.op1().expand()?;
    Some((left, right))
}

fn is_induction_phi(buffer: &IrBuffer, id: SsaId) -> bool {
    let node = buffer.get(id);
    if node.is_dead() || node.opcode != Opcode::Phi {
        return false;
    }
    let Some(back) = node.op1().expand() else { return false };
    let back_node = buffer.get(back);
    if back_node.is_dead() || back_node.opcode != Opcode::Arith {
        return false;
    }
    if back_node.imm.as_arith() != Some(ArithOp::Add) {
        return false;
    }
    let (a, b) = (back_node.op0().expand(), back_node.op1().expand());
    let step = match (a, b) {
        (Some(x), Some(y)) if x == id => buffer.get(y).imm.as_num(),
        (Some(x), Some(y)) if y == id => buffer.get(x).imm.as_num(),
        _ => None,
    };
    matches!(step, Some(s) if s > 0.0)
}

fn is_loop_invariant(buffer: &IrBuffer, id: SsaId, header_idx: Option<usize>) -> bool {
    if let Some(header_idx) = header_idx {
        if id.index() < header_idx {
            return true;
        }
    }
    buffer.get(id).flags.invariant
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Immediate, IrNode, IrType, Operand, SnapshotId};

    fn void(opcode: Opcode) -> IrNode {
        IrNode::new(opcode, IrType::Void, [Operand::NONE, Operand::NONE], Immediate::None)
    }

    /// A phi `phi = Phi(zero, phi + one)` — the canonical positive-step induction variable.
    fn build_induction_phi(buf: &mut IrBuffer) -> SsaId {
        buf.push(void(Opcode::PreHeaderSlot)).unwrap();
        let zero = buf
            .push(IrNode::new(Opcode::ConstNum, IrType::Num, [Operand::NONE, Operand::NONE], Immediate::Num(0.0)))
            .unwrap();
        buf.push(void(Opcode::LoopHeader)).unwrap();
        let one = buf
            .push(IrNode::new(Opcode::ConstNum, IrType::Num, [Operand::NONE, Operand::NONE], Immediate::Num(1.0)))
            .unwrap();
        // Phi is written in place once its back-edge add's id is known, same two-step
        // construction [`crate::opt::loop_variable_promotion`] performs for real.
        let phi = buf.push(void(Opcode::PreHeaderSlot)).unwrap();
        let add = buf
            .push(IrNode::new(
                Opcode::Arith,
                IrType::Num,
                [Operand::from(phi), Operand::from(one)],
                Immediate::Arith(ArithOp::Add),
            ))
            .unwrap();
        *buf.get_mut(phi) =
            IrNode::new(Opcode::Phi, IrType::Num, [Operand::from(zero), Operand::from(add)], Immediate::None);
        phi
    }

    #[test]
    fn second_identical_bound_check_is_killed() {
        let mut buf = IrBuffer::new(64, 8, 8);
        let phi = build_induction_phi(&mut buf);
        let bound = buf
            .push(IrNode::new(Opcode::ConstNum, IrType::Num, [Operand::NONE, Operand::NONE], Immediate::Num(1000.0)))
            .unwrap();
        buf.get_mut(bound).flags.invariant = true;

        let snap: SnapshotId = buf.push_snapshot(0, 2, &[]).unwrap();
        let mut make_guard = |buf: &mut IrBuffer| {
            let lt = buf
                .push(IrNode::new(
                    Opcode::Arith,
                    IrType::Bool,
                    [Operand::from(phi), Operand::from(bound)],
                    Immediate::Arith(ArithOp::Lt),
                ))
                .unwrap();
            let boxed = buf
                .push(IrNode::new(Opcode::BoxBool, IrType::Value, [Operand::from(lt), Operand::NONE], Immediate::None))
                .unwrap();
            let mut g = IrNode::new(
                Opcode::Guard,
                IrType::Void,
                [Operand::from(boxed), Operand::NONE],
                Immediate::Guard(GuardKind::True, snap),
            );
            g.flags.guard = true;
            buf.push(g).unwrap()
        };
        let g1 = make_guard(&mut buf);
        let g2 = make_guard(&mut buf);

        run(&mut buf);

        assert!(!buf.get(g1).is_dead());
        assert!(buf.get(g2).is_dead());
    }
}
