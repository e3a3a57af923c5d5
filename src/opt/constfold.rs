//! Pass 4: constant propagation and folding.
//!
//! Collapses PHIs with equal operands, folds unary/binary constant arithmetic and
//! comparisons, applies the algebraic identities, and kills guards already proven by a
//! constant or a provably-numeric producer. New constant nodes this pass must synthesize
//! (the actual folded value of `2+3`, say) are written into pre-header slots so their id
//! stays below every consumer's, same mechanism as LICM/guard hoisting.

use super::{is_const_opcode, is_num_or_int, take_pre_header_slot};
use crate::ir::{ArithOp, GuardKind, Immediate, IrBuffer, IrNode, IrType, Opcode, Operand, SsaId};
use cranelift_entity::EntityRef;

pub fn run(buffer: &mut IrBuffer) {
    let header_idx = buffer.loop_header().map(|h| h.index()).unwrap_or(buffer.len());

    collapse_trivial_phis(buffer);
    fold_unary(buffer, header_idx);
    fold_binary(buffer, header_idx);
    apply_algebraic_identities(buffer);
    kill_proven_guards(buffer);
}

fn collapse_trivial_phis(buffer: &mut IrBuffer) {
    for idx in 0..buffer.len() {
        let id = SsaId::new(idx);
        let node = buffer.get(id);
        if node.is_dead() || node.opcode != Opcode::Phi {
            continue;
        }
        if let (Some(a), Some(b)) = (node.op0().expand(), node.op1().expand()) {
            if a == b {
                buffer.replace_all_uses(id, a);
                buffer.get_mut(id).kill();
            }
        }
    }
}

fn const_num_of(buffer: &IrBuffer, id: SsaId) -> Option<f64> {
    let node = buffer.get(id);
    if node.is_dead() || !is_const_opcode(node.opcode) {
        return None;
    }
    node.imm.as_num()
}

fn const_int_of(buffer: &IrBuffer, id: SsaId) -> Option<i64> {
    let node = buffer.get(id);
    if node.is_dead() || node.opcode != Opcode::ConstInt {
        return None;
    }
    node.imm.as_int()
}

fn fold_unary(buffer: &mut IrBuffer, header_idx: usize) {
    for idx in 0..buffer.len() {
        let id = SsaId::new(idx);
        let node = buffer.get(id);
        if node.is_dead() {
            continue;
        }
        let (opcode, ty, op0) = (node.opcode, node.ty, node.op0().expand());
        let Some(op0) = op0 else { continue };

        match opcode {
            Opcode::Neg => {
                if let Some(n) = const_num_of(buffer, op0) {
                    let new_imm = if ty == IrType::Int {
                        Immediate::Int(-(n as i64))
                    } else {
                        Immediate::Num(-n)
                    };
                    let new_opcode = if ty == IrType::Int { Opcode::ConstInt } else { Opcode::ConstNum };
                    replace_with_const(buffer, header_idx, id, new_opcode, ty, new_imm);
                }
            }
            Opcode::BitNot => {
                if let Some(n) = const_int_of(buffer, op0) {
                    replace_with_const(buffer, header_idx, id, Opcode::ConstInt, IrType::Int, Immediate::Int(!n));
                }
            }
            _ => {}
        }
    }
}

fn fold_binary(buffer: &mut IrBuffer, header_idx: usize) {
    for idx in 0..buffer.len() {
        let id = SsaId::new(idx);
        let node = buffer.get(id);
        if node.is_dead() || node.opcode != Opcode::Arith {
            continue;
        }
        let (ty, op, op0, op1) = (node.ty, node.imm.as_arith(), node.op0().expand(), node.op1().expand());
        let (Some(op0), Some(op1)) = (op0, op1) else { continue };
        let Some(op) = op else { continue };

        if op == ArithOp::Mod {
            let (Some(a), Some(b)) = (const_int_of(buffer, op0), const_int_of(buffer, op1)) else {
                continue;
            };
            if b == 0 {
                continue;
            }
            replace_with_const(buffer, header_idx, id, Opcode::ConstInt, IrType::Int, Immediate::Int(a % b));
            continue;
        }

        let (Some(a), Some(b)) = (const_num_of(buffer, op0), const_num_of(buffer, op1)) else {
            continue;
        };

        if op.is_comparison() {
            let result = match op {
                ArithOp::Lt => a < b,
                ArithOp::Gt => a > b,
                ArithOp::Lte => a <= b,
                ArithOp::Gte => a >= b,
                ArithOp::Eq => a == b,
                ArithOp::Neq => a != b,
                _ => unreachable!(),
            };
            replace_with_const(buffer, header_idx, id, Opcode::ConstBool, IrType::Bool, Immediate::Bool(result));
            continue;
        }

        if op == ArithOp::Div && b == 0.0 {
            continue;
        }
        let result = match op {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => a / b,
            _ => unreachable!(),
        };
        let (new_opcode, imm) = if ty == IrType::Int {
            (Opcode::ConstInt, Immediate::Int(result as i64))
        } else {
            (Opcode::ConstNum, Immediate::Num(result))
        };
        replace_with_const(buffer, header_idx, id, new_opcode, ty, imm);
    }
}

fn replace_with_const(
    buffer: &mut IrBuffer,
    header_idx: usize,
    old_id: SsaId,
    opcode: Opcode,
    ty: IrType,
    imm: Immediate,
) {
    let Some(slot) = take_pre_header_slot(buffer, header_idx) else {
        return;
    };
    *buffer.get_mut(slot) = IrNode::new(opcode, ty, [Operand::NONE, Operand::NONE], imm);
    buffer.replace_all_uses(old_id, slot);
    buffer.get_mut(old_id).kill();
}

fn is_zero(buffer: &IrBuffer, id: SsaId) -> bool {
    matches!(const_num_of(buffer, id), Some(n) if n == 0.0)
}

fn is_one(buffer: &IrBuffer, id: SsaId) -> bool {
    matches!(const_num_of(buffer, id), Some(n) if n == 1.0)
}

fn apply_algebraic_identities(buffer: &mut IrBuffer) {
    for idx in 0..buffer.len() {
        let id = SsaId::new(idx);
        let node = buffer.get(id);
        if node.is_dead() || node.opcode != Opcode::Arith {
            continue;
        }
        let Some(op) = node.imm.as_arith() else { continue };
        let (Some(op0), Some(op1)) = (node.op0().expand(), node.op1().expand()) else {
            continue;
        };

        let replacement = match op {
            ArithOp::Add if is_zero(buffer, op1) => Some(op0),
            ArithOp::Add if is_zero(buffer, op0) => Some(op1),
            ArithOp::Sub if is_zero(buffer, op1) => Some(op0),
            ArithOp::Mul if is_one(buffer, op1) => Some(op0),
            ArithOp::Mul if is_one(buffer, op0) => Some(op1),
            ArithOp::Div if is_one(buffer, op1) => Some(op0),
            _ => None,
        };
        if let Some(keep) = replacement {
            buffer.replace_all_uses(id, keep);
            buffer.get_mut(id).kill();
            continue;
        }

        let is_mul_zero = matches!(op, ArithOp::Mul) && (is_zero(buffer, op0) || is_zero(buffer, op1));
        if is_mul_zero {
            // Reuse an existing zero operand as the replacement rather than synthesizing a
            // fresh constant: whichever side is already the zero literal is exactly the
            // value this node should now alias.
            let zero_id = if is_zero(buffer, op0) { op0 } else { op1 };
            buffer.replace_all_uses(id, zero_id);
            buffer.get_mut(id).kill();
        }
    }
}

fn is_provably_numeric_opcode(buffer: &IrBuffer, id: SsaId) -> bool {
    let node = buffer.get(id);
    if node.is_dead() {
        return false;
    }
    match node.opcode {
        Opcode::ConstNum | Opcode::ConstInt | Opcode::UnboxNum | Opcode::Neg => true,
        Opcode::Arith => is_num_or_int(node.ty),
        _ => false,
    }
}

fn kill_proven_guards(buffer: &mut IrBuffer) {
    for idx in 0..buffer.len() {
        let id = SsaId::new(idx);
        let node = buffer.get(id);
        if node.is_dead() || node.opcode != Opcode::Guard {
            continue;
        }
        let Some(operand) = node.op0().expand() else { continue };
        let kind = node.imm.as_guard_kind();

        let kill = match kind {
            Some(GuardKind::True) => matches!(buffer.get(operand).imm, Immediate::Bool(true))
                && !buffer.get(operand).is_dead(),
            Some(GuardKind::False) => matches!(buffer.get(operand).imm, Immediate::Bool(false))
                && !buffer.get(operand).is_dead(),
            Some(GuardKind::Num) => is_provably_numeric_opcode(buffer, operand),
            _ => false,
        };
        if kill {
            buffer.get_mut(id).kill();
        }
    }
}
