//! Pass 13: integer induction-variable inference.
//!
//! A phi whose pre-loop operand is an integer-valued constant and whose back-edge operand is
//! an `add`/`sub` of the phi and an integer step is retyped `Int`. From there a fixed point
//! propagates: any `add`/`sub`/`mul`/comparison whose operands are both integer-valued
//! (either already `Int`-typed, or an integral-valued numeric constant) becomes `Int`-typed
//! itself — comparisons keep producing a boxed bool downstream, but marking them `Int` lets
//! codegen pick an integer compare instead of a float one. `UnboxNum` feeding an `Int` phi
//! becomes `UnboxInt`; `BoxNum` consuming a genuinely `Int`-typed value becomes `BoxInt`. Once
//! the fixed point settles, a numeric constant is only rewritten to `ConstInt` in place when
//! every one of its consumers turned out to want an integer — rewriting it unconditionally
//! would corrupt a sibling consumer that still reads it as a boxed `f64`.

use super::consumers_of;
use crate::ir::{ArithOp, Immediate, IrBuffer, IrType, Opcode, SsaId};
use cranelift_entity::EntityRef;

pub fn run(buffer: &mut IrBuffer) {
    seed_induction_phis(buffer);
    propagate_to_fixed_point(buffer);
    promote_safe_constants(buffer);
}

fn is_integer_valued_const(buffer: &IrBuffer, id: SsaId) -> bool {
    let node = buffer.get(id);
    if node.is_dead() || !matches!(node.opcode, Opcode::ConstNum | Opcode::ConstInt) {
        return false;
    }
    node.imm.as_num().map(|n| n.fract() == 0.0).unwrap_or(false)
}

fn is_int_like(buffer: &IrBuffer, id: SsaId) -> bool {
    buffer.get(id).ty == IrType::Int || is_integer_valued_const(buffer, id)
}

fn seed_induction_phis(buffer: &mut IrBuffer) {
    for idx in 0..buffer.len() {
        let id = SsaId::new(idx);
        let node = buffer.get(id);
        if node.is_dead() || node.opcode != Opcode::Phi {
            continue;
        }
        let (Some(pre), Some(back)) = (node.op0().expand(), node.op1().expand()) else {
            continue;
        };
        if !is_integer_valued_const(buffer, pre) {
            continue;
        }
        let back_node = buffer.get(back);
        if back_node.is_dead() || back_node.opcode != Opcode::Arith {
            continue;
        }
        if !matches!(back_node.imm.as_arith(), Some(ArithOp::Add) | Some(ArithOp::Sub)) {
            continue;
        }
        let (a, b) = (back_node.op0().expand(), back_node.op1().expand());
        let step = match (a, b) {
            (Some(x), Some(y)) if x == id => Some(y),
            (Some(x), Some(y)) if y == id => Some(x),
            _ => None,
        };
        let Some(step) = step else { continue };
        if !is_integer_valued_const(buffer, step) {
            continue;
        }
        buffer.get_mut(id).ty = IrType::Int;
    }
}

fn propagate_to_fixed_point(buffer: &mut IrBuffer) {
    loop {
        let mut changed = false;
        for idx in 0..buffer.len() {
            let id = SsaId::new(idx);
            let node = buffer.get(id);
            if node.is_dead() {
                continue;
            }
            match node.opcode {
                Opcode::Arith if node.ty != IrType::Int => {
                    let Some(op) = node.imm.as_arith() else { continue };
                    let widens = matches!(op, ArithOp::Add | ArithOp::Sub | ArithOp::Mul) || op.is_comparison();
                    if !widens {
                        continue;
                    }
                    let (Some(a), Some(b)) = (node.op0().expand(), node.op1().expand()) else {
                        continue;
                    };
                    if is_int_like(buffer, a) && is_int_like(buffer, b) {
                        buffer.get_mut(id).ty = IrType::Int;
                        changed = true;
                    }
                }
                Opcode::UnboxNum => {
                    let feeds_int_phi = consumers_of(buffer, id).iter().any(|&c| {
                        let cn = buffer.get(c);
                        cn.opcode == Opcode::Phi && cn.ty == IrType::Int
                    });
                    if feeds_int_phi {
                        let n = buffer.get_mut(id);
                        n.opcode = Opcode::UnboxInt;
                        n.ty = IrType::Int;
                        changed = true;
                    }
                }
                Opcode::BoxNum => {
                    if let Some(inner) = node.op0().expand() {
                        if buffer.get(inner).ty == IrType::Int {
                            buffer.get_mut(id).opcode = Opcode::BoxInt;
                            changed = true;
                        }
                    }
                }
                _ => {}
            }
        }
        if !changed {
            break;
        }
    }
}

fn promote_safe_constants(buffer: &mut IrBuffer) {
    for idx in 0..buffer.len() {
        let id = SsaId::new(idx);
        let node = buffer.get(id);
        if node.is_dead() || node.opcode != Opcode::ConstNum {
            continue;
        }
        let Some(n) = node.imm.as_num() else { continue };
        if n.fract() != 0.0 {
            continue;
        }
        let consumers = consumers_of(buffer, id);
        if consumers.is_empty() {
            continue;
        }
        let all_want_int = consumers.iter().all(|&c| {
            let cn = buffer.get(c);
            matches!(cn.opcode, Opcode::Arith | Opcode::Phi) && cn.ty == IrType::Int
        });
        if !all_want_int {
            continue;
        }
        let value = n as i64;
        let node = buffer.get_mut(id);
        node.opcode = Opcode::ConstInt;
        node.ty = IrType::Int;
        node.imm = Immediate::Int(value);
    }
}
