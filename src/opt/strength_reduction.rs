//! Pass 8: strength reduction.
//!
//! Rewrites each qualifying `Arith` node in place: `x*2 -> x+x`, `x*(2^k) -> x << k` for
//! integer-typed multiplies, `x/c -> x*(1/c)` for a nonzero numeric divisor, and
//! `x mod (2^k) -> x & (2^k-1)` for integer-typed mods. The shift/mask forms need a fresh
//! constant operand (the shift amount for `Shl` is an immediate, not an operand, but the
//! reciprocal and the mask value are); those go into pre-header slots like every other
//! pass-synthesized constant.

use crate::ir::{ArithOp, Immediate, IrBuffer, IrNode, IrType, Opcode, Operand, SsaId};
use cranelift_entity::EntityRef;

pub fn run(buffer: &mut IrBuffer) {
    let header_idx = buffer.loop_header().map(|h| h.index()).unwrap_or(buffer.len());

    for idx in 0..buffer.len() {
        let id = SsaId::new(idx);
        let node = buffer.get(id);
        if node.is_dead() || node.opcode != Opcode::Arith {
            continue;
        }
        let Some(op) = node.imm.as_arith() else { continue };
        let (ty, op0, op1) = (node.ty, node.op0().expand(), node.op1().expand());
        let (Some(op0), Some(op1)) = (op0, op1) else { continue };

        match op {
            ArithOp::Mul => try_reduce_mul(buffer, id, ty, op0, op1),
            ArithOp::Div => try_reduce_div(buffer, header_idx, id, ty, op0, op1),
            ArithOp::Mod => try_reduce_mod(buffer, header_idx, id, ty, op0, op1),
            _ => {}
        }
    }
}

/// Returns `(variable_operand, constant_value)` if exactly one side of a commutative pair is
/// an integer constant.
fn split_int_const(buffer: &IrBuffer, op0: SsaId, op1: SsaId) -> Option<(SsaId, i64)> {
    let c0 = const_int(buffer, op0);
    let c1 = const_int(buffer, op1);
    match (c0, c1) {
        (Some(n), None) => Some((op1, n)),
        (None, Some(n)) => Some((op0, n)),
        _ => None,
    }
}

fn const_int(buffer: &IrBuffer, id: SsaId) -> Option<i64> {
    let node = buffer.get(id);
    if node.is_dead() || node.opcode != Opcode::ConstInt {
        return None;
    }
    node.imm.as_int()
}

fn const_num(buffer: &IrBuffer, id: SsaId) -> Option<f64> {
    let node = buffer.get(id);
    if node.is_dead() || !matches!(node.opcode, Opcode::ConstNum | Opcode::ConstInt) {
        return None;
    }
    node.imm.as_num()
}

fn pow2_exponent(n: i64) -> Option<u32> {
    if n > 0 && (n & (n - 1)) == 0 {
        Some(n.trailing_zeros())
    } else {
        None
    }
}

fn try_reduce_mul(buffer: &mut IrBuffer, id: SsaId, ty: IrType, op0: SsaId, op1: SsaId) {
    if ty == IrType::Int {
        if let Some((x, n)) = split_int_const(buffer, op0, op1) {
            if let Some(k) = pow2_exponent(n) {
                let node = buffer.get_mut(id);
                node.opcode = Opcode::Shl;
                node.operands = [Operand::from(x), Operand::NONE];
                node.imm = Immediate::Int(k as i64);
                return;
            }
        }
    }
    let two_side = |id: SsaId| const_num(buffer, id).map(|n| n == 2.0).unwrap_or(false);
    let x = if two_side(op1) {
        Some(op0)
    } else if two_side(op0) {
        Some(op1)
    } else {
        None
    };
    if let Some(x) = x {
        let node = buffer.get_mut(id);
        node.operands = [Operand::from(x), Operand::from(x)];
        node.imm = Immediate::Arith(ArithOp::Add);
    }
}

fn try_reduce_div(buffer: &mut IrBuffer, header_idx: usize, id: SsaId, ty: IrType, op0: SsaId, op1: SsaId) {
    if ty != IrType::Num {
        return;
    }
    let Some(c) = const_num(buffer, op1) else { return };
    if c == 0.0 {
        return;
    }
    let Some(recip) = new_const(buffer, header_idx, Opcode::ConstNum, IrType::Num, Immediate::Num(1.0 / c)) else {
        return;
    };
    let node = buffer.get_mut(id);
    node.operands = [Operand::from(op0), Operand::from(recip)];
    node.imm = Immediate::Arith(ArithOp::Mul);
}

fn try_reduce_mod(buffer: &mut IrBuffer, header_idx: usize, id: SsaId, ty: IrType, op0: SsaId, op1: SsaId) {
    if ty != IrType::Int {
        return;
    }
    let Some(n) = const_int(buffer, op1) else { return };
    let Some(_) = pow2_exponent(n) else { return };
    let Some(mask) = new_const(buffer, header_idx, Opcode::ConstInt, IrType::Int, Immediate::Int(n - 1)) else {
        return;
    };
    let node = buffer.get_mut(id);
    node.opcode = Opcode::BitAnd;
    node.operands = [Operand::from(op0), Operand::from(mask)];
    node.imm = Immediate::None;
}

fn new_const(buffer: &mut IrBuffer, header_idx: usize, opcode: Opcode, ty: IrType, imm: Immediate) -> Option<SsaId> {
    let slot = super::take_pre_header_slot(buffer, header_idx)?;
    *buffer.get_mut(slot) = IrNode::new(opcode, ty, [Operand::NONE, Operand::NONE], imm);
    Some(slot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IrNode;

    fn push(buf: &mut IrBuffer, opcode: Opcode, ty: IrType, ops: [Operand; 2], imm: Immediate) -> SsaId {
        buf.push(IrNode::new(opcode, ty, ops, imm)).unwrap()
    }

    #[test]
    fn mul_by_two_becomes_self_add() {
        let mut buf = IrBuffer::new(32, 8, 8);
        let x = push(&mut buf, Opcode::UnboxNum, IrType::Num, [Operand::NONE, Operand::NONE], Immediate::None);
        let two = push(&mut buf, Opcode::ConstNum, IrType::Num, [Operand::NONE, Operand::NONE], Immediate::Num(2.0));
        let mul = push(
            &mut buf,
            Opcode::Arith,
            IrType::Num,
            [Operand::from(x), Operand::from(two)],
            Immediate::Arith(ArithOp::Mul),
        );

        run(&mut buf);

        let node = buf.get(mul);
        assert_eq!(node.imm.as_arith(), Some(ArithOp::Add));
        assert_eq!(node.op0(), Operand::from(x));
        assert_eq!(node.op1(), Operand::from(x));
    }

    #[test]
    fn integer_mul_by_power_of_two_becomes_shift() {
        let mut buf = IrBuffer::new(32, 8, 8);
        let x = push(&mut buf, Opcode::UnboxInt, IrType::Int, [Operand::NONE, Operand::NONE], Immediate::None);
        let eight = push(&mut buf, Opcode::ConstInt, IrType::Int, [Operand::NONE, Operand::NONE], Immediate::Int(8));
        let mul = push(
            &mut buf,
            Opcode::Arith,
            IrType::Int,
            [Operand::from(x), Operand::from(eight)],
            Immediate::Arith(ArithOp::Mul),
        );

        run(&mut buf);

        let node = buf.get(mul);
        assert_eq!(node.opcode, Opcode::Shl);
        assert_eq!(node.imm.as_int(), Some(3));
        assert_eq!(node.op0(), Operand::from(x));
    }

    #[test]
    fn division_by_constant_becomes_multiply_by_reciprocal() {
        let mut buf = IrBuffer::new(32, 8, 8);
        buf.push(IrNode::new(Opcode::PreHeaderSlot, IrType::Void, [Operand::NONE, Operand::NONE], Immediate::None))
            .unwrap();
        buf.push(IrNode::new(Opcode::LoopHeader, IrType::Void, [Operand::NONE, Operand::NONE], Immediate::None))
            .unwrap();
        let x = push(&mut buf, Opcode::UnboxNum, IrType::Num, [Operand::NONE, Operand::NONE], Immediate::None);
        let four = push(&mut buf, Opcode::ConstNum, IrType::Num, [Operand::NONE, Operand::NONE], Immediate::Num(4.0));
        let div = push(
            &mut buf,
            Opcode::Arith,
            IrType::Num,
            [Operand::from(x), Operand::from(four)],
            Immediate::Arith(ArithOp::Div),
        );

        run(&mut buf);

        let node = buf.get(div);
        assert_eq!(node.imm.as_arith(), Some(ArithOp::Mul));
        let recip = node.op1().expand().unwrap();
        assert_eq!(buf.get(recip).imm.as_num(), Some(0.25));
    }
}
