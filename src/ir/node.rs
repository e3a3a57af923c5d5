//! The fixed-size IR node record.

use crate::ir::entities::{Operand, SnapshotId, SsaId};
use std::fmt;

/// An SSA value's result type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum IrType {
    /// No result (stores, guards, control nodes).
    Void,
    /// An unboxed `f64`.
    Num,
    /// A raw, unboxed comparison result.
    Bool,
    /// A boxed, host-encoded `Value`.
    Value,
    /// A raw pointer (object reference, not host-tagged).
    Ptr,
    /// An unboxed 64-bit signed integer, produced once integer-IV inference retypes a PHI
    /// and its dependents.
    Int,
}

/// A guard's speculative check.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GuardKind {
    /// Operand is a boxed number.
    Num,
    /// Operand's class pointer equals the immediate class pointer.
    Class,
    /// Operand is host-truthy and the biased direction observed `true`.
    True,
    /// Operand is host-truthy and the biased direction observed `false`.
    False,
    /// Operand is not the host `null` encoding.
    NotNull,
}

/// The arithmetic/comparison family an operator-method call lowers to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Gt,
    Lte,
    Gte,
    Eq,
    Neq,
}

impl ArithOp {
    /// Classify a method-symbol spelling into its arithmetic/comparison opcode. Returns
    /// `None` for anything not recognized (callers fall back to the widening inliner or
    /// abort).
    pub fn from_symbol(spelling: &str) -> Option<Self> {
        Some(match spelling {
            "+(_)" => ArithOp::Add,
            "-(_)" => ArithOp::Sub,
            "*(_)" => ArithOp::Mul,
            "/(_)" => ArithOp::Div,
            "%(_)" => ArithOp::Mod,
            "<(_)" => ArithOp::Lt,
            ">(_)" => ArithOp::Gt,
            "<=(_)" => ArithOp::Lte,
            ">=(_)" => ArithOp::Gte,
            "==(_)" => ArithOp::Eq,
            "!=(_)" => ArithOp::Neq,
            _ => return None,
        })
    }

    /// `true` for the relational/equality family, which always produces a raw `bool`
    /// rather than a `num`.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            ArithOp::Lt | ArithOp::Gt | ArithOp::Lte | ArithOp::Gte | ArithOp::Eq | ArithOp::Neq
        )
    }
}

/// One interpreter stack slot's worth of persisted module-variable address, field index,
/// or other small payload that doesn't need a full operand.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Immediate {
    /// No immediate payload.
    None,
    /// A boxed/unboxed `f64` constant.
    Num(f64),
    /// A `bool` constant (raw or about-to-be-boxed).
    Bool(bool),
    /// A 64-bit signed integer constant.
    Int(i64),
    /// A raw pointer constant (an embedded GC root once it reaches codegen).
    Ptr(u64),
    /// A snapshot table index; carried by `Snapshot` nodes themselves.
    Snapshot(SnapshotId),
    /// An interpreter stack slot index, or a module variable's absolute address.
    Slot(u32),
    /// `(slot, field)` — used by load/store-field nodes, field index at `header + i*8`.
    SlotField(u32, u32),
    /// A guard's kind plus the snapshot id it deoptimizes through. The snapshot id travels
    /// with the guard itself (rather than being inferred from buffer adjacency to a
    /// preceding `Snapshot` node) so passes that relocate guards — guard hoisting, LICM —
    /// don't have to drag their snapshot along too.
    Guard(GuardKind, SnapshotId),
    /// A `GuardKind::Class` check's expected class pointer plus its snapshot id — split out
    /// from `Guard` since the kind alone doesn't carry which class to compare against.
    GuardClass(u64, SnapshotId),
    /// The arithmetic/comparison family this node performs.
    Arith(ArithOp),
}

impl Immediate {
    /// The snapshot id this node's immediate carries, if any — whether it's a `Snapshot`
    /// node itself or a guard that deoptimizes through one.
    pub fn as_snapshot(&self) -> Option<SnapshotId> {
        match self {
            Immediate::Snapshot(id) => Some(*id),
            Immediate::Guard(_, id) => Some(*id),
            Immediate::GuardClass(_, id) => Some(*id),
            _ => None,
        }
    }

    /// The guard kind this immediate carries, if this is an ordinary (non-class) guard.
    pub fn as_guard_kind(&self) -> Option<GuardKind> {
        match self {
            Immediate::Guard(kind, _) => Some(*kind),
            _ => None,
        }
    }

    /// The numeric constant this immediate carries, if any.
    pub fn as_num(&self) -> Option<f64> {
        match self {
            Immediate::Num(n) => Some(*n),
            Immediate::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// The integer constant this immediate carries, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Immediate::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// The expected class pointer this immediate carries, if this is a `GuardClass`.
    pub fn as_class_ptr(&self) -> Option<u64> {
        match self {
            Immediate::GuardClass(ptr, _) => Some(*ptr),
            _ => None,
        }
    }

    /// The arithmetic/comparison op an `Arith` node's immediate selects, if any.
    pub fn as_arith(&self) -> Option<ArithOp> {
        match self {
            Immediate::Arith(op) => Some(*op),
            _ => None,
        }
    }
}

/// Per-node flags.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeFlags {
    /// Set by DCE/guard elimination: the node contributes nothing and codegen must skip it.
    pub dead: bool,
    /// Set by LICM: every operand is loop-invariant.
    pub invariant: bool,
    /// Set once a node has been moved into a pre-header no-op slot.
    pub hoisted: bool,
    /// Set on guard nodes, so generic passes (DCE roots, redundant-guard bitsets) can
    /// recognize them without re-deriving it from the opcode.
    pub guard: bool,
}

/// The opcode a node performs: one variant per bytecode-recording rule and one per
/// optimizer/codegen construct the pipeline introduces.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Marks the start of the traced loop iteration; at most one per buffer.
    LoopHeader,
    /// Marks successful closure of the traced iteration (a backward branch to the anchor).
    LoopBack,
    /// No-op placeholder reserved before the loop header for hoisted/promoted values.
    PreHeaderSlot,
    /// Captured interpreter state for deoptimization; carries a `Snapshot` immediate.
    Snapshot,
    /// A speculative check; carries a `Guard` immediate (kind) and a `Snapshot` immediate
    /// is reachable via the preceding `Snapshot` node referenced by id. Operand 0 (and 1
    /// for the range-widening bounds check) is the value being checked.
    Guard,

    /// Read an interpreter stack slot (`Slot` immediate).
    LoadStack,
    /// Write operand 0 to an interpreter stack slot (`Slot` immediate).
    StoreStack,
    /// Read an object field (`SlotField` immediate: `(_, field)`; operand 0 is the object).
    LoadField,
    /// Write operand 1 to an object field (`SlotField` immediate; operand 0 is the object).
    StoreField,
    /// Read a module variable at an absolute address (`Slot` immediate carries the address).
    LoadModuleVar,
    /// Write operand 0 to a module variable at an absolute address.
    StoreModuleVar,

    /// `f64` constant (`Num` immediate).
    ConstNum,
    /// Integer constant (`Int` immediate), introduced by integer-IV inference or folding.
    ConstInt,
    /// `bool` constant (`Bool` immediate).
    ConstBool,
    /// The host `null` singleton.
    ConstNull,
    /// A raw pointer constant (`Ptr` immediate); an embedded GC root.
    ConstPtr,

    /// Box an unboxed `f64` (operand 0) into a host `Value`.
    BoxNum,
    /// Unbox a host `Value` (operand 0) into an `f64`.
    UnboxNum,
    /// Box an unboxed integer (operand 0).
    BoxInt,
    /// Unbox a host `Value` into an integer.
    UnboxInt,
    /// Box a raw `bool` (operand 0) via the dedicated bool-boxing node.
    BoxBool,
    /// Box a raw pointer (operand 0) into a host `Value` object reference.
    BoxObj,
    /// Unbox a host `Value` (operand 0) into a raw pointer.
    UnboxObj,

    /// Binary/unary arithmetic or comparison (`Arith` immediate selects the op; operand 1
    /// is `NONE` for the unary negate).
    Arith,
    /// Unary negate (distinct from `Arith(Sub)` since it has exactly one operand).
    Neg,
    /// Bitwise NOT of operand 0.
    BitNot,
    /// Bitwise AND of operands 0 and 1.
    BitAnd,
    /// Left shift of operand 0 by the `Int` immediate amount (strength reduction target).
    Shl,

    /// SSA phi: operand 0 is the pre-loop value, operand 1 the back-edge value.
    Phi,

    /// A call that may allocate (an escape-analysis candidate). Operand 0
    /// and 1 are its first two arguments; extra arguments (if any) live in the shared call
    /// argument pool indexed by the `SlotField(start, len)` immediate, the same pooling
    /// pattern the IR buffer already uses for snapshot entries.
    CallCtor,
}

impl Opcode {
    /// `true` for nodes whose presence in the buffer has an effect beyond producing a
    /// value used elsewhere: stores, guards, calls, control nodes, and snapshots. Passes
    /// must preserve relative order among effecting nodes.
    pub fn has_side_effect(self) -> bool {
        matches!(
            self,
            Opcode::LoopHeader
                | Opcode::LoopBack
                | Opcode::Snapshot
                | Opcode::Guard
                | Opcode::StoreStack
                | Opcode::StoreField
                | Opcode::StoreModuleVar
                | Opcode::CallCtor
        )
    }

    /// `true` for the two inverse-pair families box/unbox elimination
    /// cancels.
    pub fn is_box(self) -> bool {
        matches!(self, Opcode::BoxNum | Opcode::BoxInt | Opcode::BoxObj)
    }

    /// See [`Opcode::is_box`].
    pub fn is_unbox(self) -> bool {
        matches!(self, Opcode::UnboxNum | Opcode::UnboxInt | Opcode::UnboxObj)
    }
}

/// One fixed-size IR node.
#[derive(Clone, Debug, PartialEq)]
pub struct IrNode {
    pub opcode: Opcode,
    pub ty: IrType,
    pub operands: [Operand; 2],
    pub imm: Immediate,
    pub flags: NodeFlags,
}

impl IrNode {
    pub fn new(opcode: Opcode, ty: IrType, operands: [Operand; 2], imm: Immediate) -> Self {
        IrNode {
            opcode,
            ty,
            operands,
            imm,
            flags: NodeFlags::default(),
        }
    }

    /// First operand, or `NONE`.
    pub fn op0(&self) -> Operand {
        self.operands[0]
    }

    /// Second operand, or `NONE`.
    pub fn op1(&self) -> Operand {
        self.operands[1]
    }

    /// Rewrite every use of `from` in this node's operands to `to`.
    pub fn replace_uses(&mut self, from: SsaId, to: SsaId) {
        for op in &mut self.operands {
            if op.expand() == Some(from) {
                *op = Operand::some(to);
            }
        }
    }

    /// Turn this node into a dead no-op in place, preserving its buffer slot.
    pub fn kill(&mut self) {
        self.opcode = Opcode::PreHeaderSlot;
        self.ty = IrType::Void;
        self.operands = [Operand::NONE, Operand::NONE];
        self.imm = Immediate::None;
        self.flags.dead = true;
    }

    /// `true` if this node currently produces no usable value (dead, or a control/void
    /// node to begin with).
    pub fn is_dead(&self) -> bool {
        self.flags.dead
    }
}

impl fmt::Display for IrNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {:?} ({}, {}) {:?}",
            self.opcode, self.ty, self.operands[0], self.operands[1], self.imm
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_dispatch_matches_table() {
        assert_eq!(ArithOp::from_symbol("+(_)"), Some(ArithOp::Add));
        assert_eq!(ArithOp::from_symbol("%(_)"), Some(ArithOp::Mod));
        assert_eq!(ArithOp::from_symbol(">=(_)"), Some(ArithOp::Gte));
        assert_eq!(ArithOp::from_symbol("frobnicate"), None);
        assert!(ArithOp::Lt.is_comparison());
        assert!(!ArithOp::Add.is_comparison());
    }

    #[test]
    fn kill_clears_operands_and_marks_dead() {
        let mut node = IrNode::new(
            Opcode::Arith,
            IrType::Num,
            [Operand::from(SsaId::new(0)), Operand::NONE],
            Immediate::Arith(ArithOp::Add),
        );
        node.kill();
        assert!(node.is_dead());
        assert_eq!(node.op0(), Operand::NONE);
    }

    #[test]
    fn replace_uses_rewrites_matching_operand_only() {
        let a = SsaId::new(0);
        let b = SsaId::new(1);
        let c = SsaId::new(2);
        let mut node = IrNode::new(
            Opcode::Arith,
            IrType::Num,
            [Operand::from(a), Operand::from(b)],
            Immediate::Arith(ArithOp::Add),
        );
        node.replace_uses(a, c);
        assert_eq!(node.op0(), Operand::from(c));
        assert_eq!(node.op1(), Operand::from(b));
    }
}
