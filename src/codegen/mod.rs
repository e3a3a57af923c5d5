//! Code generator: lowers the optimized IR to native code via [`backend::AssemblerBackend`].

pub mod backend;

use crate::error::CompileError;
use crate::host::NanBoxing;
use crate::ir::{ArithOp, GuardKind, IrBuffer, IrType, Opcode, SnapshotEntry, SnapshotId, SsaId};
use crate::regalloc::{Allocation, AllocationResult, RegClass};
use backend::{
    AssemblerBackend, CondCode, ExecRegion, MachOperand, MemBase, RegisterUsage, UnOp,
};
use cranelift_entity::EntityRef;
use std::collections::HashMap;

/// One entry of the runtime deoptimization table.
#[derive(Debug, Clone)]
pub struct DeoptSnapshot {
    pub resume_pc: u32,
    pub stack_depth: u32,
    pub entries: Vec<SnapshotEntry>,
}

/// Everything the code generator hands back: the callable code plus the runtime-needed
/// snapshot table and GC roots.
pub struct GeneratedTrace<C> {
    pub code: C,
    pub snapshots: Vec<DeoptSnapshot>,
    pub gc_roots: Vec<u64>,
    pub frame_size: u32,
}

const GP_SCRATCH_MASK: u8 = 0;
const GP_SCRATCH_AND: u8 = 1;
const FP_SCRATCH_CONVERT: u8 = 0;

/// Lower `buffer` (already optimized, allocated) to native code through `backend`, using
/// `host`'s NaN-boxing masks for box/unbox/guard lowering.
///
/// `allocations`/`spill_slots` come from [`crate::regalloc::RegAlloc::allocate`] run over
/// [`crate::regalloc::compute_live_ranges`] for the same buffer — register allocation is a
/// separate phase that this function only consumes the results of.
pub fn generate<B: AssemblerBackend>(
    backend: &B,
    host: &dyn NanBoxing,
    buffer: &IrBuffer,
    allocations: &[Allocation],
    spill_slots: u32,
    region: ExecRegion,
) -> Result<GeneratedTrace<B::Code>, CompileError> {
    let frame_size = spill_slots * 8 + 16;
    let usage = RegisterUsage {
        gp_scratch: 6,
        fp_scratch: 6,
        fp_saved: 4,
        frame_size,
    };
    let mut ctx = backend.new_context(usage);

    let alloc_by_id: HashMap<SsaId, Allocation> =
        allocations.iter().map(|a| (a.ssa_id, *a)).collect();

    let mut gen = Lowering {
        backend,
        host,
        buffer,
        alloc_by_id,
        snapshot_labels: HashMap::new(),
        loop_header_label: None,
        gc_roots: Vec::new(),
    };

    gen.lower_all(&mut ctx)?;

    let code = backend
        .finish(ctx, region)
        .map_err(CompileError::Backend)?;

    let snapshots = buffer
        .snapshots_iter()
        .map(|(id, snap)| DeoptSnapshot {
            resume_pc: snap.resume_pc,
            stack_depth: snap.stack_depth,
            entries: buffer.snapshot_entries(id).to_vec(),
        })
        .collect();

    Ok(GeneratedTrace {
        code,
        snapshots,
        gc_roots: gen.gc_roots,
        frame_size,
    })
}

struct Lowering<'a, B: AssemblerBackend> {
    backend: &'a B,
    host: &'a dyn NanBoxing,
    buffer: &'a IrBuffer,
    alloc_by_id: HashMap<SsaId, Allocation>,
    snapshot_labels: HashMap<SnapshotId, B::Label>,
    loop_header_label: Option<B::Label>,
    gc_roots: Vec<u64>,
}

impl<'a, B: AssemblerBackend> Lowering<'a, B> {
    fn operand_of(&self, id: SsaId) -> Result<MachOperand, CompileError> {
        let alloc = self.alloc_by_id.get(&id).copied().ok_or_else(|| {
            CompileError::Backend(format!("no register allocation for {id}"))
        })?;
        Ok(match alloc.location {
            AllocationResult::Register(reg) => MachOperand::Reg(alloc.class, reg),
            AllocationResult::Spill(slot) => {
                MachOperand::mem(MemBase::FramePointer, 16 + (slot as i32) * 8)
            }
        })
    }

    /// Fetch an operand usable as a memory-addressing base: if it's already a register,
    /// use it directly; if it's spilled, load it into a GP scratch first.
    fn gp_base_of(&self, ctx: &mut B::Ctx, id: SsaId) -> Result<MachOperand, CompileError> {
        let operand = self.operand_of(id)?;
        Ok(match operand {
            MachOperand::Reg(RegClass::Gp, _) => operand,
            MachOperand::Mem { .. } => {
                let tmp = MachOperand::Scratch(RegClass::Gp, GP_SCRATCH_MASK);
                self.backend.emit_move(ctx, tmp, operand);
                tmp
            }
            other => other,
        })
    }

    fn snapshot_label(&mut self, ctx: &mut B::Ctx, snap: SnapshotId) -> B::Label {
        if let Some(label) = self.snapshot_labels.get(&snap) {
            return *label;
        }
        let label = self.backend.new_label(ctx);
        self.snapshot_labels.insert(snap, label);
        label
    }

    fn const_u64(&self, ctx: &mut B::Ctx, scratch: u8, value: u64) -> MachOperand {
        let dst = MachOperand::Scratch(RegClass::Gp, scratch);
        self.backend.emit_load_imm(ctx, dst, value);
        dst
    }

    fn lower_all(&mut self, ctx: &mut B::Ctx) -> Result<(), CompileError> {
        for idx in 0..self.buffer.len() {
            let id = SsaId::new(idx);
            let node = self.buffer.get(id);
            if node.is_dead() {
                continue;
            }
            self.lower_node(ctx, id)?;
        }

        // Defensive fallthrough: every real trace side-exits through a guard before
        // reaching here (the optimizer guarantees at least one snapshot exists), but the
        // ABI still promises a return on every path.
        let zero = MachOperand::Scratch(RegClass::Gp, GP_SCRATCH_MASK);
        self.backend.emit_load_imm(ctx, zero, 0);
        self.backend.emit_return(ctx, zero);

        // Side-exit stubs, one per snapshot actually referenced by a guard, emitted after
        // the main body. Each stub first writes every snapshot entry's current value back
        // to its interpreter stack slot, then loads the exit code and returns.
        let mut snaps: Vec<SnapshotId> = self.snapshot_labels.keys().copied().collect();
        snaps.sort_by_key(|s| s.index());
        for snap in snaps {
            let label = self.snapshot_labels[&snap];
            self.backend.bind_label(ctx, label);
            let entries = self.buffer.snapshot_entries(snap).to_vec();
            for entry in &entries {
                let src = self.operand_of(entry.value)?;
                let dst = MachOperand::mem(MemBase::StackBase, entry.slot as i32 * 8);
                self.backend.emit_move(ctx, dst, src);
            }
            let ret = MachOperand::Scratch(RegClass::Gp, GP_SCRATCH_MASK);
            self.backend
                .emit_load_imm(ctx, ret, snap.index() as u64 + 1);
            self.backend.emit_return(ctx, ret);
        }
        Ok(())
    }

    fn lower_node(&mut self, ctx: &mut B::Ctx, id: SsaId) -> Result<(), CompileError> {
        let node = self.buffer.get(id).clone();
        match node.opcode {
            Opcode::LoopHeader => {
                let label = *self
                    .loop_header_label
                    .get_or_insert_with(|| self.backend.new_label(ctx));
                self.backend.bind_label(ctx, label);
            }
            Opcode::LoopBack => {
                self.reconcile_phis(ctx)?;
                let label = self
                    .loop_header_label
                    .expect("loop-back without a preceding loop-header");
                self.backend.emit_jump(ctx, label);
            }
            Opcode::PreHeaderSlot | Opcode::Snapshot | Opcode::Phi => {}
            Opcode::Guard => self.lower_guard(ctx, id, &node)?,

            Opcode::LoadStack => {
                let dst = self.operand_of(id)?;
                let slot = slot_imm(&node);
                self.backend
                    .emit_move(ctx, dst, MachOperand::mem(MemBase::StackBase, slot as i32 * 8));
            }
            Opcode::StoreStack => {
                let src = self.operand_of(node.op0().expand().unwrap())?;
                let slot = slot_imm(&node);
                self.backend
                    .emit_move(ctx, MachOperand::mem(MemBase::StackBase, slot as i32 * 8), src);
            }
            Opcode::LoadField => {
                let (_, field) = slot_field_imm(&node);
                let base = self.gp_base_of(ctx, node.op0().expand().unwrap())?;
                let dst = self.operand_of(id)?;
                let disp = self.host.header_size() as i32 + field as i32 * 8;
                self.backend
                    .emit_move(ctx, dst, MachOperand::mem(MemBase::Gp(base), disp));
            }
            Opcode::StoreField => {
                let (_, field) = slot_field_imm(&node);
                let base = self.gp_base_of(ctx, node.op0().expand().unwrap())?;
                let src = self.operand_of(node.op1().expand().unwrap())?;
                let disp = self.host.header_size() as i32 + field as i32 * 8;
                self.backend
                    .emit_move(ctx, MachOperand::mem(MemBase::Gp(base), disp), src);
            }
            Opcode::LoadModuleVar => {
                let addr = slot_imm(&node) as u64;
                let dst = self.operand_of(id)?;
                self.backend
                    .emit_move(ctx, dst, MachOperand::mem(MemBase::Absolute(addr), 0));
            }
            Opcode::StoreModuleVar => {
                let addr = slot_imm(&node) as u64;
                let src = self.operand_of(node.op0().expand().unwrap())?;
                self.backend
                    .emit_move(ctx, MachOperand::mem(MemBase::Absolute(addr), 0), src);
            }

            Opcode::ConstNum => {
                let bits = node.imm.as_num().unwrap_or(0.0).to_bits();
                self.materialize_fp_const(ctx, id, bits)?;
            }
            Opcode::ConstInt => {
                let v = node.imm.as_int().unwrap_or(0) as u64;
                let dst = self.operand_of(id)?;
                self.backend.emit_load_imm(ctx, dst, v);
            }
            Opcode::ConstBool => {
                let b = matches!(node.imm, crate::ir::Immediate::Bool(true));
                let bits = if b { self.host.true_bits() } else { self.host.false_bits() };
                let dst = self.operand_of(id)?;
                self.backend.emit_load_imm(ctx, dst, bits);
            }
            Opcode::ConstNull => {
                let dst = self.operand_of(id)?;
                self.backend.emit_load_imm(ctx, dst, self.host.null_bits());
            }
            Opcode::ConstPtr => {
                let ptr = match node.imm {
                    crate::ir::Immediate::Ptr(p) => p,
                    _ => 0,
                };
                self.gc_roots.push(ptr);
                let dst = self.operand_of(id)?;
                self.backend.emit_load_imm(ctx, dst, ptr);
            }

            Opcode::BoxNum | Opcode::UnboxNum => {
                let src = self.operand_of(node.op0().expand().unwrap())?;
                let dst = self.operand_of(id)?;
                self.reinterpret(ctx, dst, src);
            }
            Opcode::BoxInt => {
                let src = self.operand_of(node.op0().expand().unwrap())?;
                let converted = MachOperand::Scratch(RegClass::Fp, FP_SCRATCH_CONVERT);
                self.backend.emit_unop(ctx, UnOp::IntToFloat, converted, src);
                let dst = self.operand_of(id)?;
                self.reinterpret(ctx, dst, converted);
            }
            Opcode::UnboxInt => {
                let src = self.operand_of(node.op0().expand().unwrap())?;
                let as_fp = MachOperand::Scratch(RegClass::Fp, FP_SCRATCH_CONVERT);
                self.reinterpret(ctx, as_fp, src);
                let dst = self.operand_of(id)?;
                self.backend.emit_unop(ctx, UnOp::FloatToInt, dst, as_fp);
            }
            Opcode::BoxBool => {
                let src = self.operand_of(node.op0().expand().unwrap())?;
                let dst = self.operand_of(id)?;
                let zero = self.const_u64(ctx, GP_SCRATCH_AND, 0);
                let true_label = self.backend.new_label(ctx);
                let done_label = self.backend.new_label(ctx);
                self.backend
                    .emit_branch_if(ctx, CondCode::Neq, src, zero, true_label);
                self.backend.emit_load_imm(ctx, dst, self.host.false_bits());
                self.backend.emit_jump(ctx, done_label);
                self.backend.bind_label(ctx, true_label);
                self.backend.emit_load_imm(ctx, dst, self.host.true_bits());
                self.backend.bind_label(ctx, done_label);
            }
            Opcode::BoxObj => {
                let src = self.operand_of(node.op0().expand().unwrap())?;
                let dst = self.operand_of(id)?;
                let mask = self.const_u64(ctx, GP_SCRATCH_MASK, self.host.sign_bit() | self.host.qnan_mask());
                self.backend
                    .emit_binop(ctx, backend::BinOp::BitOr, dst, src, mask);
            }
            Opcode::UnboxObj => {
                let src = self.operand_of(node.op0().expand().unwrap())?;
                let dst = self.operand_of(id)?;
                let mask = self.const_u64(ctx, GP_SCRATCH_MASK, !(self.host.sign_bit() | self.host.qnan_mask()));
                self.backend
                    .emit_binop(ctx, backend::BinOp::BitAnd, dst, src, mask);
            }

            Opcode::Arith => self.lower_arith(ctx, id, &node)?,
            Opcode::Neg => {
                let src = self.operand_of(node.op0().expand().unwrap())?;
                let dst = self.operand_of(id)?;
                self.backend.emit_unop(ctx, UnOp::Neg, dst, src);
            }
            Opcode::BitNot => {
                let src = self.operand_of(node.op0().expand().unwrap())?;
                let dst = self.operand_of(id)?;
                self.backend.emit_unop(ctx, UnOp::BitNot, dst, src);
            }
            Opcode::BitAnd => {
                let lhs = self.operand_of(node.op0().expand().unwrap())?;
                let rhs = self.operand_of(node.op1().expand().unwrap())?;
                let dst = self.operand_of(id)?;
                self.backend.emit_binop(ctx, backend::BinOp::BitAnd, dst, lhs, rhs);
            }
            Opcode::Shl => {
                // The shift amount travels as an `Int` immediate, not an operand (strength
                // reduction synthesizes `x * 2^k` as `x << k` directly, with no IR node for
                // the constant `k`), so it has to be materialized into a scratch register.
                let lhs = self.operand_of(node.op0().expand().unwrap())?;
                let amount = node.imm.as_int().unwrap_or(0) as u64;
                let rhs = self.const_u64(ctx, GP_SCRATCH_AND, amount);
                let dst = self.operand_of(id)?;
                self.backend.emit_binop(ctx, backend::BinOp::Shl, dst, lhs, rhs);
            }

            Opcode::CallCtor => {
                return Err(CompileError::Backend(
                    "CallCtor reached code generation; no recorder rule emits one today"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Resolve PHI values at the back-edge: copy each PHI's back-edge operand into the
    /// PHI's own allocation before jumping back to the loop header.
    fn reconcile_phis(&mut self, ctx: &mut B::Ctx) -> Result<(), CompileError> {
        for idx in 0..self.buffer.len() {
            let id = SsaId::new(idx);
            let node = self.buffer.get(id);
            if node.is_dead() || node.opcode != Opcode::Phi {
                continue;
            }
            let Some(back) = node.op1().expand() else { continue };
            let dst = self.operand_of(id)?;
            let src = self.operand_of(back)?;
            if dst != src {
                self.backend.emit_move(ctx, dst, src);
            }
        }
        Ok(())
    }

    fn materialize_fp_const(&mut self, ctx: &mut B::Ctx, id: SsaId, bits: u64) -> Result<(), CompileError> {
        let tmp = self.const_u64(ctx, GP_SCRATCH_MASK, bits);
        let dst = self.operand_of(id)?;
        self.reinterpret(ctx, dst, tmp);
        Ok(())
    }

    /// Move 8 bytes between GP and FP through the frame's scratch staging area.
    fn reinterpret(&self, ctx: &mut B::Ctx, dst: MachOperand, src: MachOperand) {
        if src.class() == dst.class() {
            self.backend.emit_move(ctx, dst, src);
            return;
        }
        let staging = MachOperand::mem(MemBase::FramePointer, 0);
        self.backend.emit_move(ctx, staging, src);
        self.backend.emit_move(ctx, dst, staging);
    }

    fn lower_arith(&mut self, ctx: &mut B::Ctx, id: SsaId, node: &crate::ir::IrNode) -> Result<(), CompileError> {
        let op = node.imm.as_arith().unwrap_or(ArithOp::Add);
        let lhs_id = node.op0().expand().unwrap();
        let lhs = self.operand_of(lhs_id)?;
        let dst = self.operand_of(id)?;

        if op.is_comparison() {
            let rhs = self.operand_of(node.op1().expand().unwrap())?;
            let (cc, a, b) = match op {
                ArithOp::Lt => (CondCode::Lt, lhs, rhs),
                ArithOp::Lte => (CondCode::Lte, lhs, rhs),
                ArithOp::Gt => (CondCode::Lt, rhs, lhs),
                ArithOp::Gte => (CondCode::Lte, rhs, lhs),
                ArithOp::Eq => (CondCode::Eq, lhs, rhs),
                ArithOp::Neq => (CondCode::Neq, lhs, rhs),
                _ => unreachable!("non-comparison ArithOp in comparison branch"),
            };
            self.backend.emit_compare_set(ctx, cc, dst, a, b);
            return Ok(());
        }

        let rhs = self.operand_of(node.op1().expand().unwrap())?;
        let bin = match op {
            ArithOp::Add => backend::BinOp::Add,
            ArithOp::Sub => backend::BinOp::Sub,
            ArithOp::Mul => backend::BinOp::Mul,
            ArithOp::Div => backend::BinOp::Div,
            ArithOp::Mod => backend::BinOp::Mod,
            _ => unreachable!("comparison ArithOp in arithmetic branch"),
        };
        self.backend.emit_binop(ctx, bin, dst, lhs, rhs);
        Ok(())
    }

    fn lower_guard(&mut self, ctx: &mut B::Ctx, _id: SsaId, node: &crate::ir::IrNode) -> Result<(), CompileError> {
        let snap = node.imm.as_snapshot().ok_or_else(|| {
            CompileError::Backend("guard node carries no snapshot id".to_string())
        })?;
        let stub = self.snapshot_label(ctx, snap);
        let value_id = node.op0().expand().unwrap();
        let value = self.operand_of(value_id)?;

        if let Some(class_ptr) = node.imm.as_class_ptr() {
            let base = self.gp_base_of(ctx, value_id)?;
            let loaded = MachOperand::Scratch(RegClass::Gp, GP_SCRATCH_MASK);
            self.backend.emit_move(
                ctx,
                loaded,
                MachOperand::mem(MemBase::Gp(base), self.host.class_offset() as i32),
            );
            let expected = self.const_u64(ctx, GP_SCRATCH_AND, class_ptr);
            self.backend
                .emit_branch_if(ctx, CondCode::Neq, loaded, expected, stub);
            return Ok(());
        }

        let kind = node
            .imm
            .as_guard_kind()
            .ok_or_else(|| CompileError::Backend("guard node carries no guard kind".to_string()))?;
        match kind {
            GuardKind::Num => {
                let mask = self.const_u64(ctx, GP_SCRATCH_MASK, self.host.qnan_mask());
                let anded = MachOperand::Scratch(RegClass::Gp, GP_SCRATCH_AND);
                self.backend
                    .emit_binop(ctx, backend::BinOp::BitAnd, anded, value, mask);
                self.backend
                    .emit_branch_if(ctx, CondCode::BitsEq, anded, mask, stub);
            }
            GuardKind::NotNull => {
                let null = self.const_u64(ctx, GP_SCRATCH_MASK, self.host.null_bits());
                self.backend
                    .emit_branch_if(ctx, CondCode::Eq, value, null, stub);
            }
            GuardKind::True => {
                let value_ty = self.buffer.get(value_id).ty;
                if value_ty == IrType::Bool {
                    let zero = self.const_u64(ctx, GP_SCRATCH_MASK, 0);
                    self.backend
                        .emit_branch_if(ctx, CondCode::Eq, value, zero, stub);
                } else {
                    let false_c = self.const_u64(ctx, GP_SCRATCH_MASK, self.host.false_bits());
                    let null_c = self.const_u64(ctx, GP_SCRATCH_AND, self.host.null_bits());
                    self.backend
                        .emit_branch_if(ctx, CondCode::Eq, value, false_c, stub);
                    self.backend
                        .emit_branch_if(ctx, CondCode::Eq, value, null_c, stub);
                }
            }
            GuardKind::False => {
                let value_ty = self.buffer.get(value_id).ty;
                if value_ty == IrType::Bool {
                    let zero = self.const_u64(ctx, GP_SCRATCH_MASK, 0);
                    self.backend
                        .emit_branch_if(ctx, CondCode::Neq, value, zero, stub);
                } else {
                    let ok = self.backend.new_label(ctx);
                    let false_c = self.const_u64(ctx, GP_SCRATCH_MASK, self.host.false_bits());
                    let null_c = self.const_u64(ctx, GP_SCRATCH_AND, self.host.null_bits());
                    self.backend.emit_branch_if(ctx, CondCode::Eq, value, false_c, ok);
                    self.backend.emit_branch_if(ctx, CondCode::Eq, value, null_c, ok);
                    self.backend.emit_jump(ctx, stub);
                    self.backend.bind_label(ctx, ok);
                }
            }
            GuardKind::Class => unreachable!("class guards carry a GuardClass immediate, handled above"),
        }
        Ok(())
    }
}

fn slot_imm(node: &crate::ir::IrNode) -> u32 {
    match node.imm {
        crate::ir::Immediate::Slot(s) => s,
        _ => 0,
    }
}

fn slot_field_imm(node: &crate::ir::IrNode) -> (u32, u32) {
    match node.imm {
        crate::ir::Immediate::SlotField(a, b) => (a, b),
        _ => (0, 0),
    }
}
