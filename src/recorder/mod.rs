//! Trace recorder: turns one hot-loop iteration into SSA IR.

mod slotmap;
mod widen;

pub use slotmap::SlotMap;

use crate::config::JitConfig;
use crate::error::RecordAbort;
use crate::host::{HostContext, Value};
use crate::ir::{
    ArithOp, GuardKind, Immediate, IrBuffer, IrNode, IrType, Operand, SnapshotEntry, SnapshotId,
    SsaId,
};
use cranelift_entity::EntityRef;

/// Which of the three conditional-branch families a [`BcInstr::CondBranch`] came from.
/// All three are recorded identically today (condition popped, directional guard emitted);
/// kept as a distinct field rather than folded away so a future host with different
/// short-circuit stack semantics for `and`/`or` has somewhere to hang that logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondKind {
    If,
    And,
    Or,
}

/// One executed bytecode instruction, as observed by the recorder: the opcode family plus
/// whatever concrete runtime values that family's recording rule needs for guard-biasing.
#[derive(Debug, Clone, Copy)]
pub enum BcInstr {
    PushLocal(u32),
    PushConstNum(f64),
    PushConstBool(bool),
    PushConstNull,
    PushConstObj(u64),
    StoreLocal(u32),
    Pop,
    LoadField { field: u32 },
    StoreField { field: u32 },
    LoadModuleVar(u32),
    StoreModuleVar(u32),
    /// Operator-method call with one operand (the receiver) and no argument.
    UnaryCall { symbol_id: u32, receiver: Value },
    /// Operator-method call with a receiver and one argument.
    BinaryCall {
        symbol_id: u32,
        receiver: Value,
        arg: Value,
    },
    CondBranch {
        kind: CondKind,
        cond: Value,
        /// `true` if control actually took the jump this time.
        taken: bool,
        /// PC of whichever side (target or fallthrough) was *not* taken, i.e. the resume PC
        /// the emitted guard's snapshot must record.
        not_taken_pc: u32,
    },
    /// Unconditional forward branch; no IR emitted.
    Jump,
    /// Backward branch to `target`.
    BackBranch { target: u32 },
    /// Entry into a callee the recorder transparently follows without emitting IR.
    Call,
    Return,
    /// Anything the per-bytecode contract table doesn't name.
    Unsupported(u8),
}

/// Outcome of recording a single [`BcInstr`].
#[derive(Debug)]
pub enum RecordStep {
    /// Keep recording.
    Continue,
    /// Loop-back reached; the trace is ready for the optimizer. Call [`Recorder::finish`] to
    /// take the buffer.
    Completed,
    /// Recording stopped short; the interpreter resumes untouched.
    Aborted(RecordAbort),
}

/// Owns the IR buffer, slot map, logical stack-top pointer, and the instruction/call-depth
/// counters for one in-progress recording.
pub struct Recorder {
    config: JitConfig,
    anchor_pc: u32,
    buffer: IrBuffer,
    slots: SlotMap,
    stack_top: u32,
    instr_count: u32,
    call_depth: u32,
}

impl Recorder {
    pub fn new(config: JitConfig) -> Self {
        let buffer = IrBuffer::new(
            config.max_ir_nodes as usize,
            config.max_snapshots as usize,
            config.max_snapshot_entries_per_snapshot as usize,
        );
        Recorder {
            config,
            anchor_pc: 0,
            buffer,
            slots: SlotMap::new(64),
            stack_top: 0,
            instr_count: 0,
            call_depth: 0,
        }
    }

    /// Startup protocol: reset state, reserve pre-header
    /// no-op slots, emit the loop header, then a load-stack node for every live entry slot.
    ///
    /// `entry_stack_depth` is the interpreter's current stack depth at the anchor PC —
    /// everything at or above that index is temporary-expression space the logical
    /// push/pop stack owns; everything below it is a named local addressed directly by
    /// slot index (`PushLocal`/`StoreLocal`). The two ranges share one slot map but never
    /// overlap as long as this is set to the real frame depth.
    pub fn start(
        &mut self,
        anchor_pc: u32,
        live_entry_slots: &[u32],
        entry_stack_depth: u32,
    ) -> Result<(), RecordAbort> {
        log::trace!("recorder: start anchor_pc={anchor_pc} entry_stack_depth={entry_stack_depth}");
        self.buffer = IrBuffer::new(
            self.config.max_ir_nodes as usize,
            self.config.max_snapshots as usize,
            self.config.max_snapshot_entries_per_snapshot as usize,
        );
        self.slots.reset();
        self.stack_top = entry_stack_depth;
        self.instr_count = 0;
        self.call_depth = 0;
        self.anchor_pc = anchor_pc;

        for _ in 0..self.config.pre_header_reserved_nodes {
            self.push_node(void_node(crate::ir::Opcode::PreHeaderSlot))?;
        }
        self.push_node(void_node(crate::ir::Opcode::LoopHeader))?;

        for &slot in live_entry_slots {
            self.load_stack_slot(slot)?;
        }
        Ok(())
    }

    /// Record one executed bytecode instruction.
    pub fn step(&mut self, host: &dyn HostContext, instr: BcInstr) -> RecordStep {
        self.instr_count += 1;
        log::trace!("recorder: step #{} pc={} instr={instr:?}", self.instr_count, host.pc());
        if self.instr_count > self.config.max_instructions_per_trace {
            log::warn!("recorder: abort, instruction budget exceeded at pc={}", host.pc());
            return RecordStep::Aborted(RecordAbort::InstructionBudgetExceeded);
        }
        match self.dispatch(host, instr) {
            Ok(Some(RecordStep::Completed)) => {
                log::trace!("recorder: loop-back closed, trace ready for compilation");
                RecordStep::Completed
            }
            Ok(Some(outcome)) => outcome,
            Ok(None) => RecordStep::Continue,
            Err(abort) => {
                log::warn!("recorder: abort ({}) at pc={}", abort.reason(), host.pc());
                RecordStep::Aborted(abort)
            }
        }
    }

    /// Hand over the finished buffer after a [`RecordStep::Completed`].
    pub fn finish(self) -> IrBuffer {
        self.buffer
    }

    fn dispatch(
        &mut self,
        host: &dyn HostContext,
        instr: BcInstr,
    ) -> Result<Option<RecordStep>, RecordAbort> {
        match instr {
            BcInstr::PushLocal(slot) => {
                let id = self.load_stack_slot(slot)?;
                self.push(id)?;
            }
            BcInstr::PushConstNum(n) => {
                let id = self.push_node(IrNode::new(
                    crate::ir::Opcode::ConstNum,
                    IrType::Num,
                    [Operand::NONE, Operand::NONE],
                    Immediate::Num(n),
                ))?;
                self.push(id)?;
            }
            BcInstr::PushConstBool(b) => {
                let id = self.push_node(IrNode::new(
                    crate::ir::Opcode::ConstBool,
                    IrType::Bool,
                    [Operand::NONE, Operand::NONE],
                    Immediate::Bool(b),
                ))?;
                self.push(id)?;
            }
            BcInstr::PushConstNull => {
                let id = self.push_node(void_node(crate::ir::Opcode::ConstNull))?;
                self.push(id)?;
            }
            BcInstr::PushConstObj(ptr) => {
                let id = self.push_node(IrNode::new(
                    crate::ir::Opcode::ConstPtr,
                    IrType::Ptr,
                    [Operand::NONE, Operand::NONE],
                    Immediate::Ptr(ptr),
                ))?;
                self.push(id)?;
            }
            BcInstr::StoreLocal(slot) => {
                let value = self.peek(0)?;
                self.push_node(IrNode::new(
                    crate::ir::Opcode::StoreStack,
                    IrType::Void,
                    [Operand::from(value), Operand::NONE],
                    Immediate::Slot(slot),
                ))?;
                self.slots.set(slot, value);
            }
            BcInstr::Pop => {
                self.pop()?;
            }
            BcInstr::LoadField { field } => {
                let receiver = self.receiver_operand()?;
                let id = self.push_node(IrNode::new(
                    crate::ir::Opcode::LoadField,
                    IrType::Value,
                    [Operand::from(receiver), Operand::NONE],
                    Immediate::SlotField(0, field),
                ))?;
                self.push(id)?;
            }
            BcInstr::StoreField { field } => {
                let value = self.pop()?;
                let receiver = self.receiver_operand()?;
                self.push_node(IrNode::new(
                    crate::ir::Opcode::StoreField,
                    IrType::Void,
                    [Operand::from(receiver), Operand::from(value)],
                    Immediate::SlotField(0, field),
                ))?;
            }
            BcInstr::LoadModuleVar(addr) => {
                let id = self.push_node(IrNode::new(
                    crate::ir::Opcode::LoadModuleVar,
                    IrType::Value,
                    [Operand::NONE, Operand::NONE],
                    Immediate::Slot(addr),
                ))?;
                self.push(id)?;
            }
            BcInstr::StoreModuleVar(addr) => {
                let value = self.pop()?;
                self.push_node(IrNode::new(
                    crate::ir::Opcode::StoreModuleVar,
                    IrType::Void,
                    [Operand::from(value), Operand::NONE],
                    Immediate::Slot(addr),
                ))?;
            }
            BcInstr::UnaryCall { symbol_id, receiver } => {
                self.record_unary_call(host, symbol_id, receiver)?;
            }
            BcInstr::BinaryCall {
                symbol_id,
                receiver,
                arg,
            } => {
                self.record_binary_call(host, symbol_id, receiver, arg)?;
            }
            BcInstr::CondBranch {
                cond,
                not_taken_pc,
                taken,
                ..
            } => {
                self.record_cond_branch(host, cond, taken, not_taken_pc)?;
            }
            BcInstr::Jump => {}
            BcInstr::BackBranch { target } => {
                if target == self.anchor_pc {
                    self.push_node(void_node(crate::ir::Opcode::LoopBack))?;
                    return Ok(Some(RecordStep::Completed));
                }
                return Err(RecordAbort::NotAnchorBackBranch {
                    target,
                    anchor: self.anchor_pc,
                });
            }
            BcInstr::Call => {
                self.call_depth += 1;
                if self.call_depth > self.config.max_call_depth_during_recording {
                    return Err(RecordAbort::CallDepthExceeded);
                }
            }
            BcInstr::Return => {
                if self.call_depth == 0 {
                    return Err(RecordAbort::ReturnCrossesRoot { pc: host.pc() });
                }
                self.call_depth -= 1;
            }
            BcInstr::Unsupported(opcode) => {
                return Err(RecordAbort::UnsupportedOpcode { pc: host.pc(), opcode });
            }
        }
        Ok(None)
    }

    fn record_unary_call(
        &mut self,
        host: &dyn HostContext,
        symbol_id: u32,
        receiver: Value,
    ) -> Result<(), RecordAbort> {
        let name = host.name(symbol_id).unwrap_or("");
        if host.is_number(receiver) {
            if name != "-(_)" {
                return Err(RecordAbort::UnsupportedReceiver { pc: host.pc() });
            }
            let receiver_id = self.pop()?;
            let snap = self.emit_snapshot(host.pc())?;
            self.emit_guard_num(receiver_id, snap)?;
            let unboxed = self.emit_unbox_num(receiver_id)?;
            let neg = self.push_node(IrNode::new(
                crate::ir::Opcode::Neg,
                IrType::Num,
                [Operand::from(unboxed), Operand::NONE],
                Immediate::None,
            ))?;
            let boxed = self.emit_box_num(neg)?;
            self.push(boxed)?;
            return Ok(());
        }
        Err(RecordAbort::UnsupportedReceiver { pc: host.pc() })
    }

    fn record_binary_call(
        &mut self,
        host: &dyn HostContext,
        symbol_id: u32,
        receiver: Value,
        arg: Value,
    ) -> Result<(), RecordAbort> {
        let name = host.name(symbol_id).unwrap_or("").to_string();
        if host.is_number(receiver) {
            let Some(op) = ArithOp::from_symbol(&name) else {
                return Err(RecordAbort::UnsupportedReceiver { pc: host.pc() });
            };
            let arg_id = self.pop()?;
            let receiver_id = self.pop()?;
            let snap = self.emit_snapshot(host.pc())?;
            self.emit_guard_num(receiver_id, snap)?;
            self.emit_guard_num(arg_id, snap)?;
            let unboxed_receiver = self.emit_unbox_num(receiver_id)?;
            let unboxed_arg = self.emit_unbox_num(arg_id)?;
            let result_ty = if op.is_comparison() { IrType::Bool } else { IrType::Num };
            let result = self.push_node(IrNode::new(
                crate::ir::Opcode::Arith,
                result_ty,
                [Operand::from(unboxed_receiver), Operand::from(unboxed_arg)],
                Immediate::Arith(op),
            ))?;
            let boxed = if op.is_comparison() {
                self.emit_box_bool(result)?
            } else {
                self.emit_box_num(result)?
            };
            self.push(boxed)?;
            return Ok(());
        }
        if self.widen_binary_call(host, &name, receiver, arg)? {
            return Ok(());
        }
        Err(RecordAbort::UnsupportedReceiver { pc: host.pc() })
    }

    fn record_cond_branch(
        &mut self,
        host: &dyn HostContext,
        cond: Value,
        taken: bool,
        not_taken_pc: u32,
    ) -> Result<(), RecordAbort> {
        let cond_id = self.pop()?;
        let observed_truthy = host.is_truthy(cond);
        let kind = if observed_truthy { GuardKind::True } else { GuardKind::False };
        let snap = self.emit_snapshot(not_taken_pc)?;
        self.emit_guard(kind, cond_id, snap)?;
        let _ = taken;
        Ok(())
    }

    // -- stack helpers --------------------------------------------------

    fn push(&mut self, id: SsaId) -> Result<(), RecordAbort> {
        self.slots.set(self.stack_top, id);
        self.stack_top += 1;
        Ok(())
    }

    fn pop(&mut self) -> Result<SsaId, RecordAbort> {
        if self.stack_top == 0 {
            return Err(RecordAbort::StackUnderflow { pc: self.anchor_pc });
        }
        self.stack_top -= 1;
        let id = self
            .slots
            .get(self.stack_top)
            .ok_or(RecordAbort::StackUnderflow { pc: self.anchor_pc })?;
        self.slots.kill(self.stack_top);
        Ok(id)
    }

    fn peek(&self, depth: u32) -> Result<SsaId, RecordAbort> {
        if depth >= self.stack_top {
            return Err(RecordAbort::StackUnderflow { pc: self.anchor_pc });
        }
        self.slots
            .get(self.stack_top - 1 - depth)
            .ok_or(RecordAbort::StackUnderflow { pc: self.anchor_pc })
    }

    /// Pop an explicit receiver off the logical stack, or synthesize a load-stack of slot 0
    /// if none was pushed.
    fn receiver_operand(&mut self) -> Result<SsaId, RecordAbort> {
        if self.stack_top > 0 {
            self.pop()
        } else {
            self.load_stack_slot(0)
        }
    }

    fn load_stack_slot(&mut self, slot: u32) -> Result<SsaId, RecordAbort> {
        if let Some(id) = self.slots.get(slot) {
            if self.slots.is_live(slot) {
                return Ok(id);
            }
        }
        let id = self.push_node(IrNode::new(
            crate::ir::Opcode::LoadStack,
            IrType::Value,
            [Operand::NONE, Operand::NONE],
            Immediate::Slot(slot),
        ))?;
        self.slots.set(slot, id);
        Ok(id)
    }

    // -- IR emission helpers ---------------------------------------------

    fn push_node(&mut self, node: IrNode) -> Result<SsaId, RecordAbort> {
        self.buffer.push(node).map_err(|_| RecordAbort::InstructionBudgetExceeded)
    }

    fn emit_snapshot(&mut self, resume_pc: u32) -> Result<SnapshotId, RecordAbort> {
        let entries: Vec<SnapshotEntry> = self
            .slots
            .live_slots()
            .filter_map(|slot| self.slots.get(slot).map(|value| SnapshotEntry { slot, value }))
            .collect();
        let stack_depth = self.stack_top;
        let id = self
            .buffer
            .push_snapshot(resume_pc, stack_depth, &entries)
            .ok_or(RecordAbort::InstructionBudgetExceeded)?;
        self.push_node(IrNode::new(
            crate::ir::Opcode::Snapshot,
            IrType::Void,
            [Operand::NONE, Operand::NONE],
            Immediate::Snapshot(id),
        ))?;
        Ok(id)
    }

    fn emit_guard(
        &mut self,
        kind: GuardKind,
        operand: SsaId,
        snapshot: SnapshotId,
    ) -> Result<SsaId, RecordAbort> {
        let mut node = IrNode::new(
            crate::ir::Opcode::Guard,
            IrType::Void,
            [Operand::from(operand), Operand::NONE],
            Immediate::Guard(kind, snapshot),
        );
        node.flags.guard = true;
        let id = self.push_node(node)?;
        self.note_guard(snapshot, id);
        Ok(id)
    }

    pub(super) fn emit_guard_class(
        &mut self,
        operand: SsaId,
        class_ptr: u64,
        snapshot: SnapshotId,
    ) -> Result<SsaId, RecordAbort> {
        let mut node = IrNode::new(
            crate::ir::Opcode::Guard,
            IrType::Void,
            [Operand::from(operand), Operand::NONE],
            Immediate::GuardClass(class_ptr, snapshot),
        );
        node.flags.guard = true;
        let id = self.push_node(node)?;
        self.note_guard(snapshot, id);
        Ok(id)
    }

    /// Record this guard as the (so far) last side-exit able to deoptimize through
    /// `snapshot` — a snapshot entry's live range must extend to the *last* consuming
    /// guard, not just the first, or a later guard would deoptimize to stale state.
    fn note_guard(&mut self, snapshot: SnapshotId, guard_id: SsaId) {
        self.buffer.snapshot_mut(snapshot).last_consuming_guard = Some(guard_id.index() as u32);
    }

    fn emit_guard_num(&mut self, operand: SsaId, snapshot: SnapshotId) -> Result<SsaId, RecordAbort> {
        self.emit_guard(GuardKind::Num, operand, snapshot)
    }

    fn emit_unbox_num(&mut self, operand: SsaId) -> Result<SsaId, RecordAbort> {
        self.push_node(IrNode::new(
            crate::ir::Opcode::UnboxNum,
            IrType::Num,
            [Operand::from(operand), Operand::NONE],
            Immediate::None,
        ))
    }

    fn emit_box_num(&mut self, operand: SsaId) -> Result<SsaId, RecordAbort> {
        self.push_node(IrNode::new(
            crate::ir::Opcode::BoxNum,
            IrType::Value,
            [Operand::from(operand), Operand::NONE],
            Immediate::None,
        ))
    }

    fn emit_box_bool(&mut self, operand: SsaId) -> Result<SsaId, RecordAbort> {
        self.push_node(IrNode::new(
            crate::ir::Opcode::BoxBool,
            IrType::Value,
            [Operand::from(operand), Operand::NONE],
            Immediate::None,
        ))
    }

    pub(super) fn pop_stack(&mut self) -> Result<SsaId, RecordAbort> {
        self.pop()
    }

    pub(super) fn push_stack(&mut self, id: SsaId) -> Result<(), RecordAbort> {
        self.push(id)
    }
}

fn void_node(opcode: crate::ir::Opcode) -> IrNode {
    IrNode::new(opcode, IrType::Void, [Operand::NONE, Operand::NONE], Immediate::None)
}
