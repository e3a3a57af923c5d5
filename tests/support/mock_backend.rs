//! An `AssemblerBackend`/`CallableTrace` pair that never touches a real ISA: it records
//! each emitted op into a flat instruction list and interprets that list directly. Good
//! enough to prove the code generator's lowering is semantically correct without a real
//! JIT backend on hand.

use std::sync::Mutex;
use tracejit::codegen::backend::{
    AssemblerBackend, BinOp, CallableTrace, CondCode, ExecRegion, MachOperand, MemBase,
    MemoryManager, RegisterUsage, UnOp,
};
use tracejit::regalloc::RegClass;

#[derive(Clone, Debug)]
enum MockInstr {
    LoadImm(MachOperand, u64),
    Move(MachOperand, MachOperand),
    Unop(UnOp, MachOperand, MachOperand),
    Binop(BinOp, MachOperand, MachOperand, MachOperand),
    CompareSet(CondCode, MachOperand, MachOperand, MachOperand),
    BranchIf(CondCode, MachOperand, MachOperand, usize),
    Jump(usize),
    Return(MachOperand),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MockLabel(usize);

pub struct MockCtx {
    instrs: Vec<MockInstr>,
    labels: Vec<Option<usize>>,
    frame_size: u32,
}

pub struct MockCode {
    instrs: Vec<MockInstr>,
    labels: Vec<usize>,
    frame_size: u32,
    region: Mutex<Option<ExecRegion>>,
}

// Safety: `call` only ever reads `instrs`/`labels`/`frame_size`; `region` is inert storage
// released exactly once through `MockBackend::free`, guarded by the mutex.
unsafe impl Sync for MockCode {}

impl CallableTrace for MockCode {
    unsafe fn call(&self, _vm: *mut u8, _fiber: *mut u8, stack_base: *mut u8, _module_vars_base: *mut u8) -> u64 {
        let mut frame = vec![0u8; self.frame_size.max(16) as usize];
        let frame_ptr = frame.as_mut_ptr();
        let mut gp = [0u64; 16];
        let mut fp = [0u64; 16];
        let mut pc = 0usize;
        loop {
            match &self.instrs[pc] {
                MockInstr::LoadImm(dst, imm) => {
                    write(dst, *imm, &mut gp, &mut fp, frame_ptr, stack_base);
                    pc += 1;
                }
                MockInstr::Move(dst, src) => {
                    let v = read(src, &gp, &fp, frame_ptr, stack_base);
                    write(dst, v, &mut gp, &mut fp, frame_ptr, stack_base);
                    pc += 1;
                }
                MockInstr::Unop(op, dst, src) => {
                    let v = read(src, &gp, &fp, frame_ptr, stack_base);
                    let r = exec_unop(*op, src.class(), v);
                    write(dst, r, &mut gp, &mut fp, frame_ptr, stack_base);
                    pc += 1;
                }
                MockInstr::Binop(op, dst, lhs, rhs) => {
                    let a = read(lhs, &gp, &fp, frame_ptr, stack_base);
                    let b = read(rhs, &gp, &fp, frame_ptr, stack_base);
                    let r = exec_binop(*op, lhs.class(), a, b);
                    write(dst, r, &mut gp, &mut fp, frame_ptr, stack_base);
                    pc += 1;
                }
                MockInstr::CompareSet(cc, dst, lhs, rhs) => {
                    let a = read(lhs, &gp, &fp, frame_ptr, stack_base);
                    let b = read(rhs, &gp, &fp, frame_ptr, stack_base);
                    let r = if compare(*cc, lhs.class(), a, b) { 1 } else { 0 };
                    write(dst, r, &mut gp, &mut fp, frame_ptr, stack_base);
                    pc += 1;
                }
                MockInstr::BranchIf(cc, lhs, rhs, target) => {
                    let a = read(lhs, &gp, &fp, frame_ptr, stack_base);
                    let b = read(rhs, &gp, &fp, frame_ptr, stack_base);
                    pc = if compare(*cc, lhs.class(), a, b) { self.labels[*target] } else { pc + 1 };
                }
                MockInstr::Jump(target) => pc = self.labels[*target],
                MockInstr::Return(value) => {
                    return read(value, &gp, &fp, frame_ptr, stack_base);
                }
            }
        }
    }
}

unsafe fn resolve(base: &MemBase, disp: i32, gp: &[u64; 16], fp: &[u64; 16], frame_ptr: *mut u8, stack_base: *mut u8) -> *mut u8 {
    let base_ptr = match base {
        MemBase::FramePointer => frame_ptr,
        MemBase::StackBase => stack_base,
        MemBase::Absolute(addr) => *addr as *mut u8,
        MemBase::Gp(op) => read(op, gp, fp, frame_ptr, stack_base) as *mut u8,
    };
    base_ptr.offset(disp as isize)
}

unsafe fn read(op: &MachOperand, gp: &[u64; 16], fp: &[u64; 16], frame_ptr: *mut u8, stack_base: *mut u8) -> u64 {
    match op {
        MachOperand::Reg(RegClass::Gp, r) => gp[r.0 as usize],
        MachOperand::Reg(RegClass::Fp, r) => fp[r.0 as usize],
        MachOperand::Scratch(RegClass::Gp, i) => gp[*i as usize],
        MachOperand::Scratch(RegClass::Fp, i) => fp[*i as usize],
        MachOperand::Mem { base, disp } => {
            let ptr = resolve(base, *disp, gp, fp, frame_ptr, stack_base);
            (ptr as *const u64).read_unaligned()
        }
    }
}

unsafe fn write(op: &MachOperand, value: u64, gp: &mut [u64; 16], fp: &mut [u64; 16], frame_ptr: *mut u8, stack_base: *mut u8) {
    match op {
        MachOperand::Reg(RegClass::Gp, r) => gp[r.0 as usize] = value,
        MachOperand::Reg(RegClass::Fp, r) => fp[r.0 as usize] = value,
        MachOperand::Scratch(RegClass::Gp, i) => gp[*i as usize] = value,
        MachOperand::Scratch(RegClass::Fp, i) => fp[*i as usize] = value,
        MachOperand::Mem { base, disp } => {
            let ptr = resolve(base, *disp, &*gp, &*fp, frame_ptr, stack_base);
            (ptr as *mut u64).write_unaligned(value);
        }
    }
}

fn exec_unop(op: UnOp, class: RegClass, a: u64) -> u64 {
    match (op, class) {
        (UnOp::Neg, RegClass::Fp) => (-f64::from_bits(a)).to_bits(),
        (UnOp::Neg, RegClass::Gp) => (a as i64).wrapping_neg() as u64,
        (UnOp::BitNot, _) => !a,
        (UnOp::IntToFloat, _) => (a as i64 as f64).to_bits(),
        (UnOp::FloatToInt, _) => (f64::from_bits(a) as i64) as u64,
    }
}

fn exec_binop(op: BinOp, class: RegClass, a: u64, b: u64) -> u64 {
    match (op, class) {
        (BinOp::Add, RegClass::Fp) => (f64::from_bits(a) + f64::from_bits(b)).to_bits(),
        (BinOp::Add, RegClass::Gp) => (a as i64).wrapping_add(b as i64) as u64,
        (BinOp::Sub, RegClass::Fp) => (f64::from_bits(a) - f64::from_bits(b)).to_bits(),
        (BinOp::Sub, RegClass::Gp) => (a as i64).wrapping_sub(b as i64) as u64,
        (BinOp::Mul, RegClass::Fp) => (f64::from_bits(a) * f64::from_bits(b)).to_bits(),
        (BinOp::Mul, RegClass::Gp) => (a as i64).wrapping_mul(b as i64) as u64,
        (BinOp::Div, _) => (f64::from_bits(a) / f64::from_bits(b)).to_bits(),
        (BinOp::Mod, _) => (f64::from_bits(a) % f64::from_bits(b)).to_bits(),
        (BinOp::BitAnd, _) => a & b,
        (BinOp::BitOr, _) => a | b,
        (BinOp::Shl, _) => a.wrapping_shl(b as u32),
    }
}

fn compare(cc: CondCode, class: RegClass, a: u64, b: u64) -> bool {
    match cc {
        CondCode::BitsEq => a == b,
        CondCode::BitsNeq => a != b,
        CondCode::Eq if class == RegClass::Fp => f64::from_bits(a) == f64::from_bits(b),
        CondCode::Eq => a == b,
        CondCode::Neq if class == RegClass::Fp => f64::from_bits(a) != f64::from_bits(b),
        CondCode::Neq => a != b,
        CondCode::Lt if class == RegClass::Fp => f64::from_bits(a) < f64::from_bits(b),
        CondCode::Lt => (a as i64) < (b as i64),
        CondCode::Lte if class == RegClass::Fp => f64::from_bits(a) <= f64::from_bits(b),
        CondCode::Lte => (a as i64) <= (b as i64),
    }
}

pub struct MockBackend;

impl AssemblerBackend for MockBackend {
    type Ctx = MockCtx;
    type Label = MockLabel;
    type Code = MockCode;

    fn new_context(&self, usage: RegisterUsage) -> MockCtx {
        MockCtx { instrs: Vec::new(), labels: Vec::new(), frame_size: usage.frame_size }
    }

    fn new_label(&self, ctx: &mut MockCtx) -> MockLabel {
        ctx.labels.push(None);
        MockLabel(ctx.labels.len() - 1)
    }

    fn bind_label(&self, ctx: &mut MockCtx, label: MockLabel) {
        ctx.labels[label.0] = Some(ctx.instrs.len());
    }

    fn emit_load_imm(&self, ctx: &mut MockCtx, dst: MachOperand, imm: u64) {
        ctx.instrs.push(MockInstr::LoadImm(dst, imm));
    }
    fn emit_move(&self, ctx: &mut MockCtx, dst: MachOperand, src: MachOperand) {
        ctx.instrs.push(MockInstr::Move(dst, src));
    }
    fn emit_unop(&self, ctx: &mut MockCtx, op: UnOp, dst: MachOperand, src: MachOperand) {
        ctx.instrs.push(MockInstr::Unop(op, dst, src));
    }
    fn emit_binop(&self, ctx: &mut MockCtx, op: BinOp, dst: MachOperand, lhs: MachOperand, rhs: MachOperand) {
        ctx.instrs.push(MockInstr::Binop(op, dst, lhs, rhs));
    }
    fn emit_compare_set(&self, ctx: &mut MockCtx, cc: CondCode, dst: MachOperand, lhs: MachOperand, rhs: MachOperand) {
        ctx.instrs.push(MockInstr::CompareSet(cc, dst, lhs, rhs));
    }
    fn emit_branch_if(&self, ctx: &mut MockCtx, cc: CondCode, lhs: MachOperand, rhs: MachOperand, target: MockLabel) {
        ctx.instrs.push(MockInstr::BranchIf(cc, lhs, rhs, target.0));
    }
    fn emit_jump(&self, ctx: &mut MockCtx, target: MockLabel) {
        ctx.instrs.push(MockInstr::Jump(target.0));
    }
    fn emit_return(&self, ctx: &mut MockCtx, value: MachOperand) {
        ctx.instrs.push(MockInstr::Return(value));
    }

    fn finish(&self, ctx: MockCtx, region: ExecRegion) -> Result<MockCode, String> {
        let labels = ctx
            .labels
            .into_iter()
            .enumerate()
            .map(|(i, l)| l.ok_or_else(|| format!("label {i} never bound")))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MockCode { instrs: ctx.instrs, labels, frame_size: ctx.frame_size, region: Mutex::new(Some(region)) })
    }

    fn free(&self, code: MockCode, mem: &dyn MemoryManager) {
        if let Some(region) = code.region.into_inner().unwrap_or(None) {
            mem.free(region);
        }
    }
}

pub struct MockMemoryManager;

impl MemoryManager for MockMemoryManager {
    fn allocate(&self, size: usize) -> Result<ExecRegion, String> {
        let len = size.max(1);
        let mut buf = vec![0u8; len];
        let ptr = buf.as_mut_ptr();
        std::mem::forget(buf);
        Ok(ExecRegion { ptr, len })
    }
    fn make_executable(&self, _region: &mut ExecRegion) -> Result<(), String> {
        Ok(())
    }
    fn make_writable(&self, _region: &mut ExecRegion) -> Result<(), String> {
        Ok(())
    }
    fn free(&self, region: ExecRegion) {
        unsafe {
            drop(Vec::from_raw_parts(region.ptr, region.len, region.len));
        }
    }
}
