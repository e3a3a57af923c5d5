//! A single compiled trace: its callable code, deoptimization table, and GC roots.

use crate::codegen::backend::CallableTrace;
use crate::codegen::DeoptSnapshot;

/// Callback the host VM's GC implements to gray embedded object-constant roots.
pub trait GcRootVisitor {
    fn visit_root(&mut self, root: u64);
}

/// One anchor PC's compiled trace, keyed into the [`super::cache::TraceCache`].
///
/// Mirrors `cranelift-jit`'s bundling of a `CompiledFunction`'s raw pointer with whatever
/// side tables the caller needs after finalization (stack maps, relocations) rather than
/// throwing them away once the code is callable.
pub struct CompiledTrace<C: CallableTrace> {
    anchor_pc: u32,
    code: C,
    snapshots: Vec<DeoptSnapshot>,
    gc_roots: Vec<u64>,
    frame_size: u32,
    executions: u64,
    side_exits: u64,
}

impl<C: CallableTrace> CompiledTrace<C> {
    pub fn new(
        anchor_pc: u32,
        code: C,
        snapshots: Vec<DeoptSnapshot>,
        gc_roots: Vec<u64>,
        frame_size: u32,
    ) -> Self {
        CompiledTrace {
            anchor_pc,
            code,
            snapshots,
            gc_roots,
            frame_size,
            executions: 0,
            side_exits: 0,
        }
    }

    pub fn anchor_pc(&self) -> u32 {
        self.anchor_pc
    }

    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    pub fn executions(&self) -> u64 {
        self.executions
    }

    pub fn side_exits(&self) -> u64 {
        self.side_exits
    }

    /// The snapshot backing exit index `exit_index` (the trace's raw return value minus
    /// one).
    pub fn snapshot(&self, exit_index: usize) -> Option<&DeoptSnapshot> {
        self.snapshots.get(exit_index)
    }

    /// Run one call into the trace: increments the execution
    /// counter, invokes the emitted function with the four ABI pointer arguments, and
    /// counts a side exit if the return value is nonzero. The caller is responsible for
    /// deoptimizing (via [`super::deopt::Deoptimizer`]) when this returns `Some`.
    ///
    /// # Safety
    /// `vm`, `fiber`, `stack_base`, and `module_vars_base` must be valid for the entry
    /// contract this trace's code generator assumed when lowering `Load/StoreStack` and
    /// `Load/StoreModuleVar` nodes.
    pub unsafe fn execute(
        &mut self,
        vm: *mut u8,
        fiber: *mut u8,
        stack_base: *mut u8,
        module_vars_base: *mut u8,
    ) -> Option<usize> {
        self.executions += 1;
        let raw = self.code.call(vm, fiber, stack_base, module_vars_base);
        if raw == 0 {
            None
        } else {
            self.side_exits += 1;
            Some((raw - 1) as usize)
        }
    }

    /// Gray every embedded object-constant root.
    pub fn visit_gc_roots(&self, visitor: &mut dyn GcRootVisitor) {
        for &root in &self.gc_roots {
            visitor.visit_root(root);
        }
    }

    /// Consume the trace, handing its code back for release through
    /// [`crate::codegen::backend::AssemblerBackend::free`].
    pub fn into_code(self) -> C {
        self.code
    }
}
