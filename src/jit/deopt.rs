//! Deoptimization: restoring interpreter state after a side exit.
//!
//! Live-value write-back (SSA id to interpreter slot) already happened inside the emitted
//! side-exit stub before the trace returned; this module only adjusts the interpreter's own
//! pointers afterward.

use crate::codegen::DeoptSnapshot;

/// The interpreter frame a deoptimization writes back into. Implemented by the host VM;
/// this crate only ever calls the two setters, never reads them back.
pub trait DeoptTarget {
    fn set_pc(&mut self, pc: u32);
    fn set_stack_top(&mut self, stack_top: u32);
}

/// Stateless: deoptimization is a pure function of (snapshot, stack base).
pub struct Deoptimizer;

impl Deoptimizer {
    /// Set the interpreter's resume PC to the snapshot's and its stack top to
    /// `stack_base + snapshot.stack_depth`.
    pub fn deoptimize(target: &mut dyn DeoptTarget, snapshot: &DeoptSnapshot, stack_base: u32) {
        target.set_pc(snapshot.resume_pc);
        target.set_stack_top(stack_base + snapshot.stack_depth);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::SnapshotEntry;
    use cranelift_entity::EntityRef;

    #[derive(Default)]
    struct Frame {
        pc: u32,
        stack_top: u32,
    }

    impl DeoptTarget for Frame {
        fn set_pc(&mut self, pc: u32) {
            self.pc = pc;
        }
        fn set_stack_top(&mut self, stack_top: u32) {
            self.stack_top = stack_top;
        }
    }

    #[test]
    fn restores_pc_and_stack_top_relative_to_stack_base() {
        let snapshot = DeoptSnapshot {
            resume_pc: 42,
            stack_depth: 3,
            entries: vec![SnapshotEntry { slot: 0, value: crate::ir::SsaId::new(0) }],
        };
        let mut frame = Frame::default();
        Deoptimizer::deoptimize(&mut frame, &snapshot, 100);
        assert_eq!(frame.pc, 42);
        assert_eq!(frame.stack_top, 103);
    }
}
