//! Error taxonomy.
//!
//! Recording aborts are expected control flow and are deliberately *not* `std::error::Error`:
//! they terminate recording, leave interpreter state untouched, and are counted, not
//! propagated. `CompileError` and `CoreBug` are the two failure kinds that can end a
//! compile attempt; both cause the driver to abandon the trace and fall back to the
//! interpreter, never a user-visible failure.

use crate::ir::SsaId;
use thiserror::Error;

/// Why the recorder stopped before reaching a loop-back edge.
///
/// These are ordinary control flow, counted by [`crate::jit::cache::Stats::aborts`] and
/// never wrapped in a `Result::Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordAbort {
    /// The bytecode instruction has no recording rule.
    UnsupportedOpcode {
        /// Bytecode program counter at which recording stopped.
        pc: u32,
        /// Raw opcode byte, for logging.
        opcode: u8,
    },
    /// A unary/binary call's receiver was neither numeric nor the one widened primitive,
    /// and the widening inliner declined.
    UnsupportedReceiver {
        /// Bytecode program counter of the call site.
        pc: u32,
    },
    /// Recording ran past `max_instructions_per_trace`.
    InstructionBudgetExceeded,
    /// Recording followed a call deeper than `max_call_depth_during_recording`.
    CallDepthExceeded,
    /// The recorder's logical stack underflowed a pop/peek.
    StackUnderflow {
        /// Bytecode program counter at which the underflow was observed.
        pc: u32,
    },
    /// A backward branch targeted some PC other than the trace anchor.
    NotAnchorBackBranch {
        /// Observed branch target.
        target: u32,
        /// The trace's anchor PC.
        anchor: u32,
    },
    /// A `return` crossed back out of the traced root frame (call depth was already zero).
    ReturnCrossesRoot {
        /// Bytecode program counter of the return.
        pc: u32,
    },
}

impl RecordAbort {
    /// A short, stable tag for metrics/log grouping, independent of any embedded PC.
    pub fn reason(&self) -> &'static str {
        match self {
            RecordAbort::UnsupportedOpcode { .. } => "unsupported_opcode",
            RecordAbort::UnsupportedReceiver { .. } => "unsupported_receiver",
            RecordAbort::InstructionBudgetExceeded => "instruction_budget_exceeded",
            RecordAbort::CallDepthExceeded => "call_depth_exceeded",
            RecordAbort::StackUnderflow { .. } => "stack_underflow",
            RecordAbort::NotAnchorBackBranch { .. } => "not_anchor_back_branch",
            RecordAbort::ReturnCrossesRoot { .. } => "return_crosses_root",
        }
    }
}

/// A compile-time failure: the recorder succeeded, but optimizing, allocating, or emitting
/// the trace did not. Always means "abandon this trace, keep running interpreted."
#[derive(Debug, Error)]
pub enum CompileError {
    /// The optimizer produced an IR buffer with no snapshots at all, which would leave a
    /// trace with no way to deoptimize.
    #[error("optimizer precondition violated: trace has no snapshots")]
    NoSnapshots,

    /// The linear-scan allocator ran out of spill slots, live-range ids, or otherwise
    /// exceeded `max_live_ranges`.
    #[error("register allocator capacity exceeded: {0}")]
    AllocatorCapacityExceeded(&'static str),

    /// The assembler backend reported a failure while emitting code.
    #[error("backend codegen failed: {0}")]
    Backend(String),

    /// The external memory manager could not allocate or protect executable memory.
    #[error("executable memory allocation failed: {0}")]
    MemoryAllocation(String),

    /// `JitConfig` construction rejected a field as out of range or structurally invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// A [`CoreBug`] was downgraded to a compile failure in a release build.
    #[error("internal invariant violated, trace abandoned: {0}")]
    Invariant(#[from] CoreBug),
}

/// An invariant violation: a bug in the core itself, not in the traced program.
///
/// Debug builds should `debug_assert!` on the condition that would produce one of these
/// before ever constructing it; release builds construct it and let the caller fold it
/// into [`CompileError::Invariant`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CoreBug {
    /// An operand or snapshot entry referenced an SSA id past the buffer's current length.
    #[error("SSA id {0} out of range")]
    SsaIdOutOfRange(SsaId),
    /// A snapshot's (start, length) range fell outside the shared snapshot-entry pool.
    #[error("snapshot entry range out of bounds")]
    SnapshotEntryOutOfRange,
    /// A register pool's free-list underflowed (more frees than takes).
    #[error("register pool underflow in class {0:?}")]
    RegisterPoolUnderflow(crate::regalloc::RegClass),
}
