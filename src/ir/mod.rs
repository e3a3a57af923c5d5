//! SSA IR: entities, the fixed-size node record, the IR buffer, and snapshots.

pub mod buffer;
pub mod entities;
pub mod node;
pub mod snapshot;

pub use buffer::{BufferFull, IrBuffer};
pub use entities::{LiveRangeId, Operand, SnapshotId, SsaId};
pub use node::{ArithOp, GuardKind, Immediate, IrNode, IrType, NodeFlags, Opcode};
pub use snapshot::{Snapshot, SnapshotEntry};
