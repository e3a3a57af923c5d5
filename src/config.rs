//! Enumerated configuration.

use crate::error::CompileError;

/// Tunables for recording, the trace cache, and the IR/snapshot caps.
///
/// Constructed via [`JitConfig::new`] (validating) or `JitConfig::default()` (fixed
/// defaults, guaranteed valid). There is deliberately no setter that can leave the struct
/// in an invalid state after construction; build a new one with [`JitConfig::new`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitConfig {
    /// Backward-branch-taken count at an anchor PC before recording begins. Default 50.
    pub hot_threshold: u32,
    /// Master switch; when `false` recording and execution are inert. Default `true`.
    pub enabled: bool,
    /// Initial trace cache size, must be a power of two. Default 1024.
    pub trace_cache_capacity: u32,
    /// Recording instruction budget. Default 1000.
    pub max_instructions_per_trace: u32,
    /// Recording call-depth budget. Default 8.
    pub max_call_depth_during_recording: u32,
    /// Cap on distinct snapshots per trace. Default 256.
    pub max_snapshots: u32,
    /// Cap on snapshot entries per snapshot. Default 64.
    pub max_snapshot_entries_per_snapshot: u32,
    /// Pre-header no-op slots reserved for LICM/guard-hoisting/loop-variable promotion.
    /// Must be even. Default 16.
    pub pre_header_reserved_nodes: u32,
    /// IR node cap (also the allocator's `max_live_ranges`).
    pub max_ir_nodes: u32,
}

impl Default for JitConfig {
    fn default() -> Self {
        JitConfig {
            hot_threshold: 50,
            enabled: true,
            trace_cache_capacity: 1024,
            max_instructions_per_trace: 1000,
            max_call_depth_during_recording: 8,
            max_snapshots: 256,
            max_snapshot_entries_per_snapshot: 64,
            pre_header_reserved_nodes: 16,
            max_ir_nodes: 4096,
        }
    }
}

impl JitConfig {
    /// Build a config, rejecting values that would violate an invariant elsewhere in the
    /// core (non-power-of-two cache capacity, odd pre-header reservation, zero node cap).
    pub fn new(
        hot_threshold: u32,
        enabled: bool,
        trace_cache_capacity: u32,
        max_instructions_per_trace: u32,
        max_call_depth_during_recording: u32,
        max_snapshots: u32,
        max_snapshot_entries_per_snapshot: u32,
        pre_header_reserved_nodes: u32,
        max_ir_nodes: u32,
    ) -> Result<Self, CompileError> {
        if !trace_cache_capacity.is_power_of_two() {
            return Err(CompileError::InvalidConfig(
                "trace_cache_capacity must be a power of two",
            ));
        }
        if pre_header_reserved_nodes % 2 != 0 {
            return Err(CompileError::InvalidConfig(
                "pre_header_reserved_nodes must be even",
            ));
        }
        if max_ir_nodes == 0 || (max_ir_nodes as u64) <= (pre_header_reserved_nodes as u64) {
            return Err(CompileError::InvalidConfig(
                "max_ir_nodes must exceed pre_header_reserved_nodes",
            ));
        }
        Ok(JitConfig {
            hot_threshold,
            enabled,
            trace_cache_capacity,
            max_instructions_per_trace,
            max_call_depth_during_recording,
            max_snapshots,
            max_snapshot_entries_per_snapshot,
            pre_header_reserved_nodes,
            max_ir_nodes,
        })
    }

    /// `max_live_ranges` is not independently configurable: it equals the IR
    /// node cap, since every live range originates from some IR node.
    pub fn max_live_ranges(&self) -> u32 {
        self.max_ir_nodes
    }
}
