//! Trace cache and deoptimizer, plus the driver that hands a recorded buffer
//! through the optimizer, allocator, and code generator to produce a [`trace::CompiledTrace`].

pub mod cache;
pub mod deopt;
pub mod trace;

use crate::codegen;
use crate::codegen::backend::{AssemblerBackend, MemoryManager};
use crate::error::CompileError;
use crate::host::NanBoxing;
use crate::ir::IrBuffer;
use crate::regalloc::{compute_live_ranges, RegAlloc};
use trace::CompiledTrace;

/// Rough upper bound on emitted code size for a trace of `node_count` IR nodes: every
/// opcode lowers to at most a handful of machine instructions (guards and box/unbox being
/// the worst offenders at three or four each), so 64 bytes/node is generous headroom
/// without wasting an unreasonable amount of mapped memory. Not a fixed constant the
/// memory manager interface requires — it only needs *a* size estimate up front.
fn estimate_code_size(node_count: usize) -> usize {
    node_count * 64 + 256
}

/// Run the optimizer, allocator, and code generator over a just-recorded buffer, handing
/// back an installable [`CompiledTrace`].
///
/// `anchor_pc` identifies the trace for the cache; it isn't carried by the IR buffer
/// itself.
pub fn compile_trace<B: AssemblerBackend>(
    backend: &B,
    mem: &dyn MemoryManager,
    host: &dyn NanBoxing,
    anchor_pc: u32,
    mut buffer: IrBuffer,
    max_live_ranges: u32,
) -> Result<CompiledTrace<B::Code>, CompileError> {
    log::debug!("jit: compiling trace at anchor_pc={anchor_pc}, {} recorded nodes", buffer.len());

    crate::opt::run_pipeline(&mut buffer)?;
    log::trace!("jit: optimizer pipeline done, {} live nodes", buffer.len());

    let ranges = compute_live_ranges(&buffer);
    let mut allocator = RegAlloc::new(max_live_ranges);
    let (allocations, spill_slots) = allocator.allocate(&ranges)?;
    log::trace!("jit: register allocation done, {spill_slots} spill slots");

    let region = mem
        .allocate(estimate_code_size(buffer.len()))
        .map_err(CompileError::MemoryAllocation)?;

    let generated = codegen::generate(backend, host, &buffer, &allocations, spill_slots, region)?;
    log::debug!("jit: trace at anchor_pc={anchor_pc} compiled successfully");

    Ok(CompiledTrace::new(
        anchor_pc,
        generated.code,
        generated.snapshots,
        generated.gc_roots,
        generated.frame_size,
    ))
}

/// Install `trace` into `cache`. If a trace already occupied that anchor, its code and
/// tables are freed through the assembler backend before it's replaced.
pub fn install_trace<B: AssemblerBackend>(
    cache: &mut cache::TraceCache<B::Code>,
    backend: &B,
    mem: &dyn MemoryManager,
    trace: CompiledTrace<B::Code>,
) {
    let anchor_pc = trace.anchor_pc();
    if let Some(evicted) = cache.insert(anchor_pc, trace) {
        log::debug!("trace cache: replacing existing trace at anchor_pc={anchor_pc}");
        backend.free(evicted.into_code(), mem);
    }
    cache.stats_mut().record_compile();
}
