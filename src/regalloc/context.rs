//! Linear Scan allocation driver.

use super::live_range::LiveRange;
use super::register_set::{PhysReg, RegisterPool};
use super::RegClass;
use crate::error::CompileError;
use crate::ir::SsaId;

/// Where a live range ended up.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocationResult {
    Register(PhysReg),
    Spill(u32),
}

/// One live range's final location.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Allocation {
    pub ssa_id: SsaId,
    pub class: RegClass,
    pub location: AllocationResult,
}

struct ActiveEntry {
    range: LiveRange,
    reg: PhysReg,
    alloc_index: usize,
}

/// The two class-separated register pools, run across one trace's live ranges.
pub struct RegAlloc {
    gp: RegisterPool,
    fp: RegisterPool,
    max_live_ranges: u32,
}

impl RegAlloc {
    pub fn new(max_live_ranges: u32) -> Self {
        RegAlloc {
            gp: RegisterPool::gp(),
            fp: RegisterPool::fp(),
            max_live_ranges,
        }
    }

    fn pool_mut(&mut self, class: RegClass) -> &mut RegisterPool {
        match class {
            RegClass::Gp => &mut self.gp,
            RegClass::Fp => &mut self.fp,
        }
    }

    /// Run Linear Scan over `ranges` (already sorted by start, per
    /// [`super::compute_live_ranges`]), returning every range's final location plus the
    /// total number of spill slots the frame needs.
    pub fn allocate(&mut self, ranges: &[LiveRange]) -> Result<(Vec<Allocation>, u32), CompileError> {
        if ranges.len() as u32 > self.max_live_ranges {
            return Err(CompileError::AllocatorCapacityExceeded(
                "trace has more live ranges than max_live_ranges allows",
            ));
        }

        let mut allocations: Vec<Allocation> = Vec::with_capacity(ranges.len());
        let mut active: Vec<ActiveEntry> = Vec::new();
        let mut next_spill_slot: u32 = 0;

        for &range in ranges {
            self.expire_active(&mut active, range.start)?;

            let location = match self.pool_mut(range.class).take() {
                Some(reg) => {
                    active.push(ActiveEntry {
                        range,
                        reg,
                        alloc_index: allocations.len(),
                    });
                    AllocationResult::Register(reg)
                }
                None => match self.steal_candidate(&active, range.class, range.end) {
                    Some(victim_pos) => {
                        let victim = active.remove(victim_pos);
                        let spill_slot = next_spill_slot;
                        next_spill_slot += 1;
                        allocations[victim.alloc_index].location = AllocationResult::Spill(spill_slot);
                        active.push(ActiveEntry {
                            range,
                            reg: victim.reg,
                            alloc_index: allocations.len(),
                        });
                        AllocationResult::Register(victim.reg)
                    }
                    None => {
                        let spill_slot = next_spill_slot;
                        next_spill_slot += 1;
                        AllocationResult::Spill(spill_slot)
                    }
                },
            };

            allocations.push(Allocation {
                ssa_id: range.ssa_id,
                class: range.class,
                location,
            });
        }

        Ok((allocations, next_spill_slot))
    }

    /// Expire every active range whose `end` falls before `current_start`, returning its
    /// register to the pool.
    fn expire_active(&mut self, active: &mut Vec<ActiveEntry>, current_start: u32) -> Result<(), CompileError> {
        let mut i = 0;
        while i < active.len() {
            if active[i].range.end < current_start {
                let entry = active.remove(i);
                self.pool_mut(entry.range.class)
                    .free_reg(entry.reg)
                    .map_err(CompileError::from)?;
            } else {
                i += 1;
            }
        }
        Ok(())
    }

    /// The active range of the same class with the furthest `end`, if it outlives
    /// `current_end` — the "steal" mechanism: give the current (shorter-lived) range the
    /// register instead, and spill the longer-lived one.
    fn steal_candidate(&self, active: &[ActiveEntry], class: RegClass, current_end: u32) -> Option<usize> {
        active
            .iter()
            .enumerate()
            .filter(|(_, e)| e.range.class == class)
            .max_by_key(|(_, e)| e.range.end)
            .filter(|(_, e)| e.range.end > current_end)
            .map(|(pos, _)| pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_entity::EntityRef;

    fn range(idx: u32, class: RegClass, start: u32, end: u32) -> LiveRange {
        LiveRange {
            ssa_id: SsaId::new(idx as usize),
            class,
            start,
            end,
        }
    }

    #[test]
    fn disjoint_ranges_reuse_the_same_register() {
        let mut ra = RegAlloc::new(64);
        let ranges = vec![
            range(0, RegClass::Gp, 0, 1),
            range(1, RegClass::Gp, 2, 3),
        ];
        let (allocs, spills) = ra.allocate(&ranges).unwrap();
        assert_eq!(spills, 0);
        assert!(matches!(allocs[0].location, AllocationResult::Register(_)));
        assert!(matches!(allocs[1].location, AllocationResult::Register(_)));
    }

    #[test]
    fn overlapping_ranges_past_capacity_spill() {
        let mut ra = RegAlloc::new(64);
        // 4 allocatable GP registers; a 5th concurrently-live range must spill or steal.
        let ranges = vec![
            range(0, RegClass::Gp, 0, 10),
            range(1, RegClass::Gp, 0, 10),
            range(2, RegClass::Gp, 0, 10),
            range(3, RegClass::Gp, 0, 10),
            range(4, RegClass::Gp, 1, 2),
        ];
        let (allocs, spills) = ra.allocate(&ranges).unwrap();
        assert!(spills >= 1);
        // the short-lived newcomer steals a register from the longest-lived incumbent.
        assert!(matches!(allocs[4].location, AllocationResult::Register(_)));
        assert_eq!(allocs.iter().filter(|a| matches!(a.location, AllocationResult::Spill(_))).count(), 1);
    }

    #[test]
    fn gp_and_fp_pools_are_independent() {
        let mut ra = RegAlloc::new(64);
        let ranges = vec![
            range(0, RegClass::Gp, 0, 5),
            range(1, RegClass::Fp, 0, 5),
        ];
        let (allocs, spills) = ra.allocate(&ranges).unwrap();
        assert_eq!(spills, 0);
        assert_eq!(allocs[0].class, RegClass::Gp);
        assert_eq!(allocs[1].class, RegClass::Fp);
    }

    #[test]
    fn exceeding_max_live_ranges_errors() {
        let mut ra = RegAlloc::new(1);
        let ranges = vec![range(0, RegClass::Gp, 0, 1), range(1, RegClass::Gp, 2, 3)];
        assert!(matches!(
            ra.allocate(&ranges),
            Err(CompileError::AllocatorCapacityExceeded(_))
        ));
    }
}
