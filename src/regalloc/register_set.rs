//! Fixed register pools, one per class.

use super::RegClass;
use crate::error::CoreBug;

/// A physical register, numbered within its class. Indices below each class's reserved
/// count (2, for both GP and FP scratch) are never handed out by [`RegisterPool`]; they're
/// the codegen temporaries the code generator addresses directly.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PhysReg(pub u8);

/// A class's free-list of allocatable registers, plus an in-use counter so a spurious extra
/// `free` is caught as [`CoreBug::RegisterPoolUnderflow`] rather than silently corrupting
/// the free list.
pub struct RegisterPool {
    class: RegClass,
    free: Vec<PhysReg>,
    in_use: u32,
}

impl RegisterPool {
    fn new(class: RegClass, allocatable: &[PhysReg]) -> Self {
        RegisterPool {
            class,
            free: allocatable.to_vec(),
            in_use: 0,
        }
    }

    /// GP: 6 scratch registers, the first two (R0/R1) reserved as codegen temporaries; the
    /// remaining four are allocatable.
    pub fn gp() -> Self {
        Self::new(RegClass::Gp, &[PhysReg(2), PhysReg(3), PhysReg(4), PhysReg(5)])
    }

    /// FP: 6 scratch (first two, FR0/FR1, reserved — four allocatable) plus 4 saved
    /// registers, all allocatable.
    pub fn fp() -> Self {
        Self::new(
            RegClass::Fp,
            &[
                PhysReg(2),
                PhysReg(3),
                PhysReg(4),
                PhysReg(5),
                PhysReg(6),
                PhysReg(7),
                PhysReg(8),
                PhysReg(9),
            ],
        )
    }

    pub fn class(&self) -> RegClass {
        self.class
    }

    pub fn capacity(&self) -> u32 {
        self.free.len() as u32 + self.in_use
    }

    /// Take a register from the pool, or `None` if it's exhausted (the caller spills).
    pub fn take(&mut self) -> Option<PhysReg> {
        let reg = self.free.pop()?;
        self.in_use += 1;
        Some(reg)
    }

    /// Return a register taken earlier. Errors if this pool has nothing currently taken.
    pub fn free_reg(&mut self, reg: PhysReg) -> Result<(), CoreBug> {
        if self.in_use == 0 {
            return Err(CoreBug::RegisterPoolUnderflow(self.class));
        }
        self.in_use -= 1;
        self.free.push(reg);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gp_pool_has_four_allocatable_registers() {
        let mut pool = RegisterPool::gp();
        assert_eq!(pool.capacity(), 4);
        for _ in 0..4 {
            assert!(pool.take().is_some());
        }
        assert!(pool.take().is_none());
    }

    #[test]
    fn fp_pool_has_eight_allocatable_registers() {
        assert_eq!(RegisterPool::fp().capacity(), 8);
    }

    #[test]
    fn take_then_free_round_trips() {
        let mut pool = RegisterPool::gp();
        let reg = pool.take().unwrap();
        pool.free_reg(reg).unwrap();
        assert_eq!(pool.capacity(), 4);
    }

    #[test]
    fn extra_free_reports_underflow() {
        let mut pool = RegisterPool::gp();
        let reg = PhysReg(2);
        assert!(matches!(
            pool.free_reg(reg),
            Err(CoreBug::RegisterPoolUnderflow(RegClass::Gp))
        ));
    }
}
