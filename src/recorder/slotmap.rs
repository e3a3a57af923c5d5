//! Interpreter stack slot to current SSA id mapping, plus a liveness bit per slot.

use crate::ir::SsaId;

#[derive(Debug)]
pub struct SlotMap {
    current: Vec<Option<SsaId>>,
    live: Vec<bool>,
}

impl SlotMap {
    pub fn new(capacity: usize) -> Self {
        SlotMap {
            current: vec![None; capacity],
            live: vec![false; capacity],
        }
    }

    pub fn reset(&mut self) {
        for slot in &mut self.current {
            *slot = None;
        }
        for live in &mut self.live {
            *live = false;
        }
    }

    fn ensure_capacity(&mut self, slot: usize) {
        if slot >= self.current.len() {
            self.current.resize(slot + 1, None);
            self.live.resize(slot + 1, false);
        }
    }

    pub fn get(&self, slot: u32) -> Option<SsaId> {
        self.current.get(slot as usize).copied().flatten()
    }

    pub fn is_live(&self, slot: u32) -> bool {
        self.live.get(slot as usize).copied().unwrap_or(false)
    }

    pub fn set(&mut self, slot: u32, id: SsaId) {
        self.ensure_capacity(slot as usize);
        self.current[slot as usize] = Some(id);
        self.live[slot as usize] = true;
    }

    pub fn kill(&mut self, slot: u32) {
        if let Some(live) = self.live.get_mut(slot as usize) {
            *live = false;
        }
    }

    /// Slots currently marked live, in ascending order — used to build a snapshot's entry
    /// list.
    pub fn live_slots(&self) -> impl Iterator<Item = u32> + '_ {
        self.live
            .iter()
            .enumerate()
            .filter(|(_, &live)| live)
            .map(|(slot, _)| slot as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_entity::EntityRef;

    #[test]
    fn set_then_get_round_trips() {
        let mut m = SlotMap::new(4);
        let id = SsaId::new(7);
        m.set(2, id);
        assert_eq!(m.get(2), Some(id));
        assert!(m.is_live(2));
        assert!(!m.is_live(0));
    }

    #[test]
    fn kill_clears_liveness_but_not_history() {
        let mut m = SlotMap::new(4);
        m.set(1, SsaId::new(0));
        m.kill(1);
        assert!(!m.is_live(1));
        assert_eq!(m.get(1), Some(SsaId::new(0)));
    }

    #[test]
    fn live_slots_lists_ascending() {
        let mut m = SlotMap::new(4);
        m.set(3, SsaId::new(0));
        m.set(1, SsaId::new(1));
        assert_eq!(m.live_slots().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut m = SlotMap::new(1);
        m.set(10, SsaId::new(0));
        assert_eq!(m.get(10), Some(SsaId::new(0)));
    }
}
