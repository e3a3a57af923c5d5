//! Pass 5: global value numbering.
//!
//! Hashes non-side-effecting, non-PHI nodes by `(opcode, type, operands, immediate)` into a
//! fixed-size open-addressed table (linear probing, size at least `2 × node cap`) and
//! rewrites a later duplicate's uses to the first occurrence. Side-effecting nodes already
//! cover loop-control and snapshot nodes via [`Opcode::has_side_effect`], and guards are
//! excluded the same way redundant-guard elimination (pass 3) already handles them.

use crate::ir::{Immediate, IrBuffer, IrNode, Opcode, SsaId};
use cranelift_entity::EntityRef;

fn next_pow2(n: usize) -> usize {
    let mut p = 1usize;
    while p < n {
        p <<= 1;
    }
    p
}

fn imm_bits(imm: &Immediate) -> (u64, u64, u64) {
    match imm {
        Immediate::None => (0, 0, 0),
        Immediate::Num(f) => (1, f.to_bits(), 0),
        Immediate::Bool(b) => (2, *b as u64, 0),
        Immediate::Int(i) => (3, *i as u64, 0),
        Immediate::Ptr(p) => (4, *p, 0),
        Immediate::Snapshot(id) => (5, id.index() as u64, 0),
        Immediate::Slot(s) => (6, *s as u64, 0),
        Immediate::SlotField(s, f) => (7, *s as u64, *f as u64),
        Immediate::Guard(kind, snap) => (8, *kind as u64, snap.index() as u64),
        Immediate::GuardClass(ptr, snap) => (9, *ptr, snap.index() as u64),
        Immediate::Arith(op) => (10, *op as u64, 0),
    }
}

fn hash_node(node: &IrNode) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    let mut mix = |v: u64| {
        h ^= v;
        h = h.wrapping_mul(0x100000001b3);
    };
    mix(node.opcode as u64);
    mix(node.ty as u64);
    mix(node.operands[0].expand().map(|i| i.index() as u64).unwrap_or(u64::MAX));
    mix(node.operands[1].expand().map(|i| i.index() as u64).unwrap_or(u64::MAX));
    let (tag, a, b) = imm_bits(&node.imm);
    mix(tag);
    mix(a);
    mix(b);
    h
}

fn same_value(a: &IrNode, b: &IrNode) -> bool {
    a.opcode == b.opcode && a.ty == b.ty && a.operands == b.operands && a.imm == b.imm
}

fn eligible(node: &IrNode) -> bool {
    !node.is_dead() && !node.opcode.has_side_effect() && node.opcode != Opcode::Phi
}

pub fn run(buffer: &mut IrBuffer) {
    let table_len = next_pow2((2 * buffer.capacity()).max(2));
    let mask = (table_len - 1) as u64;
    let mut table: Vec<Option<SsaId>> = vec![None; table_len];

    for idx in 0..buffer.len() {
        let id = SsaId::new(idx);
        let node = buffer.get(id).clone();
        if !eligible(&node) {
            continue;
        }
        let start = hash_node(&node) & mask;
        let mut probe = start;
        let mut found_existing = None;
        for _ in 0..table_len {
            match table[probe as usize] {
                None => break,
                Some(existing_id) => {
                    if same_value(buffer.get(existing_id), &node) {
                        found_existing = Some(existing_id);
                        break;
                    }
                }
            }
            probe = (probe + 1) & mask;
        }
        match found_existing {
            Some(original) => {
                buffer.replace_all_uses(id, original);
                buffer.get_mut(id).kill();
            }
            None => {
                table[probe as usize] = Some(id);
            }
        }
    }
}
