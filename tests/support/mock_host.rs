//! A tiny host VM stand-in: fixed NaN-boxing masks, a two-entry method-symbol table, and a
//! single hardcoded range-object layout. Good enough to drive the recorder and code
//! generator end to end without a real embedding VM.

use tracejit::host::{HostContext, MethodName, MethodSymbolTable, NanBoxing, RangeObjectLayout, Value};

pub const SYM_ADD: u32 = 0;
pub const SYM_LT: u32 = 1;
pub const SYM_SUB: u32 = 2;
pub const SYM_MUL: u32 = 3;
pub const SYM_NEG: u32 = 4;
pub const SYM_ITERATE: u32 = 5;
pub const SYM_GT: u32 = 6;
pub const SYM_ITERATOR_VALUE: u32 = 7;

pub struct MockHost {
    pub pc: u32,
    pub range_from: f64,
    pub range_to: f64,
    pub range_inclusive: bool,
}

impl MockHost {
    pub fn new(pc: u32) -> Self {
        MockHost { pc, range_from: 0.0, range_to: 5.0, range_inclusive: false }
    }

    pub fn box_num(&self, n: f64) -> Value {
        n.to_bits()
    }
}

impl NanBoxing for MockHost {
    fn qnan_mask(&self) -> u64 {
        0x7ff8_0000_0000_0000
    }
    fn sign_bit(&self) -> u64 {
        0x8000_0000_0000_0000
    }
    fn false_bits(&self) -> u64 {
        self.qnan_mask() | 1
    }
    fn true_bits(&self) -> u64 {
        self.qnan_mask() | 2
    }
    fn null_bits(&self) -> u64 {
        self.qnan_mask() | 3
    }
    fn class_offset(&self) -> u64 {
        0
    }
    fn header_size(&self) -> u64 {
        16
    }
}

impl MethodSymbolTable for MockHost {
    fn name(&self, symbol_id: u32) -> Option<MethodName<'_>> {
        match symbol_id {
            SYM_ADD => Some("+(_)"),
            SYM_LT => Some("<(_)"),
            SYM_SUB => Some("-(_)"),
            SYM_MUL => Some("*(_)"),
            SYM_NEG => Some("-(_)"),
            SYM_ITERATE => Some("iterate(_)"),
            SYM_GT => Some(">(_)"),
            SYM_ITERATOR_VALUE => Some("iteratorValue(_)"),
            _ => None,
        }
    }
}

impl RangeObjectLayout for MockHost {
    fn range_class(&self) -> u64 {
        0xCAFE
    }
    fn from(&self, _range: Value) -> f64 {
        self.range_from
    }
    fn to(&self, _range: Value) -> f64 {
        self.range_to
    }
    fn is_inclusive(&self, _range: Value) -> bool {
        self.range_inclusive
    }
}

impl HostContext for MockHost {
    fn pc(&self) -> u32 {
        self.pc
    }
    fn stack_base(&self) -> u64 {
        0
    }
    fn module_vars_base(&self) -> u64 {
        0
    }
}
