//! Monomorphic widening for the host's integer range-iteration primitive.
//!
//! Inlines two operator-method calls that the ordinary numeric dispatch table in
//! [`super`] doesn't cover because their receiver isn't a boxed number: advancing a range
//! iterator, and reading an iterator's current numeric value. Everything else with a
//! non-numeric receiver still aborts.

use super::Recorder;
use crate::error::RecordAbort;
use crate::host::{HostContext, Value};
use crate::ir::{ArithOp, GuardKind, Immediate, IrNode, IrType, Opcode, Operand};

impl Recorder {
    /// `iterate(_)`/`iteratorValue(_)`: both are binary calls on the range/sequence
    /// receiver with the iterator passed as the argument. Returns `Ok(true)` if handled.
    pub(super) fn widen_binary_call(
        &mut self,
        host: &dyn HostContext,
        name: &str,
        receiver_val: Value,
        _arg_val: Value,
    ) -> Result<bool, RecordAbort> {
        if name == "iteratorValue(_)" {
            return self.widen_iterator_value(host);
        }
        if name != "iterate(_)" {
            return Ok(false);
        }
        let arg_id = self.pop_stack()?;
        let receiver_id = self.pop_stack()?;

        let ascending = host.from(receiver_val) <= host.to(receiver_val);
        let inclusive = host.is_inclusive(receiver_val);
        let bound = host.to(receiver_val);

        let snap = self.emit_snapshot(host.pc())?;
        self.emit_guard_class(receiver_id, host.range_class(), snap)?;
        self.emit_guard_num(arg_id, snap)?;

        let unboxed = self.emit_unbox_num(arg_id)?;
        let step = if ascending { 1.0 } else { -1.0 };
        let step_const = self.push_node(IrNode::new(
            Opcode::ConstNum,
            IrType::Num,
            [Operand::NONE, Operand::NONE],
            Immediate::Num(step),
        ))?;
        let advanced = self.push_node(IrNode::new(
            Opcode::Arith,
            IrType::Num,
            [Operand::from(unboxed), Operand::from(step_const)],
            Immediate::Arith(ArithOp::Add),
        ))?;

        let bound_const = self.push_node(IrNode::new(
            Opcode::ConstNum,
            IrType::Num,
            [Operand::NONE, Operand::NONE],
            Immediate::Num(bound),
        ))?;
        let cmp_op = match (ascending, inclusive) {
            (true, true) => ArithOp::Lte,
            (true, false) => ArithOp::Lt,
            (false, true) => ArithOp::Gte,
            (false, false) => ArithOp::Gt,
        };
        let cmp = self.push_node(IrNode::new(
            Opcode::Arith,
            IrType::Bool,
            [Operand::from(advanced), Operand::from(bound_const)],
            Immediate::Arith(cmp_op),
        ))?;
        let boxed_cmp = self.emit_box_bool(cmp)?;
        self.emit_guard(GuardKind::True, boxed_cmp, snap)?;

        let boxed_advanced = self.emit_box_num(advanced)?;
        self.push_stack(boxed_advanced)?;
        Ok(true)
    }

    /// `iteratorValue(_)`: binary call on the range/sequence receiver (not inspected);
    /// the argument is the iterator's current numeric value — guard it numeric and alias
    /// it as the result.
    fn widen_iterator_value(&mut self, host: &dyn HostContext) -> Result<bool, RecordAbort> {
        let arg_id = self.pop_stack()?;
        let _receiver_id = self.pop_stack()?;
        let snap = self.emit_snapshot(host.pc())?;
        self.emit_guard_num(arg_id, snap)?;
        self.push_stack(arg_id)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::super::{BcInstr, RecordStep, Recorder};
    use crate::config::JitConfig;
    use crate::host::{HostContext, MethodName, MethodSymbolTable, NanBoxing, RangeObjectLayout, Value};
    use cranelift_entity::EntityRef;

    struct MockHost {
        pc: u32,
        from: f64,
        to: f64,
        inclusive: bool,
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
                0 => Some("iterate(_)"),
                1 => Some("iteratorValue(_)"),
                _ => None,
            }
        }
    }

    impl RangeObjectLayout for MockHost {
        fn range_class(&self) -> u64 {
            0xCAFE
        }
        fn from(&self, _range: Value) -> f64 {
            self.from
        }
        fn to(&self, _range: Value) -> f64 {
            self.to
        }
        fn is_inclusive(&self, _range: Value) -> bool {
            self.inclusive
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

    /// A boxed value whose bits collide with neither the qnan payload nor any plain f64,
    /// standing in for a boxed range-object pointer (not a number).
    const FAKE_RANGE_OBJ: Value = 0x7ff8_0000_0000_0000 | 0x8000_0000_0000_0000 | 0x10;

    #[test]
    fn iterate_ascending_exclusive_emits_guard_class_and_lt_bound() {
        let host = MockHost { pc: 0, from: 1.0, to: 10.0, inclusive: false };
        let mut rec = Recorder::new(JitConfig::default());
        rec.start(0, &[], 0).unwrap();
        rec.step(&host, BcInstr::PushConstObj(FAKE_RANGE_OBJ));
        rec.step(&host, BcInstr::PushConstNum(1.0));
        let step = rec.step(
            &host,
            BcInstr::BinaryCall { symbol_id: 0, receiver: FAKE_RANGE_OBJ, arg: 1.0f64.to_bits() },
        );
        assert!(matches!(step, RecordStep::Continue));
        let step = rec.step(&host, BcInstr::BackBranch { target: 0 });
        assert!(matches!(step, RecordStep::Completed));
        let buf = rec.finish();
        assert!(buf.snapshot_count() >= 1);
        let mut has_class_guard = false;
        for idx in 0..buf.len() {
            let id = crate::ir::SsaId::new(idx);
            if buf.get(id).imm.as_class_ptr() == Some(0xCAFE) {
                has_class_guard = true;
            }
        }
        assert!(has_class_guard);
    }

    #[test]
    fn iterate_descending_uses_negative_step() {
        let host = MockHost { pc: 0, from: 10.0, to: 0.0, inclusive: true };
        let mut rec = Recorder::new(JitConfig::default());
        rec.start(0, &[], 0).unwrap();
        rec.step(&host, BcInstr::PushConstObj(FAKE_RANGE_OBJ));
        rec.step(&host, BcInstr::PushConstNum(10.0));
        let step = rec.step(
            &host,
            BcInstr::BinaryCall { symbol_id: 0, receiver: FAKE_RANGE_OBJ, arg: 10.0f64.to_bits() },
        );
        assert!(matches!(step, RecordStep::Continue));
        let mut has_negative_step = false;
        for idx in 0..rec.buffer.len() {
            let id = crate::ir::SsaId::new(idx);
            if rec.buffer.get(id).imm.as_num() == Some(-1.0) {
                has_negative_step = true;
            }
        }
        assert!(has_negative_step);
    }

    #[test]
    fn iterator_value_aliases_its_argument_without_a_negate() {
        let host = MockHost { pc: 0, from: 0.0, to: 5.0, inclusive: false };
        let mut rec = Recorder::new(JitConfig::default());
        rec.start(0, &[], 0).unwrap();
        rec.step(&host, BcInstr::PushConstObj(FAKE_RANGE_OBJ));
        rec.step(&host, BcInstr::PushConstNum(3.0));
        let step = rec.step(
            &host,
            BcInstr::BinaryCall { symbol_id: 1, receiver: FAKE_RANGE_OBJ, arg: 3.0f64.to_bits() },
        );
        assert!(matches!(step, RecordStep::Continue));
        let mut has_neg = false;
        for idx in 0..rec.buffer.len() {
            let id = crate::ir::SsaId::new(idx);
            if rec.buffer.get(id).opcode == crate::ir::Opcode::Neg {
                has_neg = true;
            }
        }
        assert!(!has_neg);
    }

    #[test]
    fn non_widened_non_numeric_receiver_still_aborts() {
        let host = MockHost { pc: 0, from: 0.0, to: 5.0, inclusive: false };
        let mut rec = Recorder::new(JitConfig::default());
        rec.start(0, &[], 0).unwrap();
        rec.step(&host, BcInstr::PushConstObj(FAKE_RANGE_OBJ));
        rec.step(&host, BcInstr::PushConstObj(FAKE_RANGE_OBJ));
        let step = rec.step(
            &host,
            BcInstr::BinaryCall { symbol_id: 99, receiver: FAKE_RANGE_OBJ, arg: FAKE_RANGE_OBJ },
        );
        assert!(matches!(
            step,
            RecordStep::Aborted(crate::error::RecordAbort::UnsupportedReceiver { .. })
        ));
    }
}
