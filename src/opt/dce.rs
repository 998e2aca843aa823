//! Dead code elimination.
//!
//! An instruction is removable iff it has zero users and no side effects.
//! Terminators are never removed here; unreachable blocks are handled by
//! block reordering.

use super::{side_effect_free, ProgramInfo, Transform};
use crate::ir::{Function, ValueKind};

pub struct DeadCodeElimination;

impl Transform for DeadCodeElimination {
    fn name(&self) -> &'static str {
        "dce"
    }

    fn description(&self) -> &'static str {
        "Remove instructions with no users and no side effects"
    }

    fn apply(&self, func: &mut Function, info: &ProgramInfo) -> bool {
        let mut changed = false;
        for block in func.layout.clone() {
            for inst in func.block(block).insts.clone() {
                let value = func.value(inst);
                if matches!(value.kind, ValueKind::Removed) || value.kind.is_terminator() {
                    continue;
                }
                if value.users.is_empty() && side_effect_free(func, inst, info) {
                    func.remove_inst(inst);
                    changed = true;
                }
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::FunctionBuilder;
    use crate::ir::{BinaryOp, Type};

    fn i64t() -> Type {
        Type::Integer(64)
    }

    #[test]
    fn test_removes_unused_arithmetic() {
        let mut b = FunctionBuilder::new("f", Type::func(i64t(), vec![i64t()]));
        b.block("entry");
        let x = b.param(0);
        let dead = b.binary(BinaryOp::Mul, i64t(), x, x);
        b.ret(Some(x));
        let mut f = b.build();

        assert!(DeadCodeElimination.apply(&mut f, &ProgramInfo::default()));
        assert_eq!(f.value(dead).kind, ValueKind::Removed);
        assert_eq!(f.instruction_count(), 1);
    }

    #[test]
    fn test_keeps_stores() {
        let mut b = FunctionBuilder::new("f", Type::func(Type::Void, vec![i64t()]));
        b.block("entry");
        let x = b.param(0);
        let slot = b.alloca(i64t());
        b.store(x, slot);
        b.ret(None);
        let mut f = b.build();

        assert!(!DeadCodeElimination.apply(&mut f, &ProgramInfo::default()));
        assert_eq!(f.instruction_count(), 3);
    }

    #[test]
    fn test_removes_chain_over_iterations() {
        // dead2 uses dead1; one sweep removes dead2, the next removes dead1.
        let mut b = FunctionBuilder::new("f", Type::func(i64t(), vec![i64t()]));
        b.block("entry");
        let x = b.param(0);
        let dead1 = b.binary(BinaryOp::Add, i64t(), x, x);
        let dead2 = b.binary(BinaryOp::Add, i64t(), dead1, x);
        b.ret(Some(x));
        let mut f = b.build();

        let info = ProgramInfo::default();
        assert!(DeadCodeElimination.apply(&mut f, &info));
        assert_eq!(f.value(dead2).kind, ValueKind::Removed);
        // dead1 lost its only user mid-sweep; the driver's re-run picks it up.
        assert!(DeadCodeElimination.apply(&mut f, &info));
        assert_eq!(f.value(dead1).kind, ValueKind::Removed);
        assert_eq!(f.instruction_count(), 1);
    }

    #[test]
    fn test_keeps_impure_calls() {
        let mut b = FunctionBuilder::new("f", Type::func(i64t(), vec![]));
        b.block("entry");
        let call = b.call(crate::ir::Callee::Direct("ext".into()), vec![], i64t());
        let zero = b.imm(0, i64t());
        b.ret(Some(zero));
        let mut f = b.build();

        assert!(!DeadCodeElimination.apply(&mut f, &ProgramInfo::default()));
        assert!(matches!(f.value(call).kind, ValueKind::Call { .. }));
    }
}
