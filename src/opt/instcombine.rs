//! Instruction combination: folding, identities, strength reduction and
//! call devirtualisation.
//!
//! One top-down sweep per invocation; the driver re-runs the pass while it
//! reports changes. Folding uses 64-bit wrapping arithmetic; the arithmetic
//! shift folds with signed semantics. Division by a constant zero is left
//! alone so the back end can trap.

use super::{ProgramInfo, Transform};
use crate::ir::{BinaryOp, Callee, Function, UnaryOp, ValueId, ValueKind};

pub struct InstCombine;

impl Transform for InstCombine {
    fn name(&self) -> &'static str {
        "instcombine"
    }

    fn description(&self) -> &'static str {
        "Fold constants, apply arithmetic identities and simplify calls and branches"
    }

    fn apply(&self, func: &mut Function, _info: &ProgramInfo) -> bool {
        let mut changed = false;
        for block in func.layout.clone() {
            for inst in func.block(block).insts.clone() {
                if matches!(func.value(inst).kind, ValueKind::Removed) {
                    continue;
                }
                changed |= combine(func, inst);
            }
        }
        changed
    }
}

fn imm_of(func: &Function, id: ValueId) -> Option<u64> {
    func.value(id).kind.as_immediate()
}

/// Rewrite an instruction in place into an immediate. Operand uses must be
/// removed before the kind is overwritten; the payloads share storage.
fn fold_to_imm(func: &mut Function, inst: ValueId, result: u64) {
    let operands = func.value(inst).kind.operands();
    for op in operands {
        func.remove_use(op, inst);
    }
    func.value_mut(inst).kind = ValueKind::Immediate(result);
}

/// Replace every use of `inst` with `with` and remove `inst`.
fn forward_and_remove(func: &mut Function, inst: ValueId, with: ValueId) {
    func.replace_uses(inst, with);
    func.remove_inst(inst);
}

fn combine(func: &mut Function, inst: ValueId) -> bool {
    let kind = func.value(inst).kind.clone();
    match kind {
        ValueKind::Binary { op, lhs, rhs } => combine_binary(func, inst, op, lhs, rhs),

        ValueKind::Unary {
            op: UnaryOp::Not,
            operand,
        } => {
            if let Some(a) = imm_of(func, operand) {
                fold_to_imm(func, inst, !a);
                return true;
            }
            false
        }

        // Conditional branches with constant conditions become direct.
        ValueKind::CondBranch {
            cond,
            then_block,
            else_block,
        } => {
            if let Some(c) = imm_of(func, cond) {
                func.remove_use(cond, inst);
                let target = if c != 0 { then_block } else { else_block };
                func.value_mut(inst).kind = ValueKind::Branch { target };
                return true;
            }
            false
        }

        // Phis with a single incoming pair are that value.
        ValueKind::Phi { incoming } => {
            if incoming.len() == 1 && incoming[0].1 != inst {
                forward_and_remove(func, inst, incoming[0].1);
                return true;
            }
            false
        }

        // Indirect calls through a function reference (possibly behind a
        // bitcast) become direct calls.
        ValueKind::Call {
            callee: Callee::Indirect(callee),
            args,
            tail_call,
        } => {
            let target = match &func.value(callee).kind {
                ValueKind::FuncRef(name) => Some(name.clone()),
                ValueKind::Unary {
                    op: UnaryOp::Bitcast,
                    operand,
                } => match &func.value(*operand).kind {
                    ValueKind::FuncRef(name) => Some(name.clone()),
                    _ => None,
                },
                _ => None,
            };
            if let Some(name) = target {
                func.remove_use(callee, inst);
                func.value_mut(inst).kind = ValueKind::Call {
                    callee: Callee::Direct(name),
                    args,
                    tail_call,
                };
                return true;
            }
            false
        }

        _ => false,
    }
}

fn combine_binary(
    func: &mut Function,
    inst: ValueId,
    op: BinaryOp,
    lhs: ValueId,
    rhs: ValueId,
) -> bool {
    let li = imm_of(func, lhs);
    let ri = imm_of(func, rhs);

    // Fold when both operands are immediates.
    if let (Some(a), Some(b)) = (li, ri) {
        let result = match op {
            BinaryOp::Add => Some(a.wrapping_add(b)),
            BinaryOp::Sub => Some(a.wrapping_sub(b)),
            BinaryOp::Mul => Some(a.wrapping_mul(b)),
            // b == 0 is left intact so the back end can trap.
            BinaryOp::Div => (b != 0).then(|| a.wrapping_div(b)),
            BinaryOp::Rem => (b != 0).then(|| a.wrapping_rem(b)),
            BinaryOp::Shl => Some(a.wrapping_shl(b as u32)),
            BinaryOp::Shr => Some(a.wrapping_shr(b as u32)),
            BinaryOp::Sar => Some(((a as i64).wrapping_shr(b as u32)) as u64),
            BinaryOp::And => Some(a & b),
            BinaryOp::Or => Some(a | b),
            BinaryOp::Xor => Some(a ^ b),
        };
        if let Some(result) = result {
            fold_to_imm(func, inst, result);
            return true;
        }
    }

    match op {
        BinaryOp::Add => {
            if li == Some(0) {
                forward_and_remove(func, inst, rhs);
                return true;
            }
            if ri == Some(0) {
                forward_and_remove(func, inst, lhs);
                return true;
            }
        }
        BinaryOp::Sub => {
            if ri == Some(0) {
                forward_and_remove(func, inst, lhs);
                return true;
            }
        }
        BinaryOp::Mul => {
            if li == Some(0) || ri == Some(0) {
                fold_to_imm(func, inst, 0);
                return true;
            }
            if li == Some(1) {
                forward_and_remove(func, inst, rhs);
                return true;
            }
            if ri == Some(1) {
                forward_and_remove(func, inst, lhs);
                return true;
            }
        }
        BinaryOp::Div => {
            if ri == Some(1) {
                forward_and_remove(func, inst, lhs);
                return true;
            }
            // Division by a power of two becomes an arithmetic shift right.
            if let Some(d) = ri {
                if d > 0 && d & (d - 1) == 0 {
                    let ty = func.value(inst).ty.clone();
                    let shift = func.new_value(ValueKind::Immediate(u64::from(d.trailing_zeros())), ty);
                    func.remove_use(rhs, inst);
                    func.value_mut(inst).kind = ValueKind::Binary {
                        op: BinaryOp::Sar,
                        lhs,
                        rhs: shift,
                    };
                    func.value_mut(shift).users.push(inst);
                    return true;
                }
            }
        }
        _ => {}
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::FunctionBuilder;
    use crate::ir::Type;

    fn run(func: &mut Function) -> bool {
        InstCombine.apply(func, &ProgramInfo::default())
    }

    fn i64t() -> Type {
        Type::Integer(64)
    }

    #[test]
    fn test_fold_add() {
        let mut b = FunctionBuilder::new("f", Type::func(i64t(), vec![]));
        b.block("entry");
        let a = b.imm(3, i64t());
        let c = b.imm(4, i64t());
        let sum = b.binary(BinaryOp::Add, i64t(), a, c);
        b.ret(Some(sum));
        let mut f = b.build();

        assert!(run(&mut f));
        assert_eq!(f.value(sum).kind.as_immediate(), Some(7));
        assert!(f.value(a).users.is_empty());
    }

    #[test]
    fn test_add_zero_identity() {
        let mut b = FunctionBuilder::new("f", Type::func(i64t(), vec![i64t()]));
        b.block("entry");
        let x = b.param(0);
        let zero = b.imm(0, i64t());
        let sum = b.binary(BinaryOp::Add, i64t(), x, zero);
        let ret = b.ret(Some(sum));
        let mut f = b.build();

        assert!(run(&mut f));
        match &f.value(ret).kind {
            ValueKind::Return { value: Some(v) } => assert_eq!(*v, x),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(f.value(sum).kind, ValueKind::Removed);
    }

    #[test]
    fn test_mul_by_zero() {
        let mut b = FunctionBuilder::new("f", Type::func(i64t(), vec![i64t()]));
        b.block("entry");
        let x = b.param(0);
        let zero = b.imm(0, i64t());
        let prod = b.binary(BinaryOp::Mul, i64t(), x, zero);
        b.ret(Some(prod));
        let mut f = b.build();

        assert!(run(&mut f));
        assert_eq!(f.value(prod).kind.as_immediate(), Some(0));
        assert!(f.value(x).users.is_empty());
    }

    #[test]
    fn test_div_by_zero_left_alone() {
        let mut b = FunctionBuilder::new("f", Type::func(i64t(), vec![]));
        b.block("entry");
        let a = b.imm(5, i64t());
        let z = b.imm(0, i64t());
        let div = b.binary(BinaryOp::Div, i64t(), a, z);
        b.ret(Some(div));
        let mut f = b.build();

        assert!(!run(&mut f));
        assert!(matches!(
            f.value(div).kind,
            ValueKind::Binary {
                op: BinaryOp::Div,
                ..
            }
        ));
    }

    #[test]
    fn test_div_power_of_two_becomes_sar() {
        let mut b = FunctionBuilder::new("f", Type::func(i64t(), vec![i64t()]));
        b.block("entry");
        let x = b.param(0);
        let eight = b.imm(8, i64t());
        let div = b.binary(BinaryOp::Div, i64t(), x, eight);
        b.ret(Some(div));
        let mut f = b.build();

        assert!(run(&mut f));
        match &f.value(div).kind {
            ValueKind::Binary {
                op: BinaryOp::Sar,
                lhs,
                rhs,
            } => {
                assert_eq!(*lhs, x);
                assert_eq!(f.value(*rhs).kind.as_immediate(), Some(3));
            }
            other => panic!("expected sar, got {:?}", other),
        }
        crate::ir::verify::verify_function(&f).unwrap();
    }

    #[test]
    fn test_sar_folds_signed() {
        let mut b = FunctionBuilder::new("f", Type::func(i64t(), vec![]));
        b.block("entry");
        let a = b.imm(-16, i64t());
        let two = b.imm(2, i64t());
        let sar = b.binary(BinaryOp::Sar, i64t(), a, two);
        b.ret(Some(sar));
        let mut f = b.build();

        assert!(run(&mut f));
        assert_eq!(f.value(sar).kind.as_immediate(), Some((-4i64) as u64));
    }

    #[test]
    fn test_constant_condbranch() {
        let mut b = FunctionBuilder::new("f", Type::func(i64t(), vec![]));
        let entry = b.block("entry");
        let then_b = b.block("then");
        let else_b = b.block("else");
        b.switch_to(entry);
        let one = b.imm(1, i64t());
        let br = b.cond_branch(one, then_b, else_b);
        b.switch_to(then_b);
        let a = b.imm(1, i64t());
        b.ret(Some(a));
        b.switch_to(else_b);
        let z = b.imm(0, i64t());
        b.ret(Some(z));
        let mut f = b.build();

        assert!(run(&mut f));
        assert_eq!(
            f.value(br).kind,
            ValueKind::Branch { target: then_b }
        );
        assert!(f.value(one).users.is_empty());
    }

    #[test]
    fn test_single_phi_forwarded() {
        let mut b = FunctionBuilder::new("f", Type::func(i64t(), vec![i64t()]));
        let entry = b.block("entry");
        let next = b.block("next");
        b.switch_to(entry);
        b.branch(next);
        b.switch_to(next);
        let x = b.param(0);
        let phi = b.phi(i64t(), vec![(entry, x)]);
        let ret = b.ret(Some(phi));
        let mut f = b.build();

        assert!(run(&mut f));
        match &f.value(ret).kind {
            ValueKind::Return { value: Some(v) } => assert_eq!(*v, x),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_devirtualise_call() {
        let mut b = FunctionBuilder::new("f", Type::func(i64t(), vec![]));
        b.block("entry");
        let fr = b.func_ref("callee");
        let call = b.call(Callee::Indirect(fr), vec![], i64t());
        b.ret(Some(call));
        let mut f = b.build();

        assert!(run(&mut f));
        match &f.value(call).kind {
            ValueKind::Call {
                callee: Callee::Direct(name),
                ..
            } => assert_eq!(name, "callee"),
            other => panic!("expected direct call, got {:?}", other),
        }
        assert!(f.value(fr).users.is_empty());
    }

    #[test]
    fn test_idempotent_when_optimised() {
        let mut b = FunctionBuilder::new("f", Type::func(i64t(), vec![i64t()]));
        b.block("entry");
        let x = b.param(0);
        b.ret(Some(x));
        let mut f = b.build();
        assert!(!run(&mut f));
    }
}
