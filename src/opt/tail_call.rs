//! Tail-call recognition.
//!
//! A call is a tail call iff every path from it to a return passes only
//! through phis fed by the call (or by already-admitted phis), branches,
//! and a final return of the call or such a phi. Admitted calls are
//! flagged; the actual jump is emitted by the back end, and the admitting
//! block's fallthrough is cut off with `unreachable`.

use std::collections::HashSet;

use super::{ProgramInfo, Transform};
use crate::ir::{BlockId, Function, Type, ValueId, ValueKind};

pub struct TailCallElim;

impl Transform for TailCallElim {
    fn name(&self) -> &'static str {
        "tail_call_elim"
    }

    fn description(&self) -> &'static str {
        "Mark calls in tail position so the back end can emit jumps"
    }

    fn apply(&self, func: &mut Function, _info: &ProgramInfo) -> bool {
        let mut changed = false;
        'blocks: for block in func.layout.clone() {
            for inst in func.block(block).insts.clone() {
                let is_candidate = matches!(
                    func.value(inst).kind,
                    ValueKind::Call { tail_call: false, .. }
                );
                if !is_candidate {
                    continue;
                }
                if try_convert_to_tail_call(func, inst) {
                    changed = true;
                    // At most one tail call per block; move on.
                    continue 'blocks;
                }
            }
        }
        changed
    }
}

/// Check admissibility and, on success, flag the call and seal its block.
pub fn try_convert_to_tail_call(func: &mut Function, call: ValueId) -> bool {
    if !tail_call_possible(func, call) {
        return false;
    }

    if let ValueKind::Call { tail_call, .. } = &mut func.value_mut(call).kind {
        *tail_call = true;
    }

    // The back end emits a jump for the call; normal flow never continues
    // past it. Replace the block's terminator with unreachable.
    let block = func.value(call).block.expect("call not placed in a block");
    if let Some(term) = func.terminator(block) {
        if term != call {
            let operands = func.value(term).kind.operands();
            for op in operands {
                func.remove_use(op, term);
            }
            func.value_mut(term).kind = ValueKind::Unreachable;
            func.value_mut(term).ty = Type::Void;
        }
    }
    true
}

fn tail_call_possible(func: &Function, call: ValueId) -> bool {
    let block = match func.value(call).block {
        Some(b) => b,
        None => return false,
    };
    let start = func
        .block(block)
        .insts
        .iter()
        .position(|i| *i == call)
        .map(|p| p + 1)
        .unwrap_or(usize::MAX);
    let mut phis: Vec<ValueId> = Vec::new();
    let mut visiting: HashSet<BlockId> = HashSet::new();
    admissible_from(func, call, block, start, &mut phis, &mut visiting)
}

fn admissible_from(
    func: &Function,
    call: ValueId,
    block: BlockId,
    start: usize,
    phis: &mut Vec<ValueId>,
    visiting: &mut HashSet<BlockId>,
) -> bool {
    if !visiting.insert(block) {
        // Back on the current path: a cycle with no return cannot admit.
        return false;
    }
    let result = (|| {
        for inst in func.block(block).insts.iter().skip(start) {
            match &func.value(*inst).kind {
                ValueKind::Phi { incoming } => {
                    let admitted = incoming
                        .iter()
                        .any(|(_, v)| *v == call || phis.contains(v));
                    if !admitted {
                        return false;
                    }
                    phis.push(*inst);
                }
                ValueKind::Return { value } => {
                    return match value {
                        Some(v) => *v == call || phis.contains(v),
                        None => false,
                    };
                }
                ValueKind::Branch { target } => {
                    return admissible_from(func, call, *target, 0, phis, visiting);
                }
                ValueKind::CondBranch {
                    then_block,
                    else_block,
                    ..
                } => {
                    return admissible_from(func, call, *then_block, 0, phis, visiting)
                        && admissible_from(func, call, *else_block, 0, phis, visiting);
                }
                _ => return false,
            }
        }
        false
    })();
    visiting.remove(&block);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::FunctionBuilder;
    use crate::ir::{BinaryOp, Callee, CmpOp};

    fn i64t() -> Type {
        Type::Integer(64)
    }

    fn is_tail(func: &Function, call: ValueId) -> bool {
        matches!(
            func.value(call).kind,
            ValueKind::Call { tail_call: true, .. }
        )
    }

    #[test]
    fn test_direct_tail_position() {
        let mut b = FunctionBuilder::new("f", Type::func(i64t(), vec![i64t()]));
        b.block("entry");
        let x = b.param(0);
        let call = b.call(Callee::Direct("g".into()), vec![x], i64t());
        b.ret(Some(call));
        let mut f = b.build();

        assert!(TailCallElim.apply(&mut f, &ProgramInfo::default()));
        assert!(is_tail(&f, call));
        // The fallthrough return was sealed off.
        let term = f.terminator(f.entry()).unwrap();
        assert_eq!(f.value(term).kind, ValueKind::Unreachable);
    }

    #[test]
    fn test_not_tail_when_result_used() {
        let mut b = FunctionBuilder::new("f", Type::func(i64t(), vec![i64t()]));
        b.block("entry");
        let x = b.param(0);
        let call = b.call(Callee::Direct("g".into()), vec![x], i64t());
        let one = b.imm(1, i64t());
        let sum = b.binary(BinaryOp::Add, i64t(), call, one);
        b.ret(Some(sum));
        let mut f = b.build();

        assert!(!TailCallElim.apply(&mut f, &ProgramInfo::default()));
        assert!(!is_tail(&f, call));
    }

    #[test]
    fn test_tail_through_branch_and_phi() {
        // if n == 0 then return 0 else return g(n - 1), with the return
        // merged through a phi block.
        let mut b = FunctionBuilder::new("f", Type::func(i64t(), vec![i64t()]));
        let entry = b.block("entry");
        let base = b.block("base");
        let rec = b.block("rec");
        let merge = b.block("merge");

        b.switch_to(entry);
        let n = b.param(0);
        let zero = b.imm(0, i64t());
        let is_zero = b.cmp(CmpOp::Eq, n, zero);
        b.cond_branch(is_zero, base, rec);

        b.switch_to(base);
        let lit0 = b.imm(0, i64t());
        b.branch(merge);

        b.switch_to(rec);
        let one = b.imm(1, i64t());
        let n1 = b.binary(BinaryOp::Sub, i64t(), n, one);
        let call = b.call(Callee::Direct("g".into()), vec![n1], i64t());
        b.branch(merge);

        b.switch_to(merge);
        let phi = b.phi(i64t(), vec![(base, lit0), (rec, call)]);
        b.ret(Some(phi));
        let mut f = b.build();

        assert!(TailCallElim.apply(&mut f, &ProgramInfo::default()));
        assert!(is_tail(&f, call));
        // rec's branch into the merge block was sealed.
        assert_eq!(
            f.value(f.terminator(rec).unwrap()).kind,
            ValueKind::Unreachable
        );
    }

    #[test]
    fn test_phi_not_fed_by_call_rejected() {
        let mut b = FunctionBuilder::new("f", Type::func(i64t(), vec![i64t()]));
        let entry = b.block("entry");
        let merge = b.block("merge");

        b.switch_to(entry);
        let x = b.param(0);
        let call = b.call(Callee::Direct("g".into()), vec![x], i64t());
        b.branch(merge);

        b.switch_to(merge);
        let phi = b.phi(i64t(), vec![(entry, x)]);
        let _ = call;
        b.ret(Some(phi));
        let mut f = b.build();

        assert!(!TailCallElim.apply(&mut f, &ProgramInfo::default()));
    }
}
