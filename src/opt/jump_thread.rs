//! Jump threading and branch simplification.
//!
//! Blocks that consist of a single unconditional branch are bypassed:
//! every edge into such a block is redirected to its target, phi incomings
//! are rewired accordingly, and the block is deleted. Conditional branches
//! whose arms coincide become unconditional.

use super::{ProgramInfo, Transform};
use crate::ir::{BlockId, Function, ValueKind};

pub struct JumpThreading;

impl Transform for JumpThreading {
    fn name(&self) -> &'static str {
        "jump_threading"
    }

    fn description(&self) -> &'static str {
        "Bypass trivial branch-only blocks and simplify degenerate conditional branches"
    }

    fn apply(&self, func: &mut Function, _info: &ProgramInfo) -> bool {
        let mut changed = false;
        let mut to_remove: Vec<BlockId> = Vec::new();

        for block in func.layout.clone() {
            let insts = &func.block(block).insts;
            let only = match (insts.len(), insts.first()) {
                (1, Some(i)) => *i,
                _ => {
                    changed |= simplify_cond_branch(func, block);
                    continue;
                }
            };

            if let ValueKind::Branch { target } = func.value(only).kind {
                // A trivial self-loop or the entry block stays put; the
                // entry must remain the first block of the function.
                if target == block || block == func.entry() {
                    continue;
                }
                // Chains of trivial blocks resolve one link per sweep, so
                // phi rewiring never refers to a block deleted this sweep.
                let target_insts = &func.block(target).insts;
                if target_insts.len() == 1 {
                    if let ValueKind::Branch { .. } = func.value(target_insts[0]).kind {
                        continue;
                    }
                }
                thread_through(func, block, target);
                to_remove.push(block);
                changed = true;
            } else {
                changed |= simplify_cond_branch(func, block);
            }
        }

        for block in to_remove {
            func.remove_block(block);
        }
        changed
    }
}

/// Redirect every edge into `block` to `target` and rewire phis.
fn thread_through(func: &mut Function, block: BlockId, target: BlockId) {
    let preds = func.predecessors(block);

    for other in func.layout.clone() {
        if other == block {
            continue;
        }
        if let Some(term) = func.terminator(other) {
            match &mut func.value_mut(term).kind {
                ValueKind::Branch { target: t } => {
                    if *t == block {
                        *t = target;
                    }
                }
                ValueKind::CondBranch {
                    then_block,
                    else_block,
                    ..
                } => {
                    if *then_block == block {
                        *then_block = target;
                    }
                    if *else_block == block {
                        *else_block = target;
                    }
                }
                _ => {}
            }
        }

        // A phi incoming along the deleted block's edge now arrives from
        // each of the block's former predecessors instead.
        for inst in func.block(other).insts.clone() {
            let incoming = match &func.value(inst).kind {
                ValueKind::Phi { incoming } => incoming.clone(),
                _ => continue,
            };
            if !incoming.iter().any(|(p, _)| *p == block) {
                continue;
            }
            let mut rewired = Vec::with_capacity(incoming.len());
            let mut added = Vec::new();
            let mut dropped = Vec::new();
            for (pred, v) in incoming {
                if pred != block {
                    rewired.push((pred, v));
                    continue;
                }
                if preds.is_empty() {
                    // Edge is gone entirely; drop the incoming.
                    dropped.push(v);
                    continue;
                }
                for (i, p) in preds.iter().enumerate() {
                    rewired.push((*p, v));
                    if i > 0 {
                        added.push(v);
                    }
                }
            }
            if let ValueKind::Phi { incoming } = &mut func.value_mut(inst).kind {
                *incoming = rewired;
            }
            for v in added {
                func.value_mut(v).users.push(inst);
            }
            for v in dropped {
                func.remove_use(v, inst);
            }
        }
    }
}

/// `condbranch c, T, T` becomes `branch T`, dropping the use of `c`.
fn simplify_cond_branch(func: &mut Function, block: BlockId) -> bool {
    let term = match func.terminator(block) {
        Some(t) => t,
        None => return false,
    };
    if let ValueKind::CondBranch {
        cond,
        then_block,
        else_block,
    } = func.value(term).kind
    {
        if then_block == else_block {
            func.remove_use(cond, term);
            func.value_mut(term).kind = ValueKind::Branch { target: then_block };
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::FunctionBuilder;
    use crate::ir::Type;

    fn i64t() -> Type {
        Type::Integer(64)
    }

    #[test]
    fn test_threads_trivial_block() {
        // entry -> hop -> exit collapses to entry -> exit.
        let mut b = FunctionBuilder::new("f", Type::func(i64t(), vec![]));
        let entry = b.block("entry");
        let hop = b.block("hop");
        let exit = b.block("exit");
        b.switch_to(entry);
        b.branch(hop);
        b.switch_to(hop);
        b.branch(exit);
        b.switch_to(exit);
        let zero = b.imm(0, i64t());
        b.ret(Some(zero));
        let mut f = b.build();

        assert!(JumpThreading.apply(&mut f, &ProgramInfo::default()));
        assert!(!f.layout.contains(&hop));
        assert_eq!(f.successors(entry), vec![exit]);
    }

    #[test]
    fn test_phi_rewired_to_former_pred() {
        // entry condbranches to hop/right; hop branches to merge. After
        // threading, the phi's hop edge must arrive from entry.
        let mut b = FunctionBuilder::new("f", Type::func(i64t(), vec![i64t()]));
        let entry = b.block("entry");
        let hop = b.block("hop");
        let right = b.block("right");
        let merge = b.block("merge");

        b.switch_to(entry);
        let x = b.param(0);
        b.cond_branch(x, hop, right);
        b.switch_to(hop);
        b.branch(merge);
        b.switch_to(right);
        b.branch(merge);
        b.switch_to(merge);
        let one = b.imm(1, i64t());
        let two = b.imm(2, i64t());
        let phi = b.phi(i64t(), vec![(hop, one), (right, two)]);
        b.ret(Some(phi));
        let mut f = b.build();

        assert!(JumpThreading.apply(&mut f, &ProgramInfo::default()));
        assert!(!f.layout.contains(&hop));
        match &f.value(phi).kind {
            ValueKind::Phi { incoming } => {
                assert!(incoming.contains(&(entry, one)));
                assert!(incoming.contains(&(right, two)));
            }
            other => panic!("unexpected {:?}", other),
        }
        crate::ir::verify::verify_function(&f).unwrap();
    }

    #[test]
    fn test_degenerate_cond_branch() {
        let mut b = FunctionBuilder::new("f", Type::func(i64t(), vec![i64t()]));
        let entry = b.block("entry");
        let exit = b.block("exit");
        b.switch_to(entry);
        let x = b.param(0);
        let br = b.cond_branch(x, exit, exit);
        b.switch_to(exit);
        let zero = b.imm(0, i64t());
        b.ret(Some(zero));
        let mut f = b.build();

        assert!(JumpThreading.apply(&mut f, &ProgramInfo::default()));
        assert_eq!(f.value(br).kind, ValueKind::Branch { target: exit });
        assert!(f.value(x).users.is_empty());
    }
}
