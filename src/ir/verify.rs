//! IR verifier.
//!
//! Checks the structural invariants every pass relies on: terminator
//! placement, def–use symmetry, phi/CFG agreement and SSA dominance. Run on
//! front-end output; violations later in the pipeline are compiler bugs and
//! assert instead.

use std::collections::HashMap;

use crate::error::{BasaltError, Result};

use super::dominators::DomTree;
use super::function::Function;
use super::module::Module;
use super::value::{ValueId, ValueKind};

pub fn verify_module(module: &Module) -> Result<()> {
    for func in module.functions.values() {
        if func.is_definition() {
            verify_function(func).map_err(|e| match e {
                BasaltError::VerifyError(msg) => {
                    BasaltError::VerifyError(format!("@{}: {}", func.name, msg))
                }
                other => other,
            })?;
        }
    }
    Ok(())
}

pub fn verify_function(func: &Function) -> Result<()> {
    let err = |msg: String| Err(BasaltError::VerifyError(msg));

    // Every block ends with exactly one terminator.
    for block in &func.layout {
        let insts = &func.block(*block).insts;
        match insts.last() {
            Some(last) if func.value(*last).kind.is_terminator() => {}
            _ => {
                return err(format!(
                    "block {} does not end with a terminator",
                    func.block(*block).name
                ))
            }
        }
        for inst in &insts[..insts.len() - 1] {
            if func.value(*inst).kind.is_terminator() {
                return err(format!(
                    "terminator in the middle of block {}",
                    func.block(*block).name
                ));
            }
        }
    }

    // Def–use symmetry: users(v) must equal the multiset of operand edges.
    let mut expected: HashMap<ValueId, Vec<ValueId>> = HashMap::new();
    for block in &func.layout {
        for inst in &func.block(*block).insts {
            func.value(*inst)
                .kind
                .for_each_operand(|op| expected.entry(op).or_default().push(*inst));
        }
    }
    for id in func.value_ids() {
        let mut recorded = func.value(id).users.clone();
        let mut wanted = expected.remove(&id).unwrap_or_default();
        recorded.sort();
        wanted.sort();
        if recorded != wanted {
            return err(format!(
                "user list of {} out of sync (recorded {:?}, expected {:?})",
                id, recorded, wanted
            ));
        }
    }

    // Phi predecessors must match the CFG predecessors of their block.
    for block in &func.layout {
        let mut preds = func.predecessors(*block);
        preds.sort();
        for inst in &func.block(*block).insts {
            if let ValueKind::Phi { incoming } = &func.value(*inst).kind {
                let mut phi_preds: Vec<_> = incoming.iter().map(|(b, _)| *b).collect();
                phi_preds.sort();
                if phi_preds != preds {
                    return err(format!(
                        "phi {} predecessors do not match block {} predecessors",
                        inst,
                        func.block(*block).name
                    ));
                }
            }
        }
    }

    // SSA dominance: every instruction operand that is itself an
    // instruction must dominate its user. Phi uses count at the end of the
    // incoming edge's block.
    let dom = DomTree::build(func);
    let mut position: HashMap<ValueId, (u32, usize)> = HashMap::new();
    for block in &func.layout {
        for (i, inst) in func.block(*block).insts.iter().enumerate() {
            position.insert(*inst, (block.0, i));
        }
    }
    for block in &func.layout {
        if !dom.is_reachable(*block) {
            continue;
        }
        for (i, inst) in func.block(*block).insts.iter().enumerate() {
            if let ValueKind::Phi { incoming } = &func.value(*inst).kind {
                for (pred, v) in incoming {
                    if let Some((def_block, _)) = position.get(v) {
                        if dom.is_reachable(*pred)
                            && !dom.dominates(crate::ir::value::BlockId(*def_block), *pred)
                        {
                            return err(format!(
                                "phi operand {} does not dominate incoming edge",
                                v
                            ));
                        }
                    }
                }
                continue;
            }
            let mut bad = None;
            func.value(*inst).kind.for_each_operand(|op| {
                if let Some((def_block, def_idx)) = position.get(&op) {
                    let def_block = crate::ir::value::BlockId(*def_block);
                    let ok = if def_block == *block {
                        *def_idx < i
                    } else {
                        dom.dominates(def_block, *block)
                    };
                    if !ok && bad.is_none() {
                        bad = Some(op);
                    }
                }
            });
            if let Some(op) = bad {
                return err(format!("use of {} is not dominated by its definition", op));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::FunctionBuilder;
    use crate::ir::types::Type;
    use crate::ir::value::BinaryOp;

    #[test]
    fn test_verify_ok() {
        let mut b = FunctionBuilder::new(
            "f",
            Type::func(Type::Integer(64), vec![Type::Integer(64)]),
        );
        b.block("entry");
        let x = b.param(0);
        let one = b.imm(1, Type::Integer(64));
        let sum = b.binary(BinaryOp::Add, Type::Integer(64), x, one);
        b.ret(Some(sum));
        assert!(verify_function(&b.build()).is_ok());
    }

    #[test]
    fn test_verify_missing_terminator() {
        let mut b = FunctionBuilder::new("f", Type::func(Type::Void, vec![]));
        b.block("entry");
        let err = verify_function(b.func()).unwrap_err();
        assert!(err.to_string().contains("terminator"));
    }

    #[test]
    fn test_verify_broken_users() {
        let mut b = FunctionBuilder::new(
            "f",
            Type::func(Type::Integer(64), vec![Type::Integer(64)]),
        );
        b.block("entry");
        let x = b.param(0);
        b.ret(Some(x));
        let mut f = b.build();
        // Corrupt the user list behind the helpers' back.
        f.value_mut(x).users.clear();
        let err = verify_function(&f).unwrap_err();
        assert!(err.to_string().contains("out of sync"));
    }
}
