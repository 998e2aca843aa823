//! Function inlining.
//!
//! A call site is inlined when it is direct, the callee is a known,
//! non-recursive, non-extern definition no larger than the size budget, and
//! neither end of the call has been tail-call-converted. The callee's
//! arena is cloned into the caller block by block; returns become branches
//! to a continuation block, merging multiple return values through a phi.

use std::collections::HashMap;

use log::debug;

use crate::ir::{BlockId, Callee, Function, Module, Type, ValueId, ValueKind};

/// Inline eligible call sites across the module. Returns whether anything
/// changed; the driver re-runs attribute analysis afterwards.
pub fn inline_functions(module: &mut Module, budget: usize) -> bool {
    let mut changed = false;
    let names: Vec<String> = module
        .functions
        .values()
        .filter(|f| f.is_definition())
        .map(|f| f.name.clone())
        .collect();

    for name in names {
        // Each inlining can expose further eligible sites from the cloned
        // body; keep going until the function is quiet.
        let mut fuel = 100usize;
        while fuel > 0 {
            fuel -= 1;
            let site = match find_site(module, &name, budget) {
                Some(s) => s,
                None => break,
            };
            let (block, call, callee_name) = site;
            let callee = module
                .functions
                .get(&callee_name)
                .expect("eligible callee vanished")
                .clone();
            let caller = module
                .functions
                .get_mut(&name)
                .expect("caller vanished");
            debug!("inlining @{} into @{}", callee_name, name);
            inline_site(caller, block, call, &callee);
            changed = true;
        }
    }
    changed
}

fn find_site(module: &Module, caller: &str, budget: usize) -> Option<(BlockId, ValueId, String)> {
    let func = module.functions.get(caller)?;
    for block in &func.layout {
        for inst in &func.block(*block).insts {
            let (callee_name, tail_call) = match &func.value(*inst).kind {
                ValueKind::Call {
                    callee: Callee::Direct(n),
                    tail_call,
                    ..
                } => (n, *tail_call),
                _ => continue,
            };
            if tail_call || callee_name == caller {
                continue;
            }
            let callee = match module.functions.get(callee_name) {
                Some(c) => c,
                None => continue,
            };
            if !callee.is_definition()
                || callee.attrs.is_extern
                || callee.instruction_count() > budget
                || is_recursive(module, callee)
                || has_tail_calls(callee)
                || count_returns(callee) == 0
            {
                continue;
            }
            return Some((*block, *inst, callee_name.clone()));
        }
    }
    None
}

/// Recursive through any chain of direct calls, not just self-calls.
/// Inlining a member of a call cycle would never converge.
fn is_recursive(module: &Module, func: &Function) -> bool {
    let mut worklist: Vec<&str> = direct_callees(func).into_iter().collect();
    let mut seen: Vec<String> = Vec::new();
    while let Some(name) = worklist.pop() {
        if name == func.name {
            return true;
        }
        if seen.iter().any(|s| s == name) {
            continue;
        }
        seen.push(name.to_string());
        if let Some(next) = module.functions.get(name) {
            worklist.extend(direct_callees(next));
        }
    }
    false
}

fn direct_callees(func: &Function) -> Vec<&str> {
    let mut out = Vec::new();
    for block in &func.layout {
        for inst in &func.block(*block).insts {
            if let ValueKind::Call {
                callee: Callee::Direct(n),
                ..
            } = &func.value(*inst).kind
            {
                out.push(n.as_str());
            }
        }
    }
    out
}

fn has_tail_calls(func: &Function) -> bool {
    for block in &func.layout {
        for inst in &func.block(*block).insts {
            if matches!(
                func.value(*inst).kind,
                ValueKind::Call { tail_call: true, .. }
            ) {
                return true;
            }
        }
    }
    false
}

fn count_returns(func: &Function) -> usize {
    func.layout
        .iter()
        .flat_map(|b| func.block(*b).insts.iter())
        .filter(|i| matches!(func.value(**i).kind, ValueKind::Return { .. }))
        .count()
}

fn inline_site(caller: &mut Function, block: BlockId, call: ValueId, callee: &Function) {
    let call_idx = caller
        .block(block)
        .insts
        .iter()
        .position(|i| *i == call)
        .expect("call site not in its block");
    let args = match &caller.value(call).kind {
        ValueKind::Call { args, .. } => args.clone(),
        _ => unreachable!("inline target is not a call"),
    };
    let call_ty = caller.value(call).ty.clone();

    // Split: everything after the call moves to a continuation block, and
    // control out of the original block now leaves from there.
    let cont = caller.add_block(format!("{}.cont", caller.block(block).name));
    let moved: Vec<ValueId> = caller.block_mut(block).insts.split_off(call_idx + 1);
    for inst in &moved {
        caller.value_mut(*inst).block = Some(cont);
    }
    caller.block_mut(cont).insts = moved;
    for other in caller.layout.clone() {
        if other == cont {
            continue;
        }
        for inst in caller.block(other).insts.clone() {
            if let ValueKind::Phi { incoming } = &mut caller.value_mut(inst).kind {
                for (pred, _) in incoming.iter_mut() {
                    if *pred == block {
                        *pred = cont;
                    }
                }
            }
        }
    }

    // Clone the callee body. Parameters map to the call arguments; every
    // instruction gets a placeholder first so forward references (phis)
    // resolve.
    let mut vmap: HashMap<ValueId, ValueId> = HashMap::new();
    for (i, param) in callee.params.iter().enumerate() {
        vmap.insert(*param, args[i]);
    }
    let mut bmap: HashMap<BlockId, BlockId> = HashMap::new();
    for cb in &callee.layout {
        let label = format!("{}.{}", callee.name, callee.block(*cb).name);
        bmap.insert(*cb, caller.add_block(label));
    }
    for cb in &callee.layout {
        for inst in &callee.block(*cb).insts {
            let ty = callee.value(*inst).ty.clone();
            let placeholder = caller.new_value(ValueKind::Removed, ty);
            vmap.insert(*inst, placeholder);
        }
    }

    let mut returns: Vec<(BlockId, Option<ValueId>)> = Vec::new();
    for cb in &callee.layout {
        let target_block = bmap[cb];
        for inst in &callee.block(*cb).insts {
            let mapped = vmap[inst];
            let kind = match callee.value(*inst).kind.clone() {
                ValueKind::Return { value } => {
                    let value = value.map(|v| map_value(callee, caller, &mut vmap, v));
                    returns.push((target_block, value));
                    ValueKind::Branch { target: cont }
                }
                other => remap_kind(other, callee, caller, &mut vmap, &bmap),
            };
            caller.value_mut(mapped).kind = kind;
            caller.value_mut(mapped).block = Some(target_block);
            caller.block_mut(target_block).insts.push(mapped);
            caller.register_uses(mapped);
        }
    }

    // Wire the result: a single return forwards its value, several merge
    // through a phi at the head of the continuation block.
    if !call_ty.is_void() {
        let with_values: Vec<(BlockId, ValueId)> = returns
            .iter()
            .filter_map(|(b, v)| v.map(|v| (*b, v)))
            .collect();
        match with_values.len() {
            0 => {}
            1 => caller.replace_uses(call, with_values[0].1),
            _ => {
                let phi = caller.insert_inst(
                    cont,
                    0,
                    ValueKind::Phi {
                        incoming: with_values,
                    },
                    call_ty,
                );
                caller.replace_uses(call, phi);
            }
        }
    }

    // Retire the call and jump into the cloned entry.
    caller.remove_inst(call);
    let entry = bmap[&callee.entry()];
    caller.append_inst(block, ValueKind::Branch { target: entry }, Type::Void);
}

fn map_value(
    callee: &Function,
    caller: &mut Function,
    vmap: &mut HashMap<ValueId, ValueId>,
    v: ValueId,
) -> ValueId {
    if let Some(mapped) = vmap.get(&v) {
        return *mapped;
    }
    // Constants and refs are cloned on first use.
    let value = callee.value(v);
    debug_assert!(
        value.kind.operands().is_empty(),
        "unmapped callee value with operands"
    );
    let id = caller.new_value(value.kind.clone(), value.ty.clone());
    vmap.insert(v, id);
    id
}

fn remap_kind(
    kind: ValueKind,
    callee: &Function,
    caller: &mut Function,
    vmap: &mut HashMap<ValueId, ValueId>,
    bmap: &HashMap<BlockId, BlockId>,
) -> ValueKind {
    let mut m = |v: ValueId, caller: &mut Function, vmap: &mut HashMap<ValueId, ValueId>| {
        map_value(callee, caller, vmap, v)
    };
    match kind {
        ValueKind::Load { ptr } => ValueKind::Load {
            ptr: m(ptr, caller, vmap),
        },
        ValueKind::Store { value, ptr } => ValueKind::Store {
            value: m(value, caller, vmap),
            ptr: m(ptr, caller, vmap),
        },
        ValueKind::GetElemPtr { ptr, index, elem_ty } => ValueKind::GetElemPtr {
            ptr: m(ptr, caller, vmap),
            index: m(index, caller, vmap),
            elem_ty,
        },
        ValueKind::Copy { value } => ValueKind::Copy {
            value: m(value, caller, vmap),
        },
        ValueKind::Intrinsic { intrinsic, args } => ValueKind::Intrinsic {
            intrinsic,
            args: args.into_iter().map(|a| m(a, caller, vmap)).collect(),
        },
        ValueKind::Call {
            callee: target,
            args,
            tail_call,
        } => ValueKind::Call {
            callee: match target {
                Callee::Direct(n) => Callee::Direct(n),
                Callee::Indirect(v) => Callee::Indirect(m(v, caller, vmap)),
            },
            args: args.into_iter().map(|a| m(a, caller, vmap)).collect(),
            tail_call,
        },
        ValueKind::Phi { incoming } => ValueKind::Phi {
            incoming: incoming
                .into_iter()
                .map(|(b, v)| (bmap[&b], m(v, caller, vmap)))
                .collect(),
        },
        ValueKind::Branch { target } => ValueKind::Branch {
            target: bmap[&target],
        },
        ValueKind::CondBranch {
            cond,
            then_block,
            else_block,
        } => ValueKind::CondBranch {
            cond: m(cond, caller, vmap),
            then_block: bmap[&then_block],
            else_block: bmap[&else_block],
        },
        ValueKind::Unary { op, operand } => ValueKind::Unary {
            op,
            operand: m(operand, caller, vmap),
        },
        ValueKind::Binary { op, lhs, rhs } => ValueKind::Binary {
            op,
            lhs: m(lhs, caller, vmap),
            rhs: m(rhs, caller, vmap),
        },
        ValueKind::Compare { op, lhs, rhs } => ValueKind::Compare {
            op,
            lhs: m(lhs, caller, vmap),
            rhs: m(rhs, caller, vmap),
        },
        other @ (ValueKind::Immediate(_)
        | ValueKind::StaticRef(_)
        | ValueKind::FuncRef(_)
        | ValueKind::Parameter(_)
        | ValueKind::Alloca { .. }
        | ValueKind::Unreachable
        | ValueKind::Removed) => other,
        ValueKind::Return { .. } => unreachable!("returns are rewritten by the caller"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::FunctionBuilder;
    use crate::ir::{BinaryOp, CmpOp};

    fn i64t() -> Type {
        Type::Integer(64)
    }

    #[test]
    fn test_inlines_small_function() {
        let mut module = Module::new("test");

        let mut callee = FunctionBuilder::new("double", Type::func(i64t(), vec![i64t()]));
        callee.block("entry");
        let x = callee.param(0);
        let two = callee.imm(2, i64t());
        let prod = callee.binary(BinaryOp::Mul, i64t(), x, two);
        callee.ret(Some(prod));
        module.add_function(callee.build());

        let mut main = FunctionBuilder::new("main", Type::func(i64t(), vec![]));
        main.block("entry");
        let ten = main.imm(10, i64t());
        let call = main.call(Callee::Direct("double".into()), vec![ten], i64t());
        let one = main.imm(1, i64t());
        let sum = main.binary(BinaryOp::Add, i64t(), call, one);
        main.ret(Some(sum));
        module.add_function(main.build());

        assert!(inline_functions(&mut module, 20));

        let f = module.function("main").unwrap();
        // No calls remain.
        for block in &f.layout {
            for inst in &f.block(*block).insts {
                assert!(!matches!(f.value(*inst).kind, ValueKind::Call { .. }));
            }
        }
        crate::ir::verify::verify_function(f).unwrap();
    }

    #[test]
    fn test_multiple_returns_merge_through_phi() {
        let mut module = Module::new("test");

        let mut abs = FunctionBuilder::new("clamp0", Type::func(i64t(), vec![i64t()]));
        let entry = abs.block("entry");
        let neg = abs.block("neg");
        let pos = abs.block("pos");
        abs.switch_to(entry);
        let x = abs.param(0);
        let zero = abs.imm(0, i64t());
        let lt = abs.cmp(CmpOp::SLt, x, zero);
        abs.cond_branch(lt, neg, pos);
        abs.switch_to(neg);
        let z2 = abs.imm(0, i64t());
        abs.ret(Some(z2));
        abs.switch_to(pos);
        abs.ret(Some(x));
        module.add_function(abs.build());

        let mut main = FunctionBuilder::new("main", Type::func(i64t(), vec![i64t()]));
        main.block("entry");
        let a = main.param(0);
        let call = main.call(Callee::Direct("clamp0".into()), vec![a], i64t());
        main.ret(Some(call));
        module.add_function(main.build());

        assert!(inline_functions(&mut module, 20));
        let f = module.function("main").unwrap();
        let has_phi = f
            .layout
            .iter()
            .flat_map(|b| f.block(*b).insts.iter())
            .any(|i| matches!(f.value(*i).kind, ValueKind::Phi { .. }));
        assert!(has_phi);
        crate::ir::verify::verify_function(f).unwrap();
    }

    #[test]
    fn test_recursive_callee_not_inlined() {
        let mut module = Module::new("test");

        let mut fact = FunctionBuilder::new("fact", Type::func(i64t(), vec![i64t()]));
        fact.block("entry");
        let n = fact.param(0);
        let call = fact.call(Callee::Direct("fact".into()), vec![n], i64t());
        fact.ret(Some(call));
        module.add_function(fact.build());

        let mut main = FunctionBuilder::new("main", Type::func(i64t(), vec![]));
        main.block("entry");
        let five = main.imm(5, i64t());
        let call2 = main.call(Callee::Direct("fact".into()), vec![five], i64t());
        main.ret(Some(call2));
        module.add_function(main.build());

        assert!(!inline_functions(&mut module, 20));
        let _ = call;
    }

    #[test]
    fn test_budget_respected() {
        let mut module = Module::new("test");

        let mut big = FunctionBuilder::new("big", Type::func(i64t(), vec![i64t()]));
        big.block("entry");
        let mut acc = big.param(0);
        for _ in 0..25 {
            let one = big.imm(1, i64t());
            acc = big.binary(BinaryOp::Add, i64t(), acc, one);
        }
        big.ret(Some(acc));
        module.add_function(big.build());

        let mut main = FunctionBuilder::new("main", Type::func(i64t(), vec![]));
        main.block("entry");
        let five = main.imm(5, i64t());
        let call = main.call(Callee::Direct("big".into()), vec![five], i64t());
        main.ret(Some(call));
        module.add_function(main.build());

        assert!(!inline_functions(&mut module, 20));
        let f = module.function("main").unwrap();
        assert!(matches!(f.value(call).kind, ValueKind::Call { .. }));
    }
}
