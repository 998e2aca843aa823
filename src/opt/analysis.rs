//! Whole-program function attribute inference.
//!
//! Repeats until stable: recompute `pure`, `leaf` and `noreturn` for every
//! defined function, re-derive `ever_referenced` from instructions and
//! global initialisers, then delete functions nothing references. The
//! designated entry function always survives.

use std::collections::{HashMap, HashSet};

use log::debug;

use super::{side_effect_free, ProgramInfo};
use crate::ir::{Callee, FnAttrs, Function, GlobalInit, Module, ValueKind};

/// Returns whether anything at all changed across the fixed point.
pub fn analyse_functions(module: &mut Module, entry: &str) -> bool {
    let mut ever_changed = false;

    loop {
        let mut changed = false;

        // Attribute recomputation against a per-round snapshot.
        let snapshot: HashMap<String, FnAttrs> = module
            .functions
            .values()
            .map(|f| (f.name.clone(), f.attrs))
            .collect();
        let info = ProgramInfo::collect(module);

        for func in module.functions.values_mut() {
            if func.attrs.is_extern {
                continue;
            }
            func.attrs.ever_referenced = false;

            let pure = check_pure(func, &info, &snapshot);
            let leaf = check_leaf(func, &snapshot);
            let noreturn = check_noreturn(func, &snapshot);
            if func.attrs.pure != pure {
                func.attrs.pure = pure;
                changed = true;
            }
            if func.attrs.leaf != leaf {
                func.attrs.leaf = leaf;
                changed = true;
            }
            if func.attrs.noreturn != noreturn {
                func.attrs.noreturn = noreturn;
                changed = true;
            }
        }

        // Re-derive reachability of function symbols.
        let mut referenced: HashSet<String> = HashSet::new();
        referenced.insert(entry.to_string());
        for func in module.functions.values() {
            for block in &func.layout {
                for inst in &func.block(*block).insts {
                    match &func.value(*inst).kind {
                        ValueKind::FuncRef(name) => {
                            referenced.insert(name.clone());
                        }
                        ValueKind::Call {
                            callee: Callee::Direct(name),
                            ..
                        } => {
                            referenced.insert(name.clone());
                        }
                        _ => {}
                    }
                }
            }
        }
        for global in module.globals.values() {
            if let Some(GlobalInit::FuncRef(name)) = &global.init {
                referenced.insert(name.clone());
            }
        }

        for func in module.functions.values_mut() {
            func.attrs.ever_referenced = referenced.contains(&func.name);
        }

        // Delete and free functions nothing references.
        let before = module.functions.len();
        module.functions.retain(|name, func| {
            let keep = func.attrs.ever_referenced;
            if !keep {
                debug!("removing unreferenced function @{}", name);
            }
            keep
        });
        if module.functions.len() != before {
            changed = true;
        }

        if !changed {
            break;
        }
        ever_changed = true;
    }

    ever_changed
}

/// A function is pure when no instruction has a non-local side effect: a
/// store to a local alloca is local, as is a direct call to a pure
/// function.
fn check_pure(func: &Function, info: &ProgramInfo, snapshot: &HashMap<String, FnAttrs>) -> bool {
    for block in &func.layout {
        for inst in &func.block(*block).insts {
            if side_effect_free(func, *inst, info) {
                continue;
            }
            match &func.value(*inst).kind {
                ValueKind::Branch { .. }
                | ValueKind::CondBranch { .. }
                | ValueKind::Return { .. }
                | ValueKind::Unreachable
                | ValueKind::Phi { .. } => continue,
                ValueKind::Store { ptr, .. } => {
                    if matches!(func.value(*ptr).kind, ValueKind::Alloca { .. }) {
                        continue;
                    }
                }
                ValueKind::Call {
                    callee: Callee::Direct(name),
                    ..
                } => {
                    if snapshot.get(name).map(|a| a.pure).unwrap_or(false) {
                        continue;
                    }
                }
                _ => {}
            }
            return false;
        }
    }
    true
}

/// A leaf function contains no calls except recursive tail calls or tail
/// calls to other leaf functions.
fn check_leaf(func: &Function, snapshot: &HashMap<String, FnAttrs>) -> bool {
    for block in &func.layout {
        for inst in &func.block(*block).insts {
            if let ValueKind::Call {
                callee, tail_call, ..
            } = &func.value(*inst).kind
            {
                if let (true, Callee::Direct(name)) = (*tail_call, callee) {
                    if name == &func.name
                        || snapshot.get(name).map(|a| a.leaf).unwrap_or(false)
                    {
                        continue;
                    }
                }
                return false;
            }
        }
    }
    true
}

/// A function is noreturn when it contains no non-tail return and no tail
/// call whose known callee might return. Indirect tail calls disqualify.
fn check_noreturn(func: &Function, snapshot: &HashMap<String, FnAttrs>) -> bool {
    for block in &func.layout {
        for inst in &func.block(*block).insts {
            match &func.value(*inst).kind {
                ValueKind::Call {
                    callee,
                    tail_call: true,
                    ..
                } => match callee {
                    Callee::Indirect(_) => return false,
                    Callee::Direct(name) => {
                        if !snapshot.get(name).map(|a| a.noreturn).unwrap_or(false) {
                            return false;
                        }
                    }
                },
                ValueKind::Return { .. } => return false,
                _ => {}
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::FunctionBuilder;
    use crate::ir::{BinaryOp, Type};

    fn i64t() -> Type {
        Type::Integer(64)
    }

    fn simple_fn(name: &str) -> FunctionBuilder {
        FunctionBuilder::new(name, Type::func(i64t(), vec![i64t()]))
    }

    #[test]
    fn test_dead_function_removed() {
        // main calls a; b is unused and disappears.
        let mut module = Module::new("test");

        let mut a = simple_fn("a");
        a.block("entry");
        let x = a.param(0);
        a.ret(Some(x));
        module.add_function(a.build());

        let mut b = simple_fn("b");
        b.block("entry");
        let x = b.param(0);
        b.ret(Some(x));
        module.add_function(b.build());

        let mut main = FunctionBuilder::new("main", Type::func(i64t(), vec![]));
        main.block("entry");
        let one = main.imm(1, i64t());
        let call = main.call(Callee::Direct("a".into()), vec![one], i64t());
        main.ret(Some(call));
        module.add_function(main.build());

        assert!(analyse_functions(&mut module, "main"));
        assert!(module.function("a").is_some());
        assert!(module.function("b").is_none());
        assert!(module.function("main").is_some());
    }

    #[test]
    fn test_purity_propagates_through_calls() {
        let mut module = Module::new("test");

        let mut leafy = simple_fn("leafy");
        leafy.block("entry");
        let x = leafy.param(0);
        let sum = leafy.binary(BinaryOp::Add, i64t(), x, x);
        leafy.ret(Some(sum));
        module.add_function(leafy.build());

        let mut caller = FunctionBuilder::new("main", Type::func(i64t(), vec![]));
        caller.block("entry");
        let one = caller.imm(1, i64t());
        let call = caller.call(Callee::Direct("leafy".into()), vec![one], i64t());
        caller.ret(Some(call));
        module.add_function(caller.build());

        analyse_functions(&mut module, "main");
        assert!(module.function("leafy").unwrap().attrs.pure);
        assert!(module.function("leafy").unwrap().attrs.leaf);
        // The caller's only call is to a pure function, so it is pure too;
        // it is not a leaf because the call is not a tail call.
        assert!(module.function("main").unwrap().attrs.pure);
        assert!(!module.function("main").unwrap().attrs.leaf);
    }

    #[test]
    fn test_global_initialiser_keeps_function() {
        let mut module = Module::new("test");
        let mut f = simple_fn("handler");
        f.block("entry");
        let x = f.param(0);
        f.ret(Some(x));
        module.add_function(f.build());
        module.add_global(crate::ir::GlobalVar {
            name: "table".into(),
            ty: Type::Ptr,
            init: Some(GlobalInit::FuncRef("handler".into())),
        });

        let mut main = FunctionBuilder::new("main", Type::func(i64t(), vec![]));
        main.block("entry");
        let zero = main.imm(0, i64t());
        main.ret(Some(zero));
        module.add_function(main.build());

        analyse_functions(&mut module, "main");
        assert!(module.function("handler").is_some());
    }

    #[test]
    fn test_noreturn_detection() {
        let mut module = Module::new("test");
        let mut spin = FunctionBuilder::new("spin", Type::func(Type::Void, vec![]));
        let entry = spin.block("entry");
        spin.branch(entry);
        module.add_function(spin.build());

        let mut main = FunctionBuilder::new("main", Type::func(i64t(), vec![]));
        main.block("entry");
        main.call(Callee::Direct("spin".into()), vec![], Type::Void);
        let zero = main.imm(0, i64t());
        main.ret(Some(zero));
        module.add_function(main.build());

        analyse_functions(&mut module, "main");
        assert!(module.function("spin").unwrap().attrs.noreturn);
        assert!(!module.function("main").unwrap().attrs.noreturn);
    }
}
