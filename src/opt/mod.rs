//! The optimiser: pass library and fixed-point driver.
//!
//! Intraprocedural passes implement [`Transform`] and run per function until
//! none of them reports a change; the interprocedural attribute/inlining
//! loop iterates over the whole module. Every pass takes its input by
//! mutable reference and returns whether it changed anything.

mod analysis;
mod dce;
mod inline;
mod instcombine;
mod jump_thread;
mod mem2reg;
mod reorder;
mod store_forward;
mod tail_call;

pub use analysis::analyse_functions;
pub use dce::DeadCodeElimination;
pub use inline::inline_functions;
pub use instcombine::InstCombine;
pub use jump_thread::JumpThreading;
pub use mem2reg::Mem2Reg;
pub use reorder::reorder_blocks;
pub use store_forward::StoreForwarding;
pub use tail_call::TailCallElim;

use std::collections::HashMap;

use log::debug;

use crate::ir::{Callee, DomTree, FnAttrs, Function, Module, ValueId, ValueKind};

/// Default inlining size budget, in IR instructions.
pub const INLINE_BUDGET: usize = 20;

/// Trait for function-level transformation passes.
pub trait Transform {
    /// Unique name for this transform.
    fn name(&self) -> &'static str;

    /// Description of what this transform does.
    fn description(&self) -> &'static str;

    /// Apply this transform to a function. Returns true if any changes were
    /// made.
    fn apply(&self, func: &mut Function, info: &ProgramInfo) -> bool;
}

/// Read-only snapshot of whole-program facts consulted by function passes.
///
/// Rebuilt by the driver whenever interprocedural analysis may have changed
/// attribute flags.
#[derive(Debug, Default)]
pub struct ProgramInfo {
    attrs: HashMap<String, FnAttrs>,
}

impl ProgramInfo {
    pub fn collect(module: &Module) -> Self {
        let attrs = module
            .functions
            .values()
            .map(|f| (f.name.clone(), f.attrs))
            .collect();
        Self { attrs }
    }

    pub fn attrs(&self, name: &str) -> Option<FnAttrs> {
        self.attrs.get(name).copied()
    }

    pub fn is_pure(&self, name: &str) -> bool {
        self.attrs(name).map(|a| a.pure).unwrap_or(false)
    }

    pub fn is_leaf(&self, name: &str) -> bool {
        self.attrs(name).map(|a| a.leaf).unwrap_or(false)
    }

    pub fn is_noreturn(&self, name: &str) -> bool {
        self.attrs(name).map(|a| a.noreturn).unwrap_or(false)
    }
}

/// Whether an instruction is free of side effects.
///
/// A call is side-effect-free only if it is direct, the callee is pure and
/// the call is not a tail call; everything not listed here has side effects.
pub fn side_effect_free(func: &Function, id: ValueId, info: &ProgramInfo) -> bool {
    match &func.value(id).kind {
        ValueKind::Immediate(_)
        | ValueKind::StaticRef(_)
        | ValueKind::FuncRef(_)
        | ValueKind::Parameter(_)
        | ValueKind::Alloca { .. }
        | ValueKind::Load { .. }
        | ValueKind::GetElemPtr { .. }
        | ValueKind::Copy { .. }
        | ValueKind::Unary { .. }
        | ValueKind::Binary { .. }
        | ValueKind::Compare { .. } => true,
        ValueKind::Call {
            callee: Callee::Direct(name),
            tail_call,
            ..
        } => !tail_call && info.is_pure(name),
        _ => false,
    }
}

/// Run the full optimisation pipeline over a module.
///
/// Per-function fixed point inside a whole-program fixed point: each
/// function is reordered under a fresh dominator tree and swept by the pass
/// library until quiet, then inlining and attribute analysis get a chance
/// to expose more work. Termination: each inlining grows at most one
/// function by at most the budget and deletions strictly shrink the module.
pub fn optimise(module: &mut Module, entry: &str) {
    analyse_functions(module, entry);

    let instcombine = InstCombine;
    let dce = DeadCodeElimination;
    let mem2reg = Mem2Reg;
    let jump_threading = JumpThreading;
    let store_forwarding = StoreForwarding;
    let tail_call = TailCallElim;

    loop {
        let info = ProgramInfo::collect(module);
        let names: Vec<String> = module
            .functions
            .values()
            .filter(|f| f.is_definition())
            .map(|f| f.name.clone())
            .collect();

        for name in names {
            let func = match module.functions.get_mut(&name) {
                Some(f) => f,
                None => continue,
            };
            let mut rounds = 0usize;
            loop {
                let dom = DomTree::build(func);
                reorder_blocks(func, &dom);

                let changed = instcombine.apply(func, &info)
                    || dce.apply(func, &info)
                    || mem2reg.apply(func, &info)
                    || jump_threading.apply(func, &info)
                    || store_forwarding.apply(func, &info)
                    || tail_call.apply(func, &info);
                if !changed {
                    break;
                }
                rounds += 1;
            }
            if rounds > 0 {
                debug!("optimised @{} in {} rounds", name, rounds);
            }
        }

        if !(inline_functions(module, INLINE_BUDGET) || analyse_functions(module, entry)) {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::builder::FunctionBuilder;
    use crate::ir::{BinaryOp, Type};

    #[test]
    fn test_side_effect_free_basics() {
        let mut b = FunctionBuilder::new(
            "f",
            Type::func(Type::Integer(64), vec![Type::Integer(64)]),
        );
        b.block("entry");
        let x = b.param(0);
        let sum = b.binary(BinaryOp::Add, Type::Integer(64), x, x);
        let store_target = b.alloca(Type::Integer(64));
        let st = b.store(sum, store_target);
        b.ret(Some(sum));
        let f = b.build();
        let info = ProgramInfo::default();

        assert!(side_effect_free(&f, sum, &info));
        assert!(side_effect_free(&f, store_target, &info));
        assert!(!side_effect_free(&f, st, &info));
    }

    #[test]
    fn test_optimise_constant_return() {
        // f() -> i64 { return mul(3, 4) + sub(5, 5) }  =>  return 12
        let mut b = FunctionBuilder::new("main", Type::func(Type::Integer(64), vec![]));
        b.block("entry");
        let three = b.imm(3, Type::Integer(64));
        let four = b.imm(4, Type::Integer(64));
        let five_a = b.imm(5, Type::Integer(64));
        let five_b = b.imm(5, Type::Integer(64));
        let mul = b.binary(BinaryOp::Mul, Type::Integer(64), three, four);
        let sub = b.binary(BinaryOp::Sub, Type::Integer(64), five_a, five_b);
        let sum = b.binary(BinaryOp::Add, Type::Integer(64), mul, sub);
        b.ret(Some(sum));
        let mut module = crate::ir::builder::module_with(b.build());

        optimise(&mut module, "main");

        let f = module.function("main").unwrap();
        // The folded constant and the return are all that survive.
        assert!(f.instruction_count() <= 2);
        let ret = f.terminator(f.entry()).unwrap();
        match &f.value(ret).kind {
            ValueKind::Return { value: Some(v) } => {
                assert_eq!(f.value(*v).kind.as_immediate(), Some(12));
            }
            other => panic!("expected return of immediate, got {:?}", other),
        }
    }
}
