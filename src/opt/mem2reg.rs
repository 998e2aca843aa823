//! Stack-to-register promotion.
//!
//! Promotes an alloca when exactly one store targets it, every other user
//! is a load, and no load precedes the store in traversal order. Variables
//! with multiple stores or taken addresses are left to store forwarding.

use log::warn;

use super::{ProgramInfo, Transform};
use crate::ir::{Function, ValueId, ValueKind};

pub struct Mem2Reg;

struct StackVar {
    alloca: ValueId,
    store: Option<ValueId>,
    loads: Vec<ValueId>,
    unoptimisable: bool,
}

impl Transform for Mem2Reg {
    fn name(&self) -> &'static str {
        "mem2reg"
    }

    fn description(&self) -> &'static str {
        "Promote single-store stack slots into SSA values"
    }

    fn apply(&self, func: &mut Function, _info: &ProgramInfo) -> bool {
        let mut vars: Vec<StackVar> = Vec::new();

        // Collect stack variables in traversal order, recording the single
        // store and all loads.
        for block in &func.layout {
            for inst in &func.block(*block).insts {
                match &func.value(*inst).kind {
                    ValueKind::Alloca { .. } => vars.push(StackVar {
                        alloca: *inst,
                        store: None,
                        loads: Vec::new(),
                        unoptimisable: false,
                    }),
                    ValueKind::Store { ptr, .. } => {
                        if let Some(var) =
                            vars.iter_mut().find(|v| !v.unoptimisable && v.alloca == *ptr)
                        {
                            if var.store.is_some() {
                                var.unoptimisable = true;
                            } else {
                                var.store = Some(*inst);
                            }
                        }
                    }
                    ValueKind::Load { ptr } => {
                        if let Some(var) =
                            vars.iter_mut().find(|v| !v.unoptimisable && v.alloca == *ptr)
                        {
                            if var.store.is_none() {
                                var.unoptimisable = true;
                                warn!(
                                    "load of uninitialised variable in function @{}",
                                    func.name
                                );
                            } else {
                                var.loads.push(*inst);
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        let mut changed = false;
        for var in vars {
            let store = match var.store {
                Some(s) if !var.unoptimisable => s,
                _ => continue,
            };
            // Any use of the alloca besides the store and the loads means
            // its address escapes; leave it alone.
            if func.value(var.alloca).users.len() != var.loads.len() + 1 {
                continue;
            }

            let stored = match &func.value(store).kind {
                ValueKind::Store { value, .. } => *value,
                _ => unreachable!("recorded store is not a store"),
            };

            for load in var.loads {
                func.replace_uses(load, stored);
                func.remove_inst(load);
            }
            func.remove_inst(store);
            func.remove_inst(var.alloca);
            changed = true;
        }
        changed
    }
}
