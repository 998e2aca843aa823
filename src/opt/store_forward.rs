//! Block-local store forwarding.
//!
//! Within one block, a load from a local alloca that follows a store to the
//! same alloca reads the stored value directly. A store that is shadowed by
//! a later store with no intervening use of the slot is erased. The table
//! resets at block boundaries.

use super::{ProgramInfo, Transform};
use crate::ir::{Function, ValueId, ValueKind};

pub struct StoreForwarding;

impl Transform for StoreForwarding {
    fn name(&self) -> &'static str {
        "store_forwarding"
    }

    fn description(&self) -> &'static str {
        "Forward block-local stores to loads and erase shadowed stores"
    }

    fn apply(&self, func: &mut Function, _info: &ProgramInfo) -> bool {
        let mut changed = false;

        for block in func.layout.clone() {
            // alloca -> most recent store to it in this block
            let mut table: Vec<(ValueId, ValueId)> = Vec::new();

            for inst in func.block(block).insts.clone() {
                match func.value(inst).kind.clone() {
                    ValueKind::Store { ptr, .. } => {
                        if !matches!(func.value(ptr).kind, ValueKind::Alloca { .. }) {
                            continue;
                        }
                        match table.iter_mut().find(|(a, _)| *a == ptr) {
                            Some(entry) => {
                                let prev = entry.1;
                                if !slot_used_between(func, block, ptr, prev, inst) {
                                    entry.1 = inst;
                                    func.remove_inst(prev);
                                    changed = true;
                                } else {
                                    entry.1 = inst;
                                }
                            }
                            None => table.push((ptr, inst)),
                        }
                    }
                    ValueKind::Load { ptr } => {
                        if let Some((_, store)) = table.iter().find(|(a, _)| *a == ptr) {
                            let stored = match &func.value(*store).kind {
                                ValueKind::Store { value, .. } => *value,
                                _ => unreachable!("table entry is not a store"),
                            };
                            func.replace_uses(inst, stored);
                            func.remove_inst(inst);
                            changed = true;
                        }
                    }
                    _ => {}
                }
            }
        }
        changed
    }
}

/// Is the alloca used by any instruction strictly between `from` and `to`
/// within `block`? Checked by scanning the alloca's user list.
fn slot_used_between(
    func: &Function,
    block: crate::ir::BlockId,
    alloca: ValueId,
    from: ValueId,
    to: ValueId,
) -> bool {
    let insts = &func.block(block).insts;
    let from_pos = insts.iter().position(|i| *i == from);
    let to_pos = insts.iter().position(|i| *i == to);
    let (from_pos, to_pos) = match (from_pos, to_pos) {
        (Some(a), Some(b)) if a < b => (a, b),
        _ => return true,
    };
    insts[from_pos + 1..to_pos]
        .iter()
        .any(|i| func.value(alloca).users.contains(i))
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
    fn test_forwards_load() {
        // Two stores make the slot ineligible for mem2reg; the second store
        // still forwards to the load.
        let mut b = FunctionBuilder::new("f", Type::func(i64t(), vec![i64t(), i64t()]));
        b.block("entry");
        let x = b.param(0);
        let y = b.param(1);
        let a = b.alloca(i64t());
        b.store(x, a);
        b.store(y, a);
        let loaded = b.load(i64t(), a);
        let ret = b.ret(Some(loaded));
        let mut f = b.build();

        assert!(StoreForwarding.apply(&mut f, &ProgramInfo::default()));
        match &f.value(ret).kind {
            ValueKind::Return { value: Some(v) } => assert_eq!(*v, y),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_erases_shadowed_store() {
        let mut b = FunctionBuilder::new("f", Type::func(Type::Void, vec![i64t(), i64t()]));
        b.block("entry");
        let x = b.param(0);
        let y = b.param(1);
        let a = b.alloca(i64t());
        let first = b.store(x, a);
        b.store(y, a);
        b.ret(None);
        let mut f = b.build();

        assert!(StoreForwarding.apply(&mut f, &ProgramInfo::default()));
        assert_eq!(f.value(first).kind, ValueKind::Removed);
        crate::ir::verify::verify_function(&f).unwrap();
    }

    #[test]
    fn test_forwarded_load_unshadows_store() {
        // The load between the stores is forwarded first; after that the
        // first store has no remaining reader and is erased too.
        let mut b = FunctionBuilder::new("f", Type::func(i64t(), vec![i64t(), i64t()]));
        b.block("entry");
        let x = b.param(0);
        let y = b.param(1);
        let a = b.alloca(i64t());
        let first = b.store(x, a);
        let mid = b.load(i64t(), a);
        b.store(y, a);
        let ret = b.ret(Some(mid));
        let mut f = b.build();

        assert!(StoreForwarding.apply(&mut f, &ProgramInfo::default()));
        assert_eq!(f.value(first).kind, ValueKind::Removed);
        match &f.value(ret).kind {
            ValueKind::Return { value: Some(v) } => assert_eq!(*v, x),
            other => panic!("unexpected {:?}", other),
        }
        crate::ir::verify::verify_function(&f).unwrap();
    }

    #[test]
    fn test_no_cross_block_forwarding() {
        let mut b = FunctionBuilder::new("f", Type::func(i64t(), vec![i64t()]));
        let entry = b.block("entry");
        let exit = b.block("exit");
        b.switch_to(entry);
        let x = b.param(0);
        let a = b.alloca(i64t());
        b.store(x, a);
        b.branch(exit);
        b.switch_to(exit);
        let loaded = b.load(i64t(), a);
        b.ret(Some(loaded));
        let mut f = b.build();

        assert!(!StoreForwarding.apply(&mut f, &ProgramInfo::default()));
        assert!(matches!(f.value(loaded).kind, ValueKind::Load { .. }));
    }
}
