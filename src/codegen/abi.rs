//! x86-64 ABI lowering on the IR.
//!
//! Runs after optimisation and before opcode mapping. Rewrites functions
//! whose return type does not fit the return register: on Linux a value of
//! 9..=16 bytes travels in two registers and the IR is left alone;
//! anything larger gets a hidden pointer parameter and its returns become
//! memcpys. Oversized loads are paired with their consuming store into a
//! single memcpy, or degrade to a copy of the source pointer.

use crate::error::Result;
use crate::ir::{Function, IntrinsicKind, Module, Type, ValueId, ValueKind};
use crate::target::Target;

pub fn lower_module(module: &mut Module, target: Target) -> Result<()> {
    for func in module.functions.values_mut() {
        if func.is_definition() {
            lower_function(func, target);
        }
    }
    Ok(())
}

fn lower_function(func: &mut Function, target: Target) {
    let ret_bytes = func.return_type().bytes();
    let two_reg = target.is_linux() && ret_bytes > 8 && ret_bytes <= 16;
    let large = ret_bytes > 8 && !two_reg;

    // Hidden sret parameter, stored into a slot at function entry so each
    // return can pick it up regardless of control flow.
    let ret_slot = if large { Some(add_sret_param(func)) } else { None };

    for block in func.layout.clone() {
        for inst in func.block(block).insts.clone() {
            match func.value(inst).kind.clone() {
                ValueKind::Return { value: Some(v) } if large => {
                    let slot = ret_slot.expect("sret slot missing");
                    let at = func
                        .block(block)
                        .insts
                        .iter()
                        .position(|i| *i == inst)
                        .expect("return not in its block");
                    assert!(
                        func.value(v).ty.is_ptr(),
                        "large return operand is not a pointer"
                    );
                    let dest = func.insert_inst(
                        block,
                        at,
                        ValueKind::Load { ptr: slot },
                        Type::Ptr,
                    );
                    let n = func.new_value(
                        ValueKind::Immediate(ret_bytes),
                        Type::Integer(64),
                    );
                    func.insert_inst(
                        block,
                        at + 1,
                        ValueKind::Intrinsic {
                            intrinsic: IntrinsicKind::MemCopy,
                            args: vec![dest, v, n],
                        },
                        Type::Void,
                    );
                    func.remove_use(v, inst);
                    func.value_mut(inst).kind = ValueKind::Return { value: None };
                }

                ValueKind::Load { ptr } if func.value(inst).ty.bytes() > 8 => {
                    lower_large_load(func, inst, ptr);
                }

                _ => {}
            }
        }
    }
}

/// Prepend the hidden pointer parameter, renumber the others, and stash it
/// in an entry-block slot. Returns the slot's alloca.
fn add_sret_param(func: &mut Function) -> ValueId {
    if let Type::Function { params, .. } = &mut func.ty {
        params.insert(0, Type::Ptr);
    }
    let hidden = func.new_value(ValueKind::Parameter(0), Type::Ptr);
    for param in func.params.clone() {
        if let ValueKind::Parameter(i) = &mut func.value_mut(param).kind {
            *i += 1;
        }
    }
    func.params.insert(0, hidden);

    let entry = func.entry();
    let slot = func.insert_inst(
        entry,
        0,
        ValueKind::Alloca {
            allocated: Type::Ptr,
        },
        Type::Ptr,
    );
    func.insert_inst(
        entry,
        1,
        ValueKind::Store {
            value: hidden,
            ptr: slot,
        },
        Type::Void,
    );
    slot
}

/// A load wider than a register either fuses with its single consuming
/// store into a memcpy, or is rewritten so consumers observe the pointer.
fn lower_large_load(func: &mut Function, load: ValueId, ptr: ValueId) {
    let users = func.value(load).users.clone();
    let store_user = match users.as_slice() {
        [only] => match &func.value(*only).kind {
            ValueKind::Store { value, ptr: dst } if *value == load => Some((*only, *dst)),
            _ => None,
        },
        _ => None,
    };

    if let Some((store, dst)) = store_user {
        let bytes = func.value(load).ty.bytes();
        // Retire the store first; severing its operand edges leaves the
        // load user-free, so it can be rebuilt in place as the memcpy.
        func.remove_inst(store);

        let n = func.new_value(ValueKind::Immediate(bytes), Type::Integer(64));
        func.value_mut(load).kind = ValueKind::Intrinsic {
            intrinsic: IntrinsicKind::MemCopy,
            args: vec![dst, ptr, n],
        };
        func.value_mut(load).ty = Type::Void;
        func.value_mut(dst).users.push(load);
        func.value_mut(n).users.push(load);
        // `ptr` was already a recorded operand of the load.
    } else {
        // Callers of the load observe the pointer instead.
        func.value_mut(load).kind = ValueKind::Copy { value: ptr };
        func.value_mut(load).ty = Type::Ptr;
    }
}
