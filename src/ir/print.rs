//! Textual rendering of IR instructions.
//!
//! Operands print as `%vN` (arena index), immediates and refs inline. The
//! output is accepted back by the parser, which is what `--ast` shows for
//! textual IR input.

use super::function::Function;
use super::value::{Callee, ValueId, ValueKind};

/// Render an operand the way it appears in instruction position.
pub fn operand_to_string(func: &Function, id: ValueId) -> String {
    match &func.value(id).kind {
        ValueKind::Immediate(v) => format!("{}", *v as i64),
        ValueKind::StaticRef(name) => format!("@{}", name),
        ValueKind::FuncRef(name) => format!("@{}", name),
        _ => format!("{}", id),
    }
}

/// Render one instruction.
pub fn inst_to_string(func: &Function, id: ValueId) -> String {
    let value = func.value(id);
    let op = |v: ValueId| operand_to_string(func, v);
    match &value.kind {
        ValueKind::Immediate(v) => format!("{} = const {} {}", id, value.ty, *v as i64),
        ValueKind::StaticRef(name) => format!("{} = globalref @{}", id, name),
        ValueKind::FuncRef(name) => format!("{} = funcref @{}", id, name),
        ValueKind::Parameter(i) => format!("{} = param {}", id, i),
        ValueKind::Alloca { allocated } => format!("{} = alloca {}", id, allocated),
        ValueKind::Load { ptr } => format!("{} = load {}, {}", id, value.ty, op(*ptr)),
        ValueKind::Store { value: v, ptr } => {
            format!("store {} {}, {}", func.value(*v).ty, op(*v), op(*ptr))
        }
        ValueKind::GetElemPtr { ptr, index, elem_ty } => {
            format!("{} = gep {}, {}, {}", id, elem_ty, op(*ptr), op(*index))
        }
        ValueKind::Copy { value: v } => format!("{} = copy {}", id, op(*v)),
        ValueKind::Intrinsic { intrinsic, args } => {
            let args: Vec<_> = args.iter().map(|a| op(*a)).collect();
            format!("{}({})", intrinsic, args.join(", "))
        }
        ValueKind::Call {
            callee,
            args,
            tail_call,
        } => {
            let args: Vec<_> = args.iter().map(|a| op(*a)).collect();
            let callee = match callee {
                Callee::Direct(name) => format!("@{}", name),
                Callee::Indirect(v) => op(*v),
            };
            let tail = if *tail_call { "tail " } else { "" };
            if value.ty.is_void() {
                format!("{}call {}({})", tail, callee, args.join(", "))
            } else {
                format!(
                    "{} = {}call {} {}({})",
                    id,
                    tail,
                    value.ty,
                    callee,
                    args.join(", ")
                )
            }
        }
        ValueKind::Phi { incoming } => {
            let args: Vec<_> = incoming
                .iter()
                .map(|(b, v)| format!("[{}, {}]", op(*v), func.block(*b).name))
                .collect();
            format!("{} = phi {} {}", id, value.ty, args.join(", "))
        }
        ValueKind::Branch { target } => format!("branch {}", func.block(*target).name),
        ValueKind::CondBranch {
            cond,
            then_block,
            else_block,
        } => format!(
            "condbranch {}, {}, {}",
            op(*cond),
            func.block(*then_block).name,
            func.block(*else_block).name
        ),
        ValueKind::Return { value: Some(v) } => format!("return {}", op(*v)),
        ValueKind::Return { value: None } => "return".to_string(),
        ValueKind::Unreachable => "unreachable".to_string(),
        ValueKind::Unary { op: uop, operand } => {
            format!("{} = {} {} to {}", id, uop, op(*operand), value.ty)
        }
        ValueKind::Binary { op: bop, lhs, rhs } => {
            format!("{} = {} {} {}, {}", id, bop, value.ty, op(*lhs), op(*rhs))
        }
        ValueKind::Compare { op: cop, lhs, rhs } => format!(
            "{} = cmp {} {} {}, {}",
            id,
            cop,
            func.value(*lhs).ty,
            op(*lhs),
            op(*rhs)
        ),
        ValueKind::Removed => format!("{} = <removed>", id),
    }
}
