//! IR to MIR lowering.
//!
//! Two sub-passes over each function: virtual-register assignment (every
//! value, block and the function itself receives a fresh id) and opcode
//! mapping. Phis are resolved into copies placed along predecessor edges;
//! calls get explicit argument-register moves; returns target the virtual
//! RETURN register that allocation later replaces.

use std::collections::HashMap;

use crate::error::{BasaltError, Result};
use crate::ir::{self, Callee, IntrinsicKind, Type, UnaryOp, ValueId, ValueKind};
use crate::mir::{MBlock, MFunction, MInst, MOpcode, MOperand, RETURN_REG, VREG_BASE};
use crate::target::Target;

use super::x86_64::{SYSV_ARG_REGS, WIN64_ARG_REGS};

/// Register access size in bits for a type.
pub fn size_bits(ty: &Type) -> u16 {
    match ty.bits() {
        0 => 64,
        b if b <= 8 => 8,
        b if b <= 16 => 16,
        b if b <= 32 => 32,
        _ => 64,
    }
}

pub fn arg_regs(target: Target) -> &'static [u32] {
    if target.is_windows() {
        WIN64_ARG_REGS
    } else {
        SYSV_ARG_REGS
    }
}

struct Lowering<'a> {
    func: &'a ir::Function,
    target: Target,
    next_id: u32,
    vregs: HashMap<ValueId, u32>,
    block_ids: HashMap<ir::BlockId, u32>,
}

impl<'a> Lowering<'a> {
    fn fresh(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn vreg(&mut self, value: ValueId) -> u32 {
        if let Some(id) = self.vregs.get(&value) {
            return *id;
        }
        let id = self.fresh();
        self.vregs.insert(value, id);
        id
    }

    fn reg_of(&mut self, value: ValueId) -> MOperand {
        let size = size_bits(&self.func.value(value).ty);
        let id = self.vreg(value);
        MOperand::reg(id, size)
    }

    /// Convert an IR operand edge into a machine operand.
    fn operand(&mut self, value: ValueId) -> MOperand {
        match &self.func.value(value).kind {
            ValueKind::Immediate(v) => MOperand::Immediate(*v),
            ValueKind::StaticRef(name) => MOperand::Global(name.clone()),
            ValueKind::FuncRef(name) => MOperand::Function(name.clone()),
            _ => self.reg_of(value),
        }
    }

    fn label(&self, block: ir::BlockId) -> MOperand {
        MOperand::Label(self.block_ids[&block])
    }
}

pub fn lower_function(func: &ir::Function, target: Target) -> Result<MFunction> {
    let mut lowering = Lowering {
        func,
        target,
        next_id: VREG_BASE,
        vregs: HashMap::new(),
        block_ids: HashMap::new(),
    };
    // The function itself takes the first id of the range.
    let _fn_id = lowering.fresh();

    let mut mfunc = MFunction::new(func.name.clone());
    for block in &func.layout {
        let id = lowering.fresh();
        lowering.block_ids.insert(*block, id);
        mfunc.blocks.push(MBlock::new(id, func.block(*block).name.clone()));
    }

    // Parameters arrive in the argument registers and are copied into
    // their vregs at the top of the entry block.
    let regs = arg_regs(target);
    if func.params.len() > regs.len() {
        return Err(BasaltError::CodegenError(format!(
            "@{}: more than {} parameters is not supported",
            func.name,
            regs.len()
        )));
    }
    for (i, param) in func.params.iter().enumerate() {
        let size = size_bits(&func.value(*param).ty);
        let dst = lowering.reg_of(*param);
        mfunc.blocks[0].push(MInst::new(
            MOpcode::Copy,
            vec![MOperand::reg(regs[i], size), dst],
        ));
    }

    for (bi, block) in func.layout.iter().enumerate() {
        for inst in &func.block(*block).insts {
            lower_inst(&mut lowering, &mut mfunc, bi, *inst)?;
        }
    }

    resolve_phis(&mut lowering, &mut mfunc);
    Ok(mfunc)
}

fn lower_inst(
    lowering: &mut Lowering<'_>,
    mfunc: &mut MFunction,
    bi: usize,
    inst: ValueId,
) -> Result<()> {
    let func = lowering.func;
    let kind = func.value(inst).kind.clone();
    let mut push = |mfunc: &mut MFunction, i: MInst| mfunc.blocks[bi].push(i);

    match kind {
        // Not instructions, or handled elsewhere.
        ValueKind::Immediate(_)
        | ValueKind::StaticRef(_)
        | ValueKind::FuncRef(_)
        | ValueKind::Parameter(_)
        | ValueKind::Removed => {}
        // Phis only reserve their vreg here; predecessors get the copies.
        ValueKind::Phi { .. } => {
            let _ = lowering.reg_of(inst);
        }

        ValueKind::Alloca { allocated } => {
            let slot = mfunc.add_frame_slot(allocated.bytes().max(1));
            let dst = lowering.reg_of(inst);
            push(mfunc, MInst::new(MOpcode::Alloca, vec![MOperand::Local(slot), dst]));
        }
        ValueKind::Load { ptr } => {
            let addr = lowering.operand(ptr);
            let dst = lowering.reg_of(inst);
            push(mfunc, MInst::new(MOpcode::Load, vec![addr, dst]));
        }
        ValueKind::Store { value, ptr } => {
            let src = lowering.operand(value);
            let addr = lowering.operand(ptr);
            push(mfunc, MInst::new(MOpcode::Store, vec![src, addr]));
        }
        ValueKind::GetElemPtr { ptr, index, elem_ty } => {
            let idx = lowering.operand(index);
            let scaled = MOperand::reg(lowering.fresh(), 64);
            let base = lowering.operand(ptr);
            let dst = lowering.reg_of(inst);
            push(
                mfunc,
                MInst::new(
                    MOpcode::Mul,
                    vec![idx, MOperand::Immediate(elem_ty.bytes()), scaled.clone()],
                ),
            );
            push(mfunc, MInst::new(MOpcode::Add, vec![base, scaled, dst]));
        }
        ValueKind::Copy { value } => {
            let src = lowering.operand(value);
            let dst = lowering.reg_of(inst);
            push(mfunc, MInst::new(MOpcode::Copy, vec![src, dst]));
        }
        ValueKind::Intrinsic { intrinsic, args } => match intrinsic {
            IntrinsicKind::MemCopy => {
                lower_call_like(lowering, mfunc, bi, None, &args, None, false, Some("memcpy"))?;
            }
        },
        ValueKind::Call {
            callee,
            args,
            tail_call,
        } => {
            let ret = if func.value(inst).ty.is_void() {
                None
            } else {
                Some(inst)
            };
            match callee {
                Callee::Direct(name) => {
                    lower_call_like(lowering, mfunc, bi, None, &args, ret, tail_call, Some(&name))?
                }
                Callee::Indirect(target) => {
                    lower_call_like(lowering, mfunc, bi, Some(target), &args, ret, tail_call, None)?
                }
            }
        }

        ValueKind::Branch { target } => {
            let label = lowering.label(target);
            push(mfunc, MInst::new(MOpcode::Jump, vec![label]));
        }
        ValueKind::CondBranch {
            cond,
            then_block,
            else_block,
        } => {
            let c = lowering.operand(cond);
            let t = lowering.label(then_block);
            let e = lowering.label(else_block);
            push(mfunc, MInst::new(MOpcode::CondJump, vec![c, t, e]));
        }
        ValueKind::Return { value } => {
            if let Some(v) = value {
                let size = size_bits(&func.value(v).ty);
                let src = lowering.operand(v);
                push(
                    mfunc,
                    MInst::new(MOpcode::Copy, vec![src, MOperand::reg(RETURN_REG, size)]),
                );
            }
            push(mfunc, MInst::new(MOpcode::Return, vec![]));
        }
        ValueKind::Unreachable => {
            push(mfunc, MInst::new(MOpcode::Unreachable, vec![]));
        }

        ValueKind::Unary { op, operand } => {
            let src = lowering.operand(operand);
            let dst = lowering.reg_of(inst);
            let opcode = match op {
                UnaryOp::Neg => MOpcode::Neg,
                UnaryOp::Not => MOpcode::Not,
                UnaryOp::ZeroExtend => MOpcode::ZeroExtend,
                UnaryOp::SignExtend => MOpcode::SignExtend,
                UnaryOp::Truncate => MOpcode::Truncate,
                UnaryOp::Bitcast => MOpcode::Bitcast,
            };
            push(mfunc, MInst::new(opcode, vec![src, dst]));
        }
        ValueKind::Binary { op, lhs, rhs } => {
            let l = lowering.operand(lhs);
            let r = lowering.operand(rhs);
            let dst = lowering.reg_of(inst);
            let opcode = match op {
                ir::BinaryOp::Add => MOpcode::Add,
                ir::BinaryOp::Sub => MOpcode::Sub,
                ir::BinaryOp::Mul => MOpcode::Mul,
                ir::BinaryOp::Div => MOpcode::Div,
                ir::BinaryOp::Rem => MOpcode::Rem,
                ir::BinaryOp::Shl => MOpcode::Shl,
                ir::BinaryOp::Shr => MOpcode::Shr,
                ir::BinaryOp::Sar => MOpcode::Sar,
                ir::BinaryOp::And => MOpcode::And,
                ir::BinaryOp::Or => MOpcode::Or,
                ir::BinaryOp::Xor => MOpcode::Xor,
            };
            push(mfunc, MInst::new(opcode, vec![l, r, dst]));
        }
        ValueKind::Compare { op, lhs, rhs } => {
            let l = lowering.operand(lhs);
            let r = lowering.operand(rhs);
            let dst = lowering.reg_of(inst);
            push(mfunc, MInst::new(MOpcode::Cmp(op), vec![l, r, dst]));
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn lower_call_like(
    lowering: &mut Lowering<'_>,
    mfunc: &mut MFunction,
    bi: usize,
    indirect: Option<ValueId>,
    args: &[ValueId],
    ret: Option<ValueId>,
    tail_call: bool,
    direct: Option<&str>,
) -> Result<()> {
    let regs = arg_regs(lowering.target);
    if args.len() > regs.len() {
        return Err(BasaltError::CodegenError(format!(
            "call with more than {} arguments is not supported",
            regs.len()
        )));
    }
    for (i, arg) in args.iter().enumerate() {
        let size = size_bits(&lowering.func.value(*arg).ty);
        let src = lowering.operand(*arg);
        mfunc.blocks[bi].push(MInst::new(
            MOpcode::Copy,
            vec![src, MOperand::reg(regs[i], size)],
        ));
    }
    let target = match (direct, indirect) {
        (Some(name), _) => MOperand::Function(name.to_string()),
        (None, Some(v)) => lowering.operand(v),
        (None, None) => unreachable!("call without a target"),
    };
    let opcode = if tail_call { MOpcode::TailCall } else { MOpcode::Call };
    mfunc.blocks[bi].push(MInst::new(opcode, vec![target]));
    if let Some(ret) = ret {
        if !tail_call {
            let size = size_bits(&lowering.func.value(ret).ty);
            let dst = lowering.reg_of(ret);
            mfunc.blocks[bi].push(MInst::new(
                MOpcode::Copy,
                vec![MOperand::reg(RETURN_REG, size), dst],
            ));
        }
    }
    Ok(())
}

/// Place a copy for each phi incoming at the end of the predecessor block,
/// just before its terminator.
fn resolve_phis(lowering: &mut Lowering<'_>, mfunc: &mut MFunction) {
    let func = lowering.func;
    let mut copies: Vec<(usize, MInst)> = Vec::new();

    for block in &func.layout {
        for inst in &func.block(*block).insts {
            let incoming = match &func.value(*inst).kind {
                ValueKind::Phi { incoming } => incoming.clone(),
                _ => continue,
            };
            let size = size_bits(&func.value(*inst).ty);
            let dst_id = lowering.vreg(*inst);
            for (pred, value) in incoming {
                let pi = match func.layout.iter().position(|b| *b == pred) {
                    Some(p) => p,
                    // Stale edge from a block that no longer flows here.
                    None => continue,
                };
                let src = lowering.operand(value);
                copies.push((
                    pi,
                    MInst::new(MOpcode::Copy, vec![src, MOperand::reg(dst_id, size)]),
                ));
            }
        }
    }

    for (pi, copy) in copies {
        let block = &mut mfunc.blocks[pi];
        let at = block
            .insts
            .iter()
            .position(|i| i.opcode.is_terminator())
            .unwrap_or(block.insts.len());
        block.insts.insert(at, copy);
    }
}
