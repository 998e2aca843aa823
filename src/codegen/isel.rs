//! x86-64 instruction selection.
//!
//! Rewrites each function in place: architecture-neutral opcodes become
//! x86-64 ones. Binary operations take the two-address form through their
//! destination register; comparisons produce flag-setting `cmp` plus
//! `setcc`/`movzx`, or fuse with an immediately following conditional jump
//! when the flag value has no other consumer.

use crate::error::{BasaltError, Result};
use crate::ir::CmpOp;
use crate::mir::{MFunction, MInst, MOpcode, MOperand};

use super::x86_64::reg;

pub fn select_instructions(mfunc: &mut MFunction) -> Result<()> {
    for bi in 0..mfunc.blocks.len() {
        let insts = std::mem::take(&mut mfunc.blocks[bi].insts);
        let mut out: Vec<MInst> = Vec::with_capacity(insts.len() * 2);
        let mut skip_next = false;

        for (i, inst) in insts.iter().enumerate() {
            if skip_next {
                skip_next = false;
                continue;
            }

            // cmp + condjump fuse into cmp + jcc when the comparison's only
            // use is the branch.
            if let MOpcode::Cmp(op) = inst.opcode {
                if let Some(next) = insts.get(i + 1) {
                    if next.opcode == MOpcode::CondJump
                        && next.operands[0] == inst.operands[2]
                        && operand_use_count(mfunc, &inst.operands[2], &insts) == 2
                    {
                        emit_cmp(
                            &inst.operands[0],
                            &inst.operands[1],
                            MOperand::reg(reg::RCX, 64),
                            &mut out,
                        );
                        out.push(MInst::new(
                            MOpcode::X86Jcc(op),
                            vec![next.operands[1].clone()],
                        ));
                        out.push(MInst::new(MOpcode::X86Jmp, vec![next.operands[2].clone()]));
                        skip_next = true;
                        continue;
                    }
                }
            }

            select_inst(inst, &mut out)?;
        }
        mfunc.blocks[bi].insts = out;
    }
    Ok(())
}

/// Occurrences of an operand anywhere in the function, counting the block
/// currently being rewritten from its pre-rewrite instruction list.
fn operand_use_count(mfunc: &MFunction, operand: &MOperand, current: &[MInst]) -> usize {
    let mut count = 0;
    mfunc.for_each_operand(|op| {
        if op == operand {
            count += 1;
        }
    });
    for inst in current {
        for op in &inst.operands {
            if op == operand {
                count += 1;
            }
        }
    }
    count
}

fn select_inst(inst: &MInst, out: &mut Vec<MInst>) -> Result<()> {
    let ops = &inst.operands;
    match inst.opcode {
        MOpcode::Copy => out.push(mov_or_lea(ops[0].clone(), ops[1].clone())),

        // Two-address arithmetic: mov lhs into dst, then op rhs into dst.
        MOpcode::Add => two_address(MOpcode::X86Add, ops, out),
        MOpcode::Sub => two_address(MOpcode::X86Sub, ops, out),
        MOpcode::And => two_address(MOpcode::X86And, ops, out),
        MOpcode::Or => two_address(MOpcode::X86Or, ops, out),
        MOpcode::Xor => two_address(MOpcode::X86Xor, ops, out),

        MOpcode::Mul => {
            out.push(mov_or_lea(ops[0].clone(), ops[2].clone()));
            match &ops[1] {
                imm @ MOperand::Immediate(_) => out.push(MInst::new(
                    MOpcode::X86Imul,
                    vec![imm.clone(), ops[2].clone(), ops[2].clone()],
                )),
                other => out.push(MInst::new(
                    MOpcode::X86Imul,
                    vec![other.clone(), ops[2].clone()],
                )),
            }
        }

        // Shift counts live in cl unless immediate.
        MOpcode::Shl | MOpcode::Shr | MOpcode::Sar => {
            let opcode = match inst.opcode {
                MOpcode::Shl => MOpcode::X86Shl,
                MOpcode::Shr => MOpcode::X86Shr,
                _ => MOpcode::X86Sar,
            };
            match &ops[1] {
                imm @ MOperand::Immediate(_) => {
                    out.push(mov_or_lea(ops[0].clone(), ops[2].clone()));
                    out.push(MInst::new(opcode, vec![imm.clone(), ops[2].clone()]));
                }
                count => {
                    out.push(MInst::new(
                        MOpcode::X86Mov,
                        vec![count.clone(), MOperand::reg(reg::RCX, 64)],
                    ));
                    out.push(mov_or_lea(ops[0].clone(), ops[2].clone()));
                    out.push(MInst::new(
                        opcode,
                        vec![MOperand::reg(reg::RCX, 8), ops[2].clone()],
                    ));
                }
            }
        }

        // Division pins rax/rdx: dividend in rax, cqo sign-extends into
        // rdx, idiv leaves the quotient in rax and the remainder in rdx.
        MOpcode::Div | MOpcode::Rem => {
            out.push(MInst::new(
                MOpcode::X86Mov,
                vec![ops[0].clone(), MOperand::reg(reg::RAX, 64)],
            ));
            out.push(MInst::new(MOpcode::X86Cqo, vec![]));
            let divisor = match &ops[1] {
                MOperand::Immediate(_) => {
                    out.push(MInst::new(
                        MOpcode::X86Mov,
                        vec![ops[1].clone(), ops[2].clone()],
                    ));
                    ops[2].clone()
                }
                other => other.clone(),
            };
            out.push(MInst::new(MOpcode::X86Idiv, vec![divisor]));
            let result = if inst.opcode == MOpcode::Div {
                MOperand::reg(reg::RAX, 64)
            } else {
                MOperand::reg(reg::RDX, 64)
            };
            out.push(MInst::new(MOpcode::X86Mov, vec![result, ops[2].clone()]));
        }

        MOpcode::Neg | MOpcode::Not => {
            let opcode = if inst.opcode == MOpcode::Neg {
                MOpcode::X86Neg
            } else {
                MOpcode::X86Not
            };
            out.push(mov_or_lea(ops[0].clone(), ops[1].clone()));
            out.push(MInst::new(opcode, vec![ops[1].clone()]));
        }

        MOpcode::ZeroExtend => {
            out.push(MInst::new(
                MOpcode::X86Movzx,
                vec![ops[0].clone(), ops[1].clone()],
            ));
        }
        MOpcode::SignExtend => {
            out.push(MInst::new(
                MOpcode::X86Movsx,
                vec![ops[0].clone(), ops[1].clone()],
            ));
        }
        MOpcode::Truncate | MOpcode::Bitcast => {
            out.push(MInst::new(
                MOpcode::X86Mov,
                vec![ops[0].clone(), ops[1].clone()],
            ));
        }

        MOpcode::Load => out.push(MInst::new(
            MOpcode::X86MovFromMem,
            vec![ops[0].clone(), ops[1].clone()],
        )),
        MOpcode::Store => out.push(MInst::new(
            MOpcode::X86MovToMem,
            vec![ops[0].clone(), ops[1].clone()],
        )),
        MOpcode::Alloca => out.push(MInst::new(
            MOpcode::X86Lea,
            vec![ops[0].clone(), ops[1].clone()],
        )),

        // Standalone comparison materialises the flag into a byte.
        MOpcode::Cmp(op) => {
            let dst = ops[2].clone();
            let (dst_id, dst_size) = match &dst {
                MOperand::Register { id, size_bits } => (*id, *size_bits),
                other => unreachable!("comparison destination {} is not a register", other),
            };
            emit_cmp(&ops[0], &ops[1], MOperand::reg(dst_id, 64), out);
            let byte = MOperand::reg(dst_id, 8);
            out.push(MInst::new(MOpcode::X86Setcc(op), vec![byte.clone()]));
            if dst_size > 8 {
                out.push(MInst::new(MOpcode::X86Movzx, vec![byte, dst]));
            }
        }

        MOpcode::Jump => out.push(MInst::new(MOpcode::X86Jmp, vec![ops[0].clone()])),
        MOpcode::CondJump => {
            // test cond, cond; jz else; jmp then
            out.push(MInst::new(
                MOpcode::X86Test,
                vec![ops[0].clone(), ops[0].clone()],
            ));
            out.push(MInst::new(MOpcode::X86Jz, vec![ops[2].clone()]));
            out.push(MInst::new(MOpcode::X86Jmp, vec![ops[1].clone()]));
        }
        MOpcode::Call => out.push(MInst::new(MOpcode::X86Call, vec![ops[0].clone()])),
        // The emitter tears the frame down before a jump that leaves the
        // function.
        MOpcode::TailCall => out.push(MInst::new(MOpcode::X86Jmp, vec![ops[0].clone()])),
        MOpcode::Return => out.push(MInst::new(MOpcode::X86Ret, vec![])),
        MOpcode::Unreachable => out.push(MInst::new(MOpcode::Unreachable, vec![])),

        op if op.is_machine() => out.push(inst.clone()),
        other => {
            return Err(BasaltError::CodegenError(format!(
                "instruction selection cannot handle opcode {}",
                other
            )))
        }
    }
    Ok(())
}

/// Emit a flag-setting comparison of `lhs` against `rhs`. An immediate on
/// the left first materialises into `scratch` since `cmp` cannot take an
/// immediate as its second AT&T operand.
fn emit_cmp(lhs: &MOperand, rhs: &MOperand, scratch: MOperand, out: &mut Vec<MInst>) {
    if matches!(lhs, MOperand::Immediate(_)) {
        out.push(MInst::new(
            MOpcode::X86Mov,
            vec![lhs.clone(), scratch.clone()],
        ));
        out.push(MInst::new(
            MOpcode::X86CmpInst,
            vec![rhs.clone(), scratch],
        ));
    } else {
        out.push(MInst::new(
            MOpcode::X86CmpInst,
            vec![rhs.clone(), lhs.clone()],
        ));
    }
}

/// A plain copy, except that address-valued operands (globals, function
/// symbols) materialise through lea.
fn mov_or_lea(src: MOperand, dst: MOperand) -> MInst {
    match src {
        MOperand::Global(_) | MOperand::Function(_) => {
            MInst::new(MOpcode::X86Lea, vec![src, dst])
        }
        _ => MInst::new(MOpcode::X86Mov, vec![src, dst]),
    }
}

fn two_address(opcode: MOpcode, ops: &[MOperand], out: &mut Vec<MInst>) {
    out.push(mov_or_lea(ops[0].clone(), ops[2].clone()));
    out.push(MInst::new(opcode, vec![ops[1].clone(), ops[2].clone()]));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::lower::lower_function;
    use crate::ir::builder::FunctionBuilder;
    use crate::ir::{BinaryOp, CmpOp, Type};
    use crate::target::Target;

    fn i64t() -> Type {
        Type::Integer(64)
    }

    fn lowered(f: &crate::ir::Function) -> MFunction {
        let mut m = lower_function(f, Target::X86_64Linux).unwrap();
        select_instructions(&mut m).unwrap();
        m
    }

    #[test]
    fn test_everything_is_machine_code() {
        let mut b = FunctionBuilder::new("f", Type::func(i64t(), vec![i64t()]));
        b.block("entry");
        let x = b.param(0);
        let eight = b.imm(8, i64t());
        let q = b.binary(BinaryOp::Div, i64t(), x, eight);
        b.ret(Some(q));
        let m = lowered(&b.build());

        for block in &m.blocks {
            for inst in &block.insts {
                assert!(
                    inst.opcode.is_machine() || inst.opcode == MOpcode::Unreachable,
                    "generic opcode {} survived isel",
                    inst.opcode
                );
            }
        }
    }

    #[test]
    fn test_add_becomes_two_address() {
        let mut b = FunctionBuilder::new("f", Type::func(i64t(), vec![i64t()]));
        b.block("entry");
        let x = b.param(0);
        let one = b.imm(1, i64t());
        let sum = b.binary(BinaryOp::Add, i64t(), x, one);
        b.ret(Some(sum));
        let m = lowered(&b.build());

        let insts = &m.blocks[0].insts;
        let add_at = insts
            .iter()
            .position(|i| i.opcode == MOpcode::X86Add)
            .expect("no add emitted");
        assert_eq!(insts[add_at].operands[0], MOperand::Immediate(1));
        // mov lhs into dst directly precedes it.
        assert_eq!(insts[add_at - 1].opcode, MOpcode::X86Mov);
        assert_eq!(insts[add_at - 1].operands[1], insts[add_at].operands[1]);
    }

    #[test]
    fn test_cmp_branch_fusion() {
        let mut b = FunctionBuilder::new("f", Type::func(i64t(), vec![i64t()]));
        let entry = b.block("entry");
        let yes = b.block("yes");
        let no = b.block("no");
        b.switch_to(entry);
        let x = b.param(0);
        let zero = b.imm(0, i64t());
        let c = b.cmp(CmpOp::SLt, x, zero);
        b.cond_branch(c, yes, no);
        b.switch_to(yes);
        let one = b.imm(1, i64t());
        b.ret(Some(one));
        b.switch_to(no);
        let two = b.imm(2, i64t());
        b.ret(Some(two));
        let m = lowered(&b.build());

        let insts = &m.blocks[0].insts;
        // Fused: no setcc, no test; cmp then jcc then jmp.
        assert!(insts.iter().all(|i| !matches!(i.opcode, MOpcode::X86Setcc(_))));
        assert!(insts.iter().all(|i| i.opcode != MOpcode::X86Test));
        let cmp_at = insts
            .iter()
            .position(|i| i.opcode == MOpcode::X86CmpInst)
            .unwrap();
        assert_eq!(insts[cmp_at + 1].opcode, MOpcode::X86Jcc(CmpOp::SLt));
        assert_eq!(insts[cmp_at + 2].opcode, MOpcode::X86Jmp);
    }

    #[test]
    fn test_cmp_with_extra_use_not_fused() {
        let mut b = FunctionBuilder::new("f", Type::func(i64t(), vec![i64t()]));
        let entry = b.block("entry");
        let yes = b.block("yes");
        let no = b.block("no");
        b.switch_to(entry);
        let x = b.param(0);
        let zero = b.imm(0, i64t());
        let c = b.cmp(CmpOp::Eq, x, zero);
        b.cond_branch(c, yes, no);
        b.switch_to(yes);
        let wide = b.unary(crate::ir::UnaryOp::ZeroExtend, i64t(), c);
        b.ret(Some(wide));
        b.switch_to(no);
        let two = b.imm(2, i64t());
        b.ret(Some(two));
        let m = lowered(&b.build());

        // The flag value escapes, so a setcc must exist somewhere.
        let any_setcc = m
            .blocks
            .iter()
            .flat_map(|b| b.insts.iter())
            .any(|i| matches!(i.opcode, MOpcode::X86Setcc(_)));
        assert!(any_setcc);
    }
}
