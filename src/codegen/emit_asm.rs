//! GNU AS AT&T assembly emission.
//!
//! Consumes finalised (post-RA) MIR. Every operand is physical by now;
//! frame locals become rbp-relative, globals RIP-relative. Callee-saved
//! registers touched by spill traffic are preserved in a dedicated save
//! area below the frame slots.

use std::io::Write;

use crate::error::{BasaltError, Result};
use crate::ir::{self, CmpOp, GlobalInit};
use crate::mir::{MFunction, MInst, MOpcode, MOperand};

use super::frame::Frame;
use super::regalloc::MachineDescription;
use super::x86_64::name;

pub fn emit_assembly<W: Write>(
    writer: &mut W,
    module: &ir::Module,
    _desc: &MachineDescription,
    mfuncs: &[MFunction],
) -> Result<()> {
    emit_globals(writer, module)?;

    writeln!(writer, ".text")?;
    for mfunc in mfuncs {
        writeln!(writer, ".globl {}", mfunc.name)?;
        emit_function(writer, mfunc)?;
    }
    Ok(())
}

fn emit_globals<W: Write>(writer: &mut W, module: &ir::Module) -> Result<()> {
    let (init, uninit): (Vec<_>, Vec<_>) = module
        .globals
        .values()
        .partition(|g| g.init.is_some());

    if !init.is_empty() {
        writeln!(writer, ".data")?;
        for global in init {
            writeln!(writer, ".align 8")?;
            writeln!(writer, "{}:", global.name)?;
            match global.init.as_ref().expect("partitioned on init") {
                GlobalInit::Int(v) => writeln!(writer, "  .quad {}", *v as i64)?,
                GlobalInit::FuncRef(f) => writeln!(writer, "  .quad {}", f)?,
                GlobalInit::Bytes(bytes) => {
                    for b in bytes {
                        writeln!(writer, "  .byte {}", b)?;
                    }
                }
            }
        }
    }
    if !uninit.is_empty() {
        writeln!(writer, ".bss")?;
        for global in uninit {
            writeln!(writer, ".align 8")?;
            writeln!(writer, "{}:", global.name)?;
            writeln!(writer, "  .zero {}", global.ty.bytes().max(1))?;
        }
    }
    Ok(())
}

fn emit_function<W: Write>(writer: &mut W, mfunc: &MFunction) -> Result<()> {
    let frame = Frame::of(mfunc);

    writeln!(writer, "{}:", mfunc.name)?;
    writeln!(writer, "  pushq %rbp")?;
    writeln!(writer, "  movq %rsp, %rbp")?;
    if frame.total > 0 {
        writeln!(writer, "  subq ${}, %rsp", frame.total)?;
    }
    for (r, off) in &frame.saved {
        writeln!(writer, "  movq %{}, {}(%rbp)", name(*r, 64), off)?;
    }

    for block in &mfunc.blocks {
        writeln!(writer, "{}:", block_label(mfunc, block.id))?;
        for inst in &block.insts {
            emit_inst(writer, mfunc, &frame, inst)?;
        }
    }
    Ok(())
}

fn emit_epilogue<W: Write>(writer: &mut W, frame: &Frame) -> Result<()> {
    for (r, off) in &frame.saved {
        writeln!(writer, "  movq {}(%rbp), %{}", off, name(*r, 64))?;
    }
    if frame.total > 0 {
        writeln!(writer, "  addq ${}, %rsp", frame.total)?;
    }
    writeln!(writer, "  popq %rbp")?;
    Ok(())
}

fn block_label(mfunc: &MFunction, id: u32) -> String {
    format!(".L_{}_bb{}", mfunc.name, id)
}

fn suffix(size: u16) -> &'static str {
    match size {
        8 => "b",
        16 => "w",
        32 => "l",
        _ => "q",
    }
}

fn cc(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "e",
        CmpOp::Ne => "ne",
        CmpOp::SLt => "l",
        CmpOp::SLe => "le",
        CmpOp::SGt => "g",
        CmpOp::SGe => "ge",
        CmpOp::ULt => "b",
        CmpOp::ULe => "be",
        CmpOp::UGt => "a",
        CmpOp::UGe => "ae",
    }
}

/// Render a data operand. `size` picks the register alias.
fn operand(mfunc: &MFunction, op: &MOperand, size: u16) -> String {
    match op {
        MOperand::Register { id, .. } => format!("%{}", name(*id, size)),
        MOperand::Immediate(v) => format!("${}", *v as i64),
        MOperand::Local(slot) => format!("{}(%rbp)", mfunc.slot_offset(*slot)),
        MOperand::Global(n) => format!("{}(%rip)", n),
        MOperand::Function(n) => n.clone(),
        MOperand::Label(id) => block_label(mfunc, *id),
    }
}

fn op_size(op: &MOperand) -> u16 {
    match op {
        MOperand::Register { size_bits, .. } => *size_bits,
        _ => 64,
    }
}

/// Memory reference form of an address operand.
fn mem(mfunc: &MFunction, op: &MOperand) -> String {
    match op {
        MOperand::Register { id, .. } => format!("(%{})", name(*id, 64)),
        MOperand::Local(slot) => format!("{}(%rbp)", mfunc.slot_offset(*slot)),
        MOperand::Global(n) => format!("{}(%rip)", n),
        other => unreachable!("operand {} is not an address", other),
    }
}

fn emit_inst<W: Write>(
    writer: &mut W,
    mfunc: &MFunction,
    frame: &Frame,
    inst: &MInst,
) -> Result<()> {
    let ops = &inst.operands;
    match inst.opcode {
        MOpcode::X86Mov => {
            let size = op_size(&ops[1]);
            writeln!(
                writer,
                "  mov{} {}, {}",
                suffix(size),
                operand(mfunc, &ops[0], size),
                operand(mfunc, &ops[1], size)
            )?;
        }
        MOpcode::X86Movsx => {
            let ssize = op_size(&ops[0]);
            let dsize = op_size(&ops[1]);
            let mn = match (ssize, dsize) {
                (8, 16) => "movsbw",
                (8, 32) => "movsbl",
                (8, _) => "movsbq",
                (16, 32) => "movswl",
                (16, _) => "movswq",
                (32, _) => "movslq",
                _ => "movq",
            };
            writeln!(
                writer,
                "  {} {}, {}",
                mn,
                operand(mfunc, &ops[0], ssize),
                operand(mfunc, &ops[1], dsize)
            )?;
        }
        MOpcode::X86Movzx => {
            let ssize = op_size(&ops[0]);
            let dsize = op_size(&ops[1]);
            match (ssize, dsize) {
                // A 32-bit move zeroes the upper half already.
                (32, 64) => writeln!(
                    writer,
                    "  movl {}, {}",
                    operand(mfunc, &ops[0], 32),
                    operand(mfunc, &ops[1], 32)
                )?,
                (s, d) if s >= d => writeln!(
                    writer,
                    "  mov{} {}, {}",
                    suffix(d),
                    operand(mfunc, &ops[0], d),
                    operand(mfunc, &ops[1], d)
                )?,
                _ => {
                    let mn = match (ssize, dsize) {
                        (8, 16) => "movzbw",
                        (8, 32) => "movzbl",
                        (8, _) => "movzbq",
                        (16, 32) => "movzwl",
                        _ => "movzwq",
                    };
                    writeln!(
                        writer,
                        "  {} {}, {}",
                        mn,
                        operand(mfunc, &ops[0], ssize),
                        operand(mfunc, &ops[1], dsize)
                    )?;
                }
            }
        }
        MOpcode::X86MovFromMem => {
            let size = op_size(&ops[1]);
            writeln!(
                writer,
                "  mov{} {}, {}",
                suffix(size),
                mem(mfunc, &ops[0]),
                operand(mfunc, &ops[1], size)
            )?;
        }
        MOpcode::X86MovToMem => {
            let size = op_size(&ops[0]);
            writeln!(
                writer,
                "  mov{} {}, {}",
                suffix(size),
                operand(mfunc, &ops[0], size),
                mem(mfunc, &ops[1])
            )?;
        }
        MOpcode::X86Lea => {
            writeln!(
                writer,
                "  leaq {}, {}",
                match &ops[0] {
                    MOperand::Function(n) => format!("{}(%rip)", n),
                    other => mem(mfunc, other),
                },
                operand(mfunc, &ops[1], 64)
            )?;
        }

        MOpcode::X86Add | MOpcode::X86Sub | MOpcode::X86And | MOpcode::X86Or
        | MOpcode::X86Xor => {
            let mn = match inst.opcode {
                MOpcode::X86Add => "add",
                MOpcode::X86Sub => "sub",
                MOpcode::X86And => "and",
                MOpcode::X86Or => "or",
                _ => "xor",
            };
            let size = op_size(&ops[1]);
            writeln!(
                writer,
                "  {}{} {}, {}",
                mn,
                suffix(size),
                operand(mfunc, &ops[0], size),
                operand(mfunc, &ops[1], size)
            )?;
        }
        MOpcode::X86Imul => {
            let size = op_size(ops.last().expect("imul without operands"));
            if ops.len() == 3 {
                writeln!(
                    writer,
                    "  imul{} {}, {}, {}",
                    suffix(size),
                    operand(mfunc, &ops[0], size),
                    operand(mfunc, &ops[1], size),
                    operand(mfunc, &ops[2], size)
                )?;
            } else {
                writeln!(
                    writer,
                    "  imul{} {}, {}",
                    suffix(size),
                    operand(mfunc, &ops[0], size),
                    operand(mfunc, &ops[1], size)
                )?;
            }
        }
        MOpcode::X86Shl | MOpcode::X86Shr | MOpcode::X86Sar => {
            let mn = match inst.opcode {
                MOpcode::X86Shl => "shl",
                MOpcode::X86Shr => "shr",
                _ => "sar",
            };
            let size = op_size(&ops[1]);
            let count = match &ops[0] {
                MOperand::Register { id, .. } => format!("%{}", name(*id, 8)),
                imm => operand(mfunc, imm, size),
            };
            writeln!(
                writer,
                "  {}{} {}, {}",
                mn,
                suffix(size),
                count,
                operand(mfunc, &ops[1], size)
            )?;
        }
        MOpcode::X86Neg | MOpcode::X86Not => {
            let mn = if inst.opcode == MOpcode::X86Neg { "neg" } else { "not" };
            let size = op_size(&ops[0]);
            writeln!(writer, "  {}{} {}", mn, suffix(size), operand(mfunc, &ops[0], size))?;
        }
        MOpcode::X86Cqo => writeln!(writer, "  cqto")?,
        MOpcode::X86Idiv => {
            let size = op_size(&ops[0]);
            writeln!(writer, "  idiv{} {}", suffix(size), operand(mfunc, &ops[0], size))?;
        }

        MOpcode::X86Push => writeln!(writer, "  pushq {}", operand(mfunc, &ops[0], 64))?,
        MOpcode::X86Pop => writeln!(writer, "  popq {}", operand(mfunc, &ops[0], 64))?,

        MOpcode::X86Test => {
            let size = op_size(&ops[0]);
            writeln!(
                writer,
                "  test{} {}, {}",
                suffix(size),
                operand(mfunc, &ops[0], size),
                operand(mfunc, &ops[1], size)
            )?;
        }
        MOpcode::X86CmpInst => {
            let size = op_size(&ops[1]).max(op_size(&ops[0]));
            writeln!(
                writer,
                "  cmp{} {}, {}",
                suffix(size),
                operand(mfunc, &ops[0], size),
                operand(mfunc, &ops[1], size)
            )?;
        }
        MOpcode::X86Setcc(op) => {
            writeln!(writer, "  set{} {}", cc(op), operand(mfunc, &ops[0], 8))?;
        }

        MOpcode::X86Jmp => match &ops[0] {
            MOperand::Function(n) => {
                // A jump out of the function is a tail call.
                emit_epilogue(writer, frame)?;
                writeln!(writer, "  jmp {}", n)?;
            }
            MOperand::Register { id, .. } => {
                emit_epilogue(writer, frame)?;
                writeln!(writer, "  jmp *%{}", name(*id, 64))?;
            }
            label => writeln!(writer, "  jmp {}", operand(mfunc, label, 64))?,
        },
        MOpcode::X86Jz => writeln!(writer, "  jz {}", operand(mfunc, &ops[0], 64))?,
        MOpcode::X86Jcc(op) => {
            writeln!(writer, "  j{} {}", cc(op), operand(mfunc, &ops[0], 64))?
        }
        MOpcode::X86Call => match &ops[0] {
            MOperand::Function(n) => writeln!(writer, "  call {}", n)?,
            MOperand::Register { id, .. } => writeln!(writer, "  call *%{}", name(*id, 64))?,
            other => {
                return Err(BasaltError::CodegenError(format!(
                    "call target {} cannot be emitted",
                    other
                )))
            }
        },
        MOpcode::X86Ret => {
            emit_epilogue(writer, frame)?;
            writeln!(writer, "  ret")?;
        }
        MOpcode::Unreachable => writeln!(writer, "  ud2")?,

        other => {
            return Err(BasaltError::CodegenError(format!(
                "generic opcode {} reached the emitter",
                other
            )))
        }
    }
    Ok(())
}
