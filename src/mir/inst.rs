//! MIR instructions and operands.
//!
//! A machine instruction is an opcode plus a flat operand list. Opcodes are
//! either architecture-neutral placeholders produced by lowering or x86-64
//! opcodes introduced by instruction selection. Operands are a tagged
//! variant; register ids below [`VREG_BASE`] are physical.

use std::fmt;

use crate::ir::CmpOp;

/// First virtual register id. Everything below is a physical register id
/// or the virtual return-register marker.
pub const VREG_BASE: u32 = 1024;

/// Placeholder id for "the return register" until register allocation
/// replaces it with the real one from the machine description.
pub const RETURN_REG: u32 = 1023;

/// MIR opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MOpcode {
    // --- Architecture-neutral ---
    /// `copy src, dst`
    Copy,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    Sar,
    And,
    Or,
    Xor,
    Neg,
    Not,
    ZeroExtend,
    SignExtend,
    Truncate,
    Bitcast,
    /// `load addr, dst`
    Load,
    /// `store src, addr`
    Store,
    /// `alloca slot, dst` - materialise the address of a frame slot.
    Alloca,
    /// `cmp.<op> lhs, rhs, dst`
    Cmp(CmpOp),
    /// `jump label`
    Jump,
    /// `condjump cond, then, else`
    CondJump,
    /// `call target` (argument moves precede it)
    Call,
    /// `tailcall target` - emitted as a jump.
    TailCall,
    Return,
    Unreachable,

    // --- x86-64 ---
    /// `mov src, dst`
    X86Mov,
    /// `movsx src, dst`
    X86Movsx,
    /// `movzx src, dst`
    X86Movzx,
    /// `mov (src), dst`
    X86MovFromMem,
    /// `mov src, (dst)`
    X86MovToMem,
    /// `lea slot-or-global, dst`
    X86Lea,
    X86Add,
    X86Sub,
    X86Imul,
    X86And,
    X86Or,
    X86Xor,
    /// `shl count, dst` (count immediate or cl)
    X86Shl,
    X86Shr,
    X86Sar,
    X86Neg,
    X86Not,
    X86Cqo,
    /// `idiv divisor` (rax/rdx implicit)
    X86Idiv,
    X86Push,
    X86Pop,
    /// `test a, b`
    X86Test,
    X86CmpInst,
    X86Jmp,
    /// `jz label`
    X86Jz,
    /// Fused conditional jump.
    X86Jcc(CmpOp),
    X86Setcc(CmpOp),
    X86Call,
    X86Ret,
}

impl MOpcode {
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            MOpcode::Jump
                | MOpcode::CondJump
                | MOpcode::TailCall
                | MOpcode::Return
                | MOpcode::Unreachable
                | MOpcode::X86Jmp
                | MOpcode::X86Ret
        )
    }

    /// True once instruction selection has run.
    pub fn is_machine(self) -> bool {
        matches!(
            self,
            MOpcode::X86Mov
                | MOpcode::X86Movsx
                | MOpcode::X86Movzx
                | MOpcode::X86MovFromMem
                | MOpcode::X86MovToMem
                | MOpcode::X86Lea
                | MOpcode::X86Add
                | MOpcode::X86Sub
                | MOpcode::X86Imul
                | MOpcode::X86And
                | MOpcode::X86Or
                | MOpcode::X86Xor
                | MOpcode::X86Shl
                | MOpcode::X86Shr
                | MOpcode::X86Sar
                | MOpcode::X86Neg
                | MOpcode::X86Not
                | MOpcode::X86Cqo
                | MOpcode::X86Idiv
                | MOpcode::X86Push
                | MOpcode::X86Pop
                | MOpcode::X86Test
                | MOpcode::X86CmpInst
                | MOpcode::X86Jmp
                | MOpcode::X86Jz
                | MOpcode::X86Jcc(_)
                | MOpcode::X86Setcc(_)
                | MOpcode::X86Call
                | MOpcode::X86Ret
        )
    }
}

impl fmt::Display for MOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MOpcode::Copy => "copy",
            MOpcode::Add => "add",
            MOpcode::Sub => "sub",
            MOpcode::Mul => "mul",
            MOpcode::Div => "div",
            MOpcode::Rem => "rem",
            MOpcode::Shl => "shl",
            MOpcode::Shr => "shr",
            MOpcode::Sar => "sar",
            MOpcode::And => "and",
            MOpcode::Or => "or",
            MOpcode::Xor => "xor",
            MOpcode::Neg => "neg",
            MOpcode::Not => "not",
            MOpcode::ZeroExtend => "zext",
            MOpcode::SignExtend => "sext",
            MOpcode::Truncate => "trunc",
            MOpcode::Bitcast => "bitcast",
            MOpcode::Load => "load",
            MOpcode::Store => "store",
            MOpcode::Alloca => "alloca",
            MOpcode::Cmp(op) => return write!(f, "cmp.{}", op),
            MOpcode::Jump => "jump",
            MOpcode::CondJump => "condjump",
            MOpcode::Call => "call",
            MOpcode::TailCall => "tailcall",
            MOpcode::Return => "return",
            MOpcode::Unreachable => "unreachable",
            MOpcode::X86Mov => "mov",
            MOpcode::X86Movsx => "movsx",
            MOpcode::X86Movzx => "movzx",
            MOpcode::X86MovFromMem => "mov.load",
            MOpcode::X86MovToMem => "mov.store",
            MOpcode::X86Lea => "lea",
            MOpcode::X86Add => "x86.add",
            MOpcode::X86Sub => "x86.sub",
            MOpcode::X86Imul => "imul",
            MOpcode::X86And => "x86.and",
            MOpcode::X86Or => "x86.or",
            MOpcode::X86Xor => "x86.xor",
            MOpcode::X86Shl => "x86.shl",
            MOpcode::X86Shr => "x86.shr",
            MOpcode::X86Sar => "x86.sar",
            MOpcode::X86Neg => "x86.neg",
            MOpcode::X86Not => "x86.not",
            MOpcode::X86Cqo => "cqo",
            MOpcode::X86Idiv => "idiv",
            MOpcode::X86Push => "push",
            MOpcode::X86Pop => "pop",
            MOpcode::X86Test => "test",
            MOpcode::X86CmpInst => "x86.cmp",
            MOpcode::X86Jmp => "jmp",
            MOpcode::X86Jz => "jz",
            MOpcode::X86Jcc(op) => return write!(f, "j.{}", op),
            MOpcode::X86Setcc(op) => return write!(f, "set.{}", op),
            MOpcode::X86Call => "x86.call",
            MOpcode::X86Ret => "ret",
        };
        write!(f, "{}", s)
    }
}

/// A machine operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MOperand {
    /// Virtual or physical register with its access size in bits.
    Register { id: u32, size_bits: u16 },
    Immediate(u64),
    /// Frame slot index.
    Local(u64),
    /// Reference to a module global by name.
    Global(String),
    /// Block label by lowered block id.
    Label(u32),
    /// Function symbol.
    Function(String),
}

impl MOperand {
    pub fn reg(id: u32, size_bits: u16) -> Self {
        MOperand::Register { id, size_bits }
    }

    pub fn is_virtual_reg(&self) -> bool {
        matches!(self, MOperand::Register { id, .. } if *id >= VREG_BASE)
    }

    pub fn register_id(&self) -> Option<u32> {
        match self {
            MOperand::Register { id, .. } => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for MOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MOperand::Register { id, size_bits } => {
                if *id >= VREG_BASE {
                    write!(f, "v{}.{}", id - VREG_BASE, size_bits)
                } else if *id == RETURN_REG {
                    write!(f, "RET.{}", size_bits)
                } else {
                    write!(f, "r{}.{}", id, size_bits)
                }
            }
            MOperand::Immediate(v) => write!(f, "${}", *v as i64),
            MOperand::Local(i) => write!(f, "local{}", i),
            MOperand::Global(n) => write!(f, "@{}", n),
            MOperand::Label(b) => write!(f, "bb{}", b),
            MOperand::Function(n) => write!(f, "fn:{}", n),
        }
    }
}

/// One machine instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MInst {
    pub opcode: MOpcode,
    pub operands: Vec<MOperand>,
}

impl MInst {
    pub fn new(opcode: MOpcode, operands: Vec<MOperand>) -> Self {
        Self { opcode, operands }
    }
}

impl fmt::Display for MInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        for (i, op) in self.operands.iter().enumerate() {
            if i == 0 {
                write!(f, " {}", op)?;
            } else {
                write!(f, ", {}", op)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operand_classification() {
        assert!(MOperand::reg(VREG_BASE + 3, 64).is_virtual_reg());
        assert!(!MOperand::reg(1, 64).is_virtual_reg());
        assert!(!MOperand::Immediate(7).is_virtual_reg());
    }

    #[test]
    fn test_display() {
        let inst = MInst::new(
            MOpcode::Add,
            vec![MOperand::Immediate(1), MOperand::reg(VREG_BASE, 64)],
        );
        assert_eq!(inst.to_string(), "add $1, v0.64");
    }

    #[test]
    fn test_terminators() {
        assert!(MOpcode::Return.is_terminator());
        assert!(MOpcode::X86Jmp.is_terminator());
        assert!(!MOpcode::Add.is_terminator());
    }
}
