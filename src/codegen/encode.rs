//! x86-64 machine code encoding for the object path.
//!
//! Encodes exactly the opcode subset instruction selection produces.
//! Labels resolve through a per-function fixup pass; references to global
//! data and function symbols become relocations against the final section
//! layout.

use std::collections::HashMap;

use crate::error::{BasaltError, Result};
use crate::ir::CmpOp;
use crate::mir::{MFunction, MInst, MOpcode, MOperand};

use super::frame::Frame;
use super::x86_64::{encoding, reg};

/// A relocation request against a named symbol. The rel32 field at
/// `offset` is relative to the end of the field (addend -4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reloc {
    pub offset: u64,
    pub symbol: String,
    pub kind: RelocKind,
    /// Usually -4 (field is relative to its own end); a trailing immediate
    /// pushes the instruction end further out.
    pub addend: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    /// Call/jump target (PLT-relative on ELF).
    Branch,
    /// RIP-relative data access.
    Data,
}

#[derive(Debug, Default)]
pub struct EncodedFunction {
    pub code: Vec<u8>,
    pub relocs: Vec<Reloc>,
}

struct Encoder<'a> {
    mfunc: &'a MFunction,
    frame: Frame,
    out: Vec<u8>,
    relocs: Vec<Reloc>,
    /// (position of rel32 field, target block id)
    fixups: Vec<(usize, u32)>,
    block_offsets: HashMap<u32, usize>,
}

pub fn encode_function(mfunc: &MFunction) -> Result<EncodedFunction> {
    let mut enc = Encoder {
        mfunc,
        frame: Frame::of(mfunc),
        out: Vec::new(),
        relocs: Vec::new(),
        fixups: Vec::new(),
        block_offsets: HashMap::new(),
    };

    enc.prologue();
    for block in &mfunc.blocks {
        enc.block_offsets.insert(block.id, enc.out.len());
        for inst in &block.insts {
            enc.inst(inst)?;
        }
    }

    // Patch intra-function jumps.
    for (pos, target) in enc.fixups.clone() {
        let target_off = *enc
            .block_offsets
            .get(&target)
            .ok_or_else(|| BasaltError::CodegenError(format!("unknown jump target bb{}", target)))?;
        let rel = target_off as i64 - (pos as i64 + 4);
        enc.out[pos..pos + 4].copy_from_slice(&(rel as i32).to_le_bytes());
    }

    Ok(EncodedFunction {
        code: enc.out,
        relocs: enc.relocs,
    })
}

fn reg_id(op: &MOperand) -> Result<u32> {
    op.register_id().ok_or_else(|| {
        BasaltError::CodegenError(format!("expected a register operand, found {}", op))
    })
}

impl<'a> Encoder<'a> {
    fn byte(&mut self, b: u8) {
        self.out.push(b);
    }

    fn bytes(&mut self, bs: &[u8]) {
        self.out.extend_from_slice(bs);
    }

    fn imm32(&mut self, v: i32) {
        self.bytes(&v.to_le_bytes());
    }

    /// REX prefix. `r` extends the reg field, `b` the rm/base field.
    fn rex(&mut self, w: bool, r_enc: u8, b_enc: u8, force: bool) {
        let mut rex = 0x40u8;
        if w {
            rex |= 0x08;
        }
        if r_enc >= 8 {
            rex |= 0x04;
        }
        if b_enc >= 8 {
            rex |= 0x01;
        }
        if rex != 0x40 || force {
            self.byte(rex);
        }
    }

    fn modrm(&mut self, mode: u8, r: u8, rm: u8) {
        self.byte((mode << 6) | ((r & 7) << 3) | (rm & 7));
    }

    /// reg-to-reg form: opcode /r with `r` in the reg field and `rm` as the
    /// register operand.
    fn rr(&mut self, opcode: &[u8], r: u32, rm: u32) {
        let (re, be) = (encoding(r), encoding(rm));
        self.rex(true, re, be, false);
        self.bytes(opcode);
        self.modrm(0b11, re, be);
    }

    /// opcode /digit with a register rm and an imm32.
    fn ri(&mut self, opcode: u8, digit: u8, rm: u32, imm: i32) {
        let be = encoding(rm);
        self.byte(0x48 | u8::from(be >= 8));
        self.byte(opcode);
        self.modrm(0b11, digit, be);
        self.imm32(imm);
    }

    /// Memory operand encoding for addresses: `(reg)`, `off(%rbp)` locals,
    /// or RIP-relative globals. `r` is the register-field payload.
    fn mem_operand(&mut self, opcode: &[u8], r_enc: u8, addr: &MOperand, w: bool) -> Result<()> {
        match addr {
            MOperand::Register { id, .. } => {
                let be = encoding(*id);
                self.rex(w, r_enc, be, false);
                self.bytes(opcode);
                match be & 7 {
                    // rsp/r12 need a SIB byte, rbp/r13 a zero disp8.
                    4 => {
                        self.modrm(0b00, r_enc, 4);
                        self.byte(0x24);
                    }
                    5 => {
                        self.modrm(0b01, r_enc, 5);
                        self.byte(0);
                    }
                    _ => self.modrm(0b00, r_enc, be),
                }
            }
            MOperand::Local(slot) => {
                let disp = self.mfunc.slot_offset(*slot) as i32;
                self.rex(w, r_enc, encoding(reg::RBP), false);
                self.bytes(opcode);
                self.modrm(0b10, r_enc, encoding(reg::RBP));
                self.imm32(disp);
            }
            MOperand::Global(name) => {
                self.rex(w, r_enc, 0, false);
                self.bytes(opcode);
                self.modrm(0b00, r_enc, 0b101);
                let pos = self.out.len();
                self.imm32(0);
                self.relocs.push(Reloc {
                    offset: pos as u64,
                    symbol: name.clone(),
                    kind: RelocKind::Data,
                    addend: -4,
                });
            }
            MOperand::Function(name) => {
                self.rex(w, r_enc, 0, false);
                self.bytes(opcode);
                self.modrm(0b00, r_enc, 0b101);
                let pos = self.out.len();
                self.imm32(0);
                self.relocs.push(Reloc {
                    offset: pos as u64,
                    symbol: name.clone(),
                    kind: RelocKind::Branch,
                    addend: -4,
                });
            }
            other => {
                return Err(BasaltError::CodegenError(format!(
                    "operand {} is not an address",
                    other
                )))
            }
        }
        Ok(())
    }

    fn mov_imm_to_reg(&mut self, imm: u64, dst: u32) {
        let as_i = imm as i64;
        if i32::try_from(as_i).is_ok() {
            self.ri(0xC7, 0, dst, as_i as i32);
        } else {
            let be = encoding(dst);
            self.byte(0x48 | u8::from(be >= 8));
            self.byte(0xB8 + (be & 7));
            self.bytes(&imm.to_le_bytes());
        }
    }

    fn rel32_to(&mut self, target: &MOperand) -> Result<()> {
        match target {
            MOperand::Label(id) => {
                let pos = self.out.len();
                self.imm32(0);
                self.fixups.push((pos, *id));
            }
            MOperand::Function(name) => {
                let pos = self.out.len();
                self.imm32(0);
                self.relocs.push(Reloc {
                    offset: pos as u64,
                    symbol: name.clone(),
                    kind: RelocKind::Branch,
                    addend: -4,
                });
            }
            other => {
                return Err(BasaltError::CodegenError(format!(
                    "branch target {} cannot be encoded",
                    other
                )))
            }
        }
        Ok(())
    }

    fn prologue(&mut self) {
        self.byte(0x55); // push rbp
        self.bytes(&[0x48, 0x89, 0xE5]); // mov rsp, rbp
        if self.frame.total > 0 {
            self.bytes(&[0x48, 0x81, 0xEC]); // sub imm32, rsp
            self.imm32(self.frame.total as i32);
        }
        for (r, off) in self.frame.saved.clone() {
            // mov %r, off(%rbp)
            let re = encoding(r);
            self.rex(true, re, encoding(reg::RBP), false);
            self.byte(0x89);
            self.modrm(0b10, re, encoding(reg::RBP));
            self.imm32(off as i32);
        }
    }

    fn epilogue(&mut self) {
        for (r, off) in self.frame.saved.clone() {
            // mov off(%rbp), %r
            let re = encoding(r);
            self.rex(true, re, encoding(reg::RBP), false);
            self.byte(0x8B);
            self.modrm(0b10, re, encoding(reg::RBP));
            self.imm32(off as i32);
        }
        if self.frame.total > 0 {
            self.bytes(&[0x48, 0x81, 0xC4]); // add imm32, rsp
            self.imm32(self.frame.total as i32);
        }
        self.byte(0x5D); // pop rbp
    }

    fn alu_rr_or_ri(&mut self, rr_op: u8, digit: u8, src: &MOperand, dst: u32) -> Result<()> {
        match src {
            MOperand::Register { id, .. } => self.rr(&[rr_op], *id, dst),
            MOperand::Immediate(v) => self.ri(0x81, digit, dst, *v as i32),
            other => {
                return Err(BasaltError::CodegenError(format!(
                    "unsupported ALU source {}",
                    other
                )))
            }
        }
        Ok(())
    }

    fn inst(&mut self, inst: &MInst) -> Result<()> {
        let ops = &inst.operands;
        match inst.opcode {
            MOpcode::X86Mov => match (&ops[0], &ops[1]) {
                (MOperand::Immediate(v), dst) => self.mov_imm_to_reg(*v, reg_id(dst)?),
                (src, dst) => self.rr(&[0x89], reg_id(src)?, reg_id(dst)?),
            },
            MOpcode::X86Movsx => {
                let ssize = match &ops[0] {
                    MOperand::Register { size_bits, .. } => *size_bits,
                    _ => 64,
                };
                let (src, dst) = (reg_id(&ops[0])?, reg_id(&ops[1])?);
                let (se, de) = (encoding(src), encoding(dst));
                match ssize {
                    8 => {
                        self.rex(true, de, se, false);
                        self.bytes(&[0x0F, 0xBE]);
                        self.modrm(0b11, de, se);
                    }
                    16 => {
                        self.rex(true, de, se, false);
                        self.bytes(&[0x0F, 0xBF]);
                        self.modrm(0b11, de, se);
                    }
                    _ => {
                        // movsxd
                        self.rex(true, de, se, false);
                        self.byte(0x63);
                        self.modrm(0b11, de, se);
                    }
                }
            }
            MOpcode::X86Movzx => {
                let ssize = match &ops[0] {
                    MOperand::Register { size_bits, .. } => *size_bits,
                    _ => 64,
                };
                let (src, dst) = (reg_id(&ops[0])?, reg_id(&ops[1])?);
                let (se, de) = (encoding(src), encoding(dst));
                match ssize {
                    8 => {
                        self.rex(true, de, se, false);
                        self.bytes(&[0x0F, 0xB6]);
                        self.modrm(0b11, de, se);
                    }
                    16 => {
                        self.rex(true, de, se, false);
                        self.bytes(&[0x0F, 0xB7]);
                        self.modrm(0b11, de, se);
                    }
                    _ => {
                        // 32-bit mov zero-extends.
                        self.rex(false, se, de, false);
                        self.byte(0x89);
                        self.modrm(0b11, se, de);
                    }
                }
            }
            MOpcode::X86MovFromMem => {
                let dst = reg_id(&ops[1])?;
                self.mem_operand(&[0x8B], encoding(dst), &ops[0], true)?;
            }
            MOpcode::X86MovToMem => match &ops[0] {
                MOperand::Immediate(v) => {
                    let relocs_before = self.relocs.len();
                    self.mem_operand(&[0xC7], 0, &ops[1], true)?;
                    self.imm32(*v as i32);
                    // The trailing immediate moves the instruction end past
                    // the rel32 field.
                    if self.relocs.len() > relocs_before {
                        self.relocs.last_mut().expect("just pushed").addend = -8;
                    }
                }
                src => {
                    let src = reg_id(src)?;
                    self.mem_operand(&[0x89], encoding(src), &ops[1], true)?;
                }
            },
            MOpcode::X86Lea => {
                let dst = reg_id(&ops[1])?;
                self.mem_operand(&[0x8D], encoding(dst), &ops[0], true)?;
            }

            MOpcode::X86Add => self.alu_rr_or_ri(0x01, 0, &ops[0], reg_id(&ops[1])?)?,
            MOpcode::X86Sub => self.alu_rr_or_ri(0x29, 5, &ops[0], reg_id(&ops[1])?)?,
            MOpcode::X86And => self.alu_rr_or_ri(0x21, 4, &ops[0], reg_id(&ops[1])?)?,
            MOpcode::X86Or => self.alu_rr_or_ri(0x09, 1, &ops[0], reg_id(&ops[1])?)?,
            MOpcode::X86Xor => self.alu_rr_or_ri(0x31, 6, &ops[0], reg_id(&ops[1])?)?,
            MOpcode::X86CmpInst => self.alu_rr_or_ri(0x39, 7, &ops[0], reg_id(&ops[1])?)?,

            MOpcode::X86Imul => {
                if ops.len() == 3 {
                    let imm = match &ops[0] {
                        MOperand::Immediate(v) => *v as i32,
                        other => {
                            return Err(BasaltError::CodegenError(format!(
                                "three-operand imul needs an immediate, found {}",
                                other
                            )))
                        }
                    };
                    let (src, dst) = (reg_id(&ops[1])?, reg_id(&ops[2])?);
                    let (se, de) = (encoding(src), encoding(dst));
                    self.rex(true, de, se, false);
                    self.byte(0x69);
                    self.modrm(0b11, de, se);
                    self.imm32(imm);
                } else {
                    let (src, dst) = (reg_id(&ops[0])?, reg_id(&ops[1])?);
                    let (se, de) = (encoding(src), encoding(dst));
                    self.rex(true, de, se, false);
                    self.bytes(&[0x0F, 0xAF]);
                    self.modrm(0b11, de, se);
                }
            }

            MOpcode::X86Shl | MOpcode::X86Shr | MOpcode::X86Sar => {
                let digit = match inst.opcode {
                    MOpcode::X86Shl => 4,
                    MOpcode::X86Shr => 5,
                    _ => 7,
                };
                let dst = reg_id(&ops[1])?;
                let be = encoding(dst);
                match &ops[0] {
                    MOperand::Immediate(v) => {
                        self.rex(true, 0, be, false);
                        self.byte(0xC1);
                        self.modrm(0b11, digit, be);
                        self.byte(*v as u8);
                    }
                    _ => {
                        // count in cl
                        self.rex(true, 0, be, false);
                        self.byte(0xD3);
                        self.modrm(0b11, digit, be);
                    }
                }
            }

            MOpcode::X86Neg | MOpcode::X86Not => {
                let digit = if inst.opcode == MOpcode::X86Neg { 3 } else { 2 };
                let rm = reg_id(&ops[0])?;
                let be = encoding(rm);
                self.rex(true, 0, be, false);
                self.byte(0xF7);
                self.modrm(0b11, digit, be);
            }
            MOpcode::X86Cqo => self.bytes(&[0x48, 0x99]),
            MOpcode::X86Idiv => {
                let rm = reg_id(&ops[0])?;
                let be = encoding(rm);
                self.rex(true, 0, be, false);
                self.byte(0xF7);
                self.modrm(0b11, 7, be);
            }

            MOpcode::X86Push => {
                let be = encoding(reg_id(&ops[0])?);
                if be >= 8 {
                    self.byte(0x41);
                }
                self.byte(0x50 + (be & 7));
            }
            MOpcode::X86Pop => {
                let be = encoding(reg_id(&ops[0])?);
                if be >= 8 {
                    self.byte(0x41);
                }
                self.byte(0x58 + (be & 7));
            }

            MOpcode::X86Test => {
                let (a, b) = (reg_id(&ops[0])?, reg_id(&ops[1])?);
                self.rr(&[0x85], a, b);
            }
            MOpcode::X86Setcc(op) => {
                let rm = reg_id(&ops[0])?;
                let be = encoding(rm);
                // REX keeps encodings 4..=7 meaning sil/dil, not ah/bh.
                self.rex(false, 0, be, be >= 4);
                self.bytes(&[0x0F, 0x90 | setcc_nibble(op)]);
                self.modrm(0b11, 0, be);
            }

            MOpcode::X86Jmp => match &ops[0] {
                MOperand::Function(_) => {
                    self.epilogue();
                    self.byte(0xE9);
                    self.rel32_to(&ops[0])?;
                }
                MOperand::Register { id, .. } => {
                    self.epilogue();
                    let be = encoding(*id);
                    if be >= 8 {
                        self.byte(0x41);
                    }
                    self.byte(0xFF);
                    self.modrm(0b11, 4, be);
                }
                target => {
                    self.byte(0xE9);
                    self.rel32_to(target)?;
                }
            },
            MOpcode::X86Jz => {
                self.bytes(&[0x0F, 0x84]);
                self.rel32_to(&ops[0])?;
            }
            MOpcode::X86Jcc(op) => {
                self.bytes(&[0x0F, 0x80 | setcc_nibble(op)]);
                self.rel32_to(&ops[0])?;
            }
            MOpcode::X86Call => match &ops[0] {
                MOperand::Register { id, .. } => {
                    let be = encoding(*id);
                    if be >= 8 {
                        self.byte(0x41);
                    }
                    self.byte(0xFF);
                    self.modrm(0b11, 2, be);
                }
                target => {
                    self.byte(0xE8);
                    self.rel32_to(target)?;
                }
            },
            MOpcode::X86Ret => {
                self.epilogue();
                self.byte(0xC3);
            }
            MOpcode::Unreachable => self.bytes(&[0x0F, 0x0B]),

            other => {
                return Err(BasaltError::CodegenError(format!(
                    "generic opcode {} reached the encoder",
                    other
                )))
            }
        }
        Ok(())
    }
}

/// Condition-code nibble shared by setcc (0x90 | n) and jcc (0x80 | n).
fn setcc_nibble(op: CmpOp) -> u8 {
    match op {
        CmpOp::Eq => 0x4,
        CmpOp::Ne => 0x5,
        CmpOp::SLt => 0xC,
        CmpOp::SLe => 0xE,
        CmpOp::SGt => 0xF,
        CmpOp::SGe => 0xD,
        CmpOp::ULt => 0x2,
        CmpOp::ULe => 0x6,
        CmpOp::UGt => 0x7,
        CmpOp::UGe => 0x3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::MBlock;

    fn one_block(insts: Vec<MInst>) -> MFunction {
        let mut f = MFunction::new("f");
        let mut b = MBlock::new(0, "entry");
        b.insts = insts;
        f.blocks.push(b);
        f
    }

    #[test]
    fn test_ret_only() {
        let f = one_block(vec![MInst::new(MOpcode::X86Ret, vec![])]);
        let enc = encode_function(&f).unwrap();
        // push rbp; mov rsp,rbp; pop rbp; ret
        assert_eq!(enc.code, vec![0x55, 0x48, 0x89, 0xE5, 0x5D, 0xC3]);
    }

    #[test]
    fn test_mov_imm_and_add() {
        let f = one_block(vec![
            MInst::new(
                MOpcode::X86Mov,
                vec![MOperand::Immediate(7), MOperand::reg(reg::RAX, 64)],
            ),
            MInst::new(
                MOpcode::X86Add,
                vec![MOperand::reg(reg::RCX, 64), MOperand::reg(reg::RAX, 64)],
            ),
            MInst::new(MOpcode::X86Ret, vec![]),
        ]);
        let enc = encode_function(&f).unwrap();
        // After the prologue: 48 C7 C0 07 00 00 00 (mov $7, rax)
        let body = &enc.code[4..];
        assert_eq!(&body[..7], &[0x48, 0xC7, 0xC0, 0x07, 0x00, 0x00, 0x00]);
        // 48 01 C8 (add rcx, rax)
        assert_eq!(&body[7..10], &[0x48, 0x01, 0xC8]);
    }

    #[test]
    fn test_call_generates_reloc() {
        let f = one_block(vec![
            MInst::new(MOpcode::X86Call, vec![MOperand::Function("g".into())]),
            MInst::new(MOpcode::X86Ret, vec![]),
        ]);
        let enc = encode_function(&f).unwrap();
        assert_eq!(enc.relocs.len(), 1);
        assert_eq!(enc.relocs[0].symbol, "g");
        assert_eq!(enc.relocs[0].kind, RelocKind::Branch);
        // The rel32 field sits right after the E8 opcode.
        assert_eq!(enc.code[4], 0xE8);
        assert_eq!(enc.relocs[0].offset, 5);
    }

    #[test]
    fn test_backward_jump_resolves() {
        let mut f = MFunction::new("f");
        let mut b0 = MBlock::new(0, "entry");
        b0.push(MInst::new(MOpcode::X86Jmp, vec![MOperand::Label(0)]));
        f.blocks.push(b0);
        let enc = encode_function(&f).unwrap();
        // jmp to own start: E9 rel32 where rel = 4 - (5 + 4)... block
        // starts after the 4-byte prologue; jmp at 4, field at 5, target 4.
        let rel = i32::from_le_bytes(enc.code[5..9].try_into().unwrap());
        assert_eq!(rel, -5);
    }
}
