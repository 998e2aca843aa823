//! MIR functions and blocks.

use std::fmt;

use super::inst::{MInst, MOperand};

/// A lowered basic block: the id assigned during lowering plus the flat
/// instruction list. `Label` operands reference blocks by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MBlock {
    pub id: u32,
    pub name: String,
    pub insts: Vec<MInst>,
}

impl MBlock {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            insts: Vec::new(),
        }
    }

    pub fn push(&mut self, inst: MInst) {
        self.insts.push(inst);
    }
}

/// A lowered function. Frame slots are reserved by lowering (allocas) and
/// register allocation (spills); the emitter turns them into rbp offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MFunction {
    pub name: String,
    pub blocks: Vec<MBlock>,
    /// Byte sizes of the frame slots, in slot-index order.
    pub frame_slots: Vec<u64>,
}

impl MFunction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocks: Vec::new(),
            frame_slots: Vec::new(),
        }
    }

    /// Reserve a frame slot of the given byte size, returning its index.
    pub fn add_frame_slot(&mut self, bytes: u64) -> u64 {
        self.frame_slots.push(bytes);
        (self.frame_slots.len() - 1) as u64
    }

    /// Total frame size in bytes, 16-byte aligned for the call ABI.
    pub fn frame_size(&self) -> u64 {
        let raw: u64 = self.frame_slots.iter().map(|b| b.max(&8)).sum();
        raw.div_ceil(16) * 16
    }

    /// Byte offset of a frame slot below rbp.
    pub fn slot_offset(&self, index: u64) -> i64 {
        let mut offset: i64 = 0;
        for bytes in self.frame_slots.iter().take(index as usize + 1) {
            offset += (*bytes).max(8) as i64;
        }
        -offset
    }

    pub fn block_by_id(&self, id: u32) -> Option<&MBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }

    /// Iterate every operand of every instruction.
    pub fn for_each_operand(&self, mut f: impl FnMut(&MOperand)) {
        for block in &self.blocks {
            for inst in &block.insts {
                for op in &inst.operands {
                    f(op);
                }
            }
        }
    }
}

impl fmt::Display for MFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "mfn {} (frame: {} bytes) {{", self.name, self.frame_size())?;
        for block in &self.blocks {
            writeln!(f, "{} (bb{}):", block.name, block.id)?;
            for inst in &block.insts {
                writeln!(f, "  {}", inst)?;
            }
        }
        write!(f, "}}")
    }
}
