//! Stack frame layout shared by the assembly emitter and the encoder.

use crate::mir::{MFunction, MOperand};

use super::x86_64::CALLEE_SAVED;

/// Frame shape of one function: which callee-saved registers need
/// preserving (at which rbp offsets) and the total stack adjustment.
pub struct Frame {
    pub saved: Vec<(u32, i64)>,
    /// Total stack adjustment below rbp, 16-byte aligned.
    pub total: u64,
}

impl Frame {
    pub fn of(mfunc: &MFunction) -> Self {
        let mut used: Vec<u32> = Vec::new();
        mfunc.for_each_operand(|op| {
            if let MOperand::Register { id, .. } = op {
                if CALLEE_SAVED.contains(id) && !used.contains(id) {
                    used.push(*id);
                }
            }
        });
        let base = mfunc.frame_size();
        let saved = used
            .iter()
            .enumerate()
            .map(|(i, r)| (*r, -((base + 8 * (i as u64 + 1)) as i64)))
            .collect::<Vec<_>>();
        let raw = base + 8 * used.len() as u64;
        Frame {
            saved,
            total: raw.div_ceil(16) * 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::{MBlock, MInst, MOpcode};

    #[test]
    fn test_no_saves_without_callee_saved_use() {
        let mut f = MFunction::new("f");
        f.blocks.push(MBlock::new(0, "entry"));
        f.blocks[0].push(MInst::new(MOpcode::X86Ret, vec![]));
        let frame = Frame::of(&f);
        assert!(frame.saved.is_empty());
        assert_eq!(frame.total, 0);
    }

    #[test]
    fn test_saves_reserve_aligned_space() {
        let mut f = MFunction::new("f");
        f.add_frame_slot(8);
        f.blocks.push(MBlock::new(0, "entry"));
        f.blocks[0].push(MInst::new(
            MOpcode::X86Mov,
            vec![
                MOperand::reg(crate::codegen::x86_64::reg::RBX, 64),
                MOperand::reg(crate::codegen::x86_64::reg::RAX, 64),
            ],
        ));
        f.blocks[0].push(MInst::new(MOpcode::X86Ret, vec![]));
        let frame = Frame::of(&f);
        assert_eq!(frame.saved.len(), 1);
        assert_eq!(frame.saved[0].1, -24);
        assert_eq!(frame.total, 32);
    }
}
