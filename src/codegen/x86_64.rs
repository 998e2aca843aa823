//! x86-64 register ids and naming.

/// Physical register ids. Everything at or above [`crate::mir::VREG_BASE`]
/// is virtual; [`crate::mir::RETURN_REG`] is the pre-RA return marker.
pub mod reg {
    pub const RAX: u32 = 1;
    pub const RBX: u32 = 2;
    pub const RCX: u32 = 3;
    pub const RDX: u32 = 4;
    pub const R8: u32 = 5;
    pub const R9: u32 = 6;
    pub const R10: u32 = 7;
    pub const R11: u32 = 8;
    pub const R12: u32 = 9;
    pub const R13: u32 = 10;
    pub const R14: u32 = 11;
    pub const R15: u32 = 12;
    pub const RDI: u32 = 13;
    pub const RSI: u32 = 14;
    pub const RBP: u32 = 15;
    pub const RSP: u32 = 16;
}

/// System V integer argument registers, in order.
pub const SYSV_ARG_REGS: &[u32] = &[reg::RDI, reg::RSI, reg::RDX, reg::RCX, reg::R8, reg::R9];

/// Windows x64 integer argument registers, in order.
pub const WIN64_ARG_REGS: &[u32] = &[reg::RCX, reg::RDX, reg::R8, reg::R9];

/// Callee-saved registers under both supported ABIs.
pub const CALLEE_SAVED: &[u32] = &[reg::RBX, reg::R12, reg::R13, reg::R14, reg::R15];

/// Registers the register allocator uses for spill traffic. Callee-saved
/// and never part of the allocatable set.
pub const SPILL_SCRATCH: &[u32] = &[reg::RBX, reg::R12];

/// Hardware encoding (ModRM reg field value) for a register id.
pub fn encoding(id: u32) -> u8 {
    match id {
        reg::RAX => 0,
        reg::RCX => 1,
        reg::RDX => 2,
        reg::RBX => 3,
        reg::RSP => 4,
        reg::RBP => 5,
        reg::RSI => 6,
        reg::RDI => 7,
        reg::R8 => 8,
        reg::R9 => 9,
        reg::R10 => 10,
        reg::R11 => 11,
        reg::R12 => 12,
        reg::R13 => 13,
        reg::R14 => 14,
        reg::R15 => 15,
        other => unreachable!("no encoding for register id {}", other),
    }
}

/// Assembly name of a register at a given access size in bits.
pub fn name(id: u32, size_bits: u16) -> &'static str {
    let size = if size_bits == 0 { 64 } else { size_bits };
    match (id, size) {
        (reg::RAX, 64) => "rax",
        (reg::RAX, 32) => "eax",
        (reg::RAX, 16) => "ax",
        (reg::RAX, 8) => "al",
        (reg::RBX, 64) => "rbx",
        (reg::RBX, 32) => "ebx",
        (reg::RBX, 16) => "bx",
        (reg::RBX, 8) => "bl",
        (reg::RCX, 64) => "rcx",
        (reg::RCX, 32) => "ecx",
        (reg::RCX, 16) => "cx",
        (reg::RCX, 8) => "cl",
        (reg::RDX, 64) => "rdx",
        (reg::RDX, 32) => "edx",
        (reg::RDX, 16) => "dx",
        (reg::RDX, 8) => "dl",
        (reg::R8, 64) => "r8",
        (reg::R8, 32) => "r8d",
        (reg::R8, 16) => "r8w",
        (reg::R8, 8) => "r8b",
        (reg::R9, 64) => "r9",
        (reg::R9, 32) => "r9d",
        (reg::R9, 16) => "r9w",
        (reg::R9, 8) => "r9b",
        (reg::R10, 64) => "r10",
        (reg::R10, 32) => "r10d",
        (reg::R10, 16) => "r10w",
        (reg::R10, 8) => "r10b",
        (reg::R11, 64) => "r11",
        (reg::R11, 32) => "r11d",
        (reg::R11, 16) => "r11w",
        (reg::R11, 8) => "r11b",
        (reg::R12, 64) => "r12",
        (reg::R12, 32) => "r12d",
        (reg::R12, 16) => "r12w",
        (reg::R12, 8) => "r12b",
        (reg::R13, 64) => "r13",
        (reg::R13, 32) => "r13d",
        (reg::R13, 16) => "r13w",
        (reg::R13, 8) => "r13b",
        (reg::R14, 64) => "r14",
        (reg::R14, 32) => "r14d",
        (reg::R14, 16) => "r14w",
        (reg::R14, 8) => "r14b",
        (reg::R15, 64) => "r15",
        (reg::R15, 32) => "r15d",
        (reg::R15, 16) => "r15w",
        (reg::R15, 8) => "r15b",
        (reg::RDI, 64) => "rdi",
        (reg::RDI, 32) => "edi",
        (reg::RDI, 16) => "di",
        (reg::RDI, 8) => "dil",
        (reg::RSI, 64) => "rsi",
        (reg::RSI, 32) => "esi",
        (reg::RSI, 16) => "si",
        (reg::RSI, 8) => "sil",
        (reg::RBP, 64) => "rbp",
        (reg::RBP, 32) => "ebp",
        (reg::RBP, 16) => "bp",
        (reg::RSP, 64) => "rsp",
        (reg::RSP, 32) => "esp",
        (reg::RSP, 16) => "sp",
        (id, size) => unreachable!("no name for register {} at {} bits", id, size),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sized_names() {
        assert_eq!(name(reg::RAX, 64), "rax");
        assert_eq!(name(reg::RAX, 8), "al");
        assert_eq!(name(reg::R10, 32), "r10d");
        assert_eq!(name(reg::RDI, 8), "dil");
    }

    #[test]
    fn test_encodings_cover_modrm() {
        assert_eq!(encoding(reg::RAX), 0);
        assert_eq!(encoding(reg::RBP), 5);
        assert_eq!(encoding(reg::R15), 15);
    }
}
