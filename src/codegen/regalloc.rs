//! Register allocation.
//!
//! Linear scan over a single block-order instruction numbering. Physical
//! registers named directly by instruction selection (argument moves,
//! division, shift counts) and call clobbers become fixed busy points that
//! candidate intervals must not span. Intervals that find no register
//! spill to a frame slot and are patched with reload/store traffic through
//! the reserved scratch registers.

use std::collections::HashMap;

use log::trace;

use crate::error::{BasaltError, Result};
use crate::mir::{MFunction, MInst, MOpcode, MOperand, RETURN_REG, VREG_BASE};

use super::x86_64::{reg, SPILL_SCRATCH};

/// What the allocator needs to know about the target.
#[derive(Debug, Clone)]
pub struct MachineDescription {
    /// Allocatable registers, in preference order. All are caller-saved.
    pub registers: Vec<u32>,
    /// The register return values travel in.
    pub return_register: u32,
    /// Pre-RA marker id rewritten to `return_register`.
    pub return_register_to_replace: u32,
}

impl MachineDescription {
    pub fn x86_64(target: crate::target::Target) -> Self {
        let mut registers = vec![reg::RAX, reg::RCX, reg::RDX, reg::R8, reg::R9, reg::R10, reg::R11];
        if !target.is_windows() {
            registers.push(reg::RSI);
            registers.push(reg::RDI);
        }
        Self {
            registers,
            return_register: reg::RAX,
            return_register_to_replace: RETURN_REG,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Interval {
    vreg: u32,
    start: u32,
    end: u32,
}

pub fn allocate_registers(desc: &MachineDescription, mfunc: &mut MFunction) -> Result<()> {
    replace_return_register(desc, mfunc);

    let (intervals, fixed) = build_intervals(desc, mfunc);

    // Assign in start order.
    let mut sorted: Vec<Interval> = intervals.values().copied().collect();
    sorted.sort_by_key(|iv| (iv.start, iv.end));

    let mut assignment: HashMap<u32, u32> = HashMap::new();
    let mut spills: HashMap<u32, u64> = HashMap::new();
    let mut active: Vec<(u32, u32)> = Vec::new(); // (end, phys)

    for iv in &sorted {
        active.retain(|(end, _)| *end >= iv.start);
        let taken: Vec<u32> = active.iter().map(|(_, p)| *p).collect();
        let mut chosen = None;
        for candidate in &desc.registers {
            if taken.contains(candidate) {
                continue;
            }
            let busy = fixed.get(candidate).map(Vec::as_slice).unwrap_or(&[]);
            if busy.iter().any(|p| iv.start < *p && *p < iv.end) {
                continue;
            }
            chosen = Some(*candidate);
            break;
        }
        match chosen {
            Some(phys) => {
                trace!("v{} -> r{} [{}, {}]", iv.vreg - VREG_BASE, phys, iv.start, iv.end);
                assignment.insert(iv.vreg, phys);
                active.push((iv.end, phys));
            }
            None => {
                let slot = mfunc.add_frame_slot(8);
                trace!("v{} spilled to slot {}", iv.vreg - VREG_BASE, slot);
                spills.insert(iv.vreg, slot);
            }
        }
    }

    rewrite(mfunc, &assignment, &spills);

    // Nothing virtual may survive.
    let mut leftover = None;
    mfunc.for_each_operand(|op| {
        if op.is_virtual_reg() && leftover.is_none() {
            leftover = Some(op.clone());
        }
        if let MOperand::Register { id, .. } = op {
            assert_ne!(
                *id, RETURN_REG,
                "return-register marker survived allocation"
            );
        }
    });
    if let Some(op) = leftover {
        return Err(BasaltError::CodegenError(format!(
            "virtual register {} survived allocation in @{}",
            op, mfunc.name
        )));
    }
    Ok(())
}

fn replace_return_register(desc: &MachineDescription, mfunc: &mut MFunction) {
    for block in &mut mfunc.blocks {
        for inst in &mut block.insts {
            for op in &mut inst.operands {
                if let MOperand::Register { id, .. } = op {
                    if *id == desc.return_register_to_replace {
                        *id = desc.return_register;
                    }
                }
            }
        }
    }
}

type Fixed = HashMap<u32, Vec<u32>>;

fn build_intervals(desc: &MachineDescription, mfunc: &MFunction) -> (HashMap<u32, Interval>, Fixed) {
    let mut intervals: HashMap<u32, Interval> = HashMap::new();
    let mut fixed: Fixed = HashMap::new();
    // Linear start position of each block, and each block's end position.
    let mut block_bounds: Vec<(u32, u32, u32)> = Vec::new(); // (block id, start, end)

    let mut pos: u32 = 0;
    for block in &mfunc.blocks {
        let start = pos;
        for inst in &block.insts {
            for op in &inst.operands {
                match op {
                    MOperand::Register { id, .. } if *id >= VREG_BASE => {
                        let iv = intervals.entry(*id).or_insert(Interval {
                            vreg: *id,
                            start: pos,
                            end: pos,
                        });
                        iv.end = iv.end.max(pos);
                    }
                    MOperand::Register { id, .. }
                        if *id != reg::RBP && *id != reg::RSP =>
                    {
                        fixed.entry(*id).or_default().push(pos);
                    }
                    _ => {}
                }
            }
            if inst.opcode == MOpcode::X86Call {
                for r in &desc.registers {
                    fixed.entry(*r).or_default().push(pos);
                }
            }
            // cqo and idiv read and write rax/rdx without naming them.
            if inst.opcode == MOpcode::X86Cqo || inst.opcode == MOpcode::X86Idiv {
                fixed.entry(reg::RAX).or_default().push(pos);
                fixed.entry(reg::RDX).or_default().push(pos);
            }
            pos += 1;
        }
        block_bounds.push((block.id, start, pos.saturating_sub(1)));
    }

    // Back edges force values defined before a loop and used inside it to
    // stay live until the loop's bottom.
    let mut back_edges: Vec<(u32, u32)> = Vec::new(); // (target start, source end)
    let mut pos: u32 = 0;
    for block in &mfunc.blocks {
        for inst in &block.insts {
            for op in &inst.operands {
                if let MOperand::Label(target) = op {
                    if let Some((_, tstart, _)) =
                        block_bounds.iter().find(|(id, _, _)| id == target)
                    {
                        if *tstart <= pos {
                            let bend = block_bounds
                                .iter()
                                .find(|(id, _, _)| *id == block.id)
                                .map(|(_, _, e)| *e)
                                .unwrap_or(pos);
                            back_edges.push((*tstart, bend));
                        }
                    }
                }
            }
            pos += 1;
        }
    }
    let mut grew = true;
    while grew {
        grew = false;
        for iv in intervals.values_mut() {
            for (tstart, send) in &back_edges {
                if iv.start < *tstart && iv.end >= *tstart && iv.end < *send {
                    iv.end = *send;
                    grew = true;
                }
            }
        }
    }

    (intervals, fixed)
}

/// Does this opcode write its last operand, and does it also read it?
fn def_role(opcode: MOpcode) -> (bool, bool) {
    match opcode {
        MOpcode::X86Mov
        | MOpcode::X86Movsx
        | MOpcode::X86Movzx
        | MOpcode::X86MovFromMem
        | MOpcode::X86Lea
        | MOpcode::X86Setcc(_)
        | MOpcode::X86Pop => (true, false),
        MOpcode::X86Add
        | MOpcode::X86Sub
        | MOpcode::X86Imul
        | MOpcode::X86And
        | MOpcode::X86Or
        | MOpcode::X86Xor
        | MOpcode::X86Shl
        | MOpcode::X86Shr
        | MOpcode::X86Sar
        | MOpcode::X86Neg
        | MOpcode::X86Not => (true, true),
        _ => (false, false),
    }
}

fn rewrite(mfunc: &mut MFunction, assignment: &HashMap<u32, u32>, spills: &HashMap<u32, u64>) {
    for block in &mut mfunc.blocks {
        let insts = std::mem::take(&mut block.insts);
        let mut out = Vec::with_capacity(insts.len());
        for mut inst in insts {
            let (defs_last, reads_last) = def_role(inst.opcode);
            let last = inst.operands.len().saturating_sub(1);
            let mut scratch_map: HashMap<u32, u32> = HashMap::new();
            let mut reloads: Vec<MInst> = Vec::new();
            let mut stores: Vec<MInst> = Vec::new();

            for (oi, op) in inst.operands.iter_mut().enumerate() {
                let (id, size) = match op {
                    MOperand::Register { id, size_bits } if *id >= VREG_BASE => {
                        (*id, *size_bits)
                    }
                    _ => continue,
                };
                if let Some(phys) = assignment.get(&id) {
                    *op = MOperand::reg(*phys, size);
                    continue;
                }
                let slot = match spills.get(&id) {
                    Some(s) => *s,
                    None => continue,
                };
                let scratch = match scratch_map.get(&id) {
                    Some(s) => *s,
                    None => {
                        let s = SPILL_SCRATCH[scratch_map.len() % SPILL_SCRATCH.len()];
                        scratch_map.insert(id, s);
                        s
                    }
                };
                let is_def = oi == last && defs_last;
                if !is_def || reads_last {
                    reloads.push(MInst::new(
                        MOpcode::X86MovFromMem,
                        vec![MOperand::Local(slot), MOperand::reg(scratch, 64)],
                    ));
                }
                if is_def {
                    stores.push(MInst::new(
                        MOpcode::X86MovToMem,
                        vec![MOperand::reg(scratch, 64), MOperand::Local(slot)],
                    ));
                }
                *op = MOperand::reg(scratch, size);
            }

            out.extend(reloads);
            out.push(inst);
            out.extend(stores);
        }
        block.insts = out;
    }
}
