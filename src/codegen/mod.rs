//! The back end: ABI lowering, IR to MIR, instruction selection, register
//! allocation and the two output sinks.

pub mod abi;
pub mod emit_asm;
pub mod encode;
pub mod frame;
pub mod isel;
pub mod lower;
pub mod object;
pub mod regalloc;
pub mod x86_64;

use std::io::Write;

use log::debug;

use crate::error::{BasaltError, Result};
use crate::ir;
use crate::mir::MFunction;
use crate::target::{Format, Target};

pub use object::GenericObject;
pub use regalloc::MachineDescription;

/// Apply ABI rewrites and lower every defined function to MIR.
pub fn lower_to_mir(module: &mut ir::Module, target: Target) -> Result<Vec<MFunction>> {
    abi::lower_module(module, target)?;
    let mut mfuncs = Vec::new();
    for func in module.functions.values() {
        if func.is_definition() {
            mfuncs.push(lower::lower_function(func, target)?);
        }
    }
    Ok(mfuncs)
}

/// Run the whole back end and write the requested artefact.
pub fn emit<W: Write>(
    module: &mut ir::Module,
    target: Target,
    format: Format,
    writer: &mut W,
) -> Result<()> {
    if format == Format::LlvmIr {
        return Err(BasaltError::Unsupported(
            "the LLVM textual IR emitter is not linked into this build".to_string(),
        ));
    }

    let mut mfuncs = lower_to_mir(module, target)?;
    for mfunc in &mut mfuncs {
        isel::select_instructions(mfunc)?;
    }
    let desc = MachineDescription::x86_64(target);
    for mfunc in &mut mfuncs {
        regalloc::allocate_registers(&desc, mfunc)?;
    }
    debug!(
        "emitting {} function(s) as {} for {}",
        mfuncs.len(),
        format,
        target
    );

    match format {
        Format::Assembly => emit_asm::emit_assembly(writer, module, &desc, &mfuncs),
        Format::Object => {
            let gobj = GenericObject::from_mir(module, &mfuncs)?;
            let bytes = if target.is_windows() {
                gobj.as_coff()?
            } else {
                gobj.as_elf()?
            };
            writer.write_all(&bytes)?;
            Ok(())
        }
        Format::LlvmIr => unreachable!("handled above"),
    }
}
