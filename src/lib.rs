//! basalt: a multi-frontend compiler with a shared SSA IR and an x86-64
//! back end.
//!
//! Language front ends hand a [`ir::Module`] to the shared middle end; the
//! optimiser runs it to a fixed point, the back end lowers it to MIR,
//! selects x86-64 instructions, allocates registers and emits either AT&T
//! assembly or an ELF64 relocatable object.

pub mod codegen;
pub mod context;
pub mod diag;
pub mod error;
pub mod frontend;
pub mod ir;
pub mod mir;
pub mod opt;
pub mod parser;
pub mod target;

use std::io::Write;

pub use context::Context;
pub use error::{BasaltError, Result};
pub use target::{Format, Target};

/// Compile a parsed module down to the context's output format.
pub fn compile_module<W: Write>(
    ctx: &Context,
    module: &mut ir::Module,
    writer: &mut W,
) -> Result<()> {
    let entry = module
        .entry_function()
        .map(str::to_string)
        .unwrap_or_else(|| ctx.entry.clone());
    opt::optimise(module, &entry);
    codegen::emit(module, ctx.target, ctx.format, writer)
}

/// Compile textual IR straight to the requested artefact.
pub fn compile_ir<W: Write>(
    ctx: &mut Context,
    source: &str,
    file: &str,
    writer: &mut W,
) -> Result<()> {
    use frontend::Frontend;
    let mut module = frontend::IrFrontend.compile(ctx, source, file)?;
    compile_module(ctx, &mut module, writer)
}
