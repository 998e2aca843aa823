//! Front-end interface and registry.
//!
//! Language front ends produce a type-checked, SSA-form [`ir::Module`];
//! everything downstream is shared. The three language dialects are
//! external collaborators: their entries exist in the registry so the
//! driver can dispatch on file extension, and they report `sorry` until an
//! implementation is linked in. The textual IR reader is always available.

use crate::context::Context;
use crate::diag::Severity;
use crate::error::{BasaltError, Result};
use crate::ir::Module;
use crate::parser;

/// A language front end: source text in, IR module out.
pub trait Frontend {
    /// Human-readable language name.
    fn language(&self) -> &'static str;

    /// File extension this front end claims, without the dot.
    fn extension(&self) -> &'static str;

    /// Parse and analyse a source file into an IR module. Diagnostics go
    /// through the context; a returned error aborts this file.
    fn compile(&self, ctx: &mut Context, source: &str, file: &str) -> Result<Module>;

    /// Parse only and render the AST for `--ast`.
    fn ast_text(&self, ctx: &mut Context, source: &str, file: &str) -> Result<String>;

    /// Syntax check without semantic analysis, for `--syntax-only`.
    fn check_syntax(&self, ctx: &mut Context, source: &str, file: &str) -> Result<()>;
}

/// The built-in reader for textual IR. Its "AST" is the module itself and
/// its semantic analysis is the IR verifier.
pub struct IrFrontend;

impl Frontend for IrFrontend {
    fn language(&self) -> &'static str {
        "basalt IR"
    }

    fn extension(&self) -> &'static str {
        "basalt"
    }

    fn compile(&self, _ctx: &mut Context, source: &str, file: &str) -> Result<Module> {
        let module = parser::parse_module(source, file)?;
        crate::ir::verify::verify_module(&module)?;
        Ok(module)
    }

    fn ast_text(&self, _ctx: &mut Context, source: &str, file: &str) -> Result<String> {
        let module = parser::parse_module(source, file)?;
        Ok(format!("{}", module))
    }

    fn check_syntax(&self, _ctx: &mut Context, source: &str, file: &str) -> Result<()> {
        parser::parse_module(source, file).map(|_| ())
    }
}

/// A declared language whose implementation is not linked into this build.
struct ExternalFrontend {
    language: &'static str,
    extension: &'static str,
}

impl Frontend for ExternalFrontend {
    fn language(&self) -> &'static str {
        self.language
    }

    fn extension(&self) -> &'static str {
        self.extension
    }

    fn compile(&self, ctx: &mut Context, _source: &str, file: &str) -> Result<Module> {
        ctx.diagnostics.report_in(
            Severity::Sorry,
            file,
            format!("the {} front end is not linked into this build", self.language),
        );
        Err(BasaltError::Unsupported(format!(
            "{} front end unavailable",
            self.language
        )))
    }

    fn ast_text(&self, ctx: &mut Context, source: &str, file: &str) -> Result<String> {
        self.compile(ctx, source, file).map(|_| String::new())
    }

    fn check_syntax(&self, ctx: &mut Context, source: &str, file: &str) -> Result<()> {
        self.compile(ctx, source, file).map(|_| ())
    }
}

/// Resolve a front end from a file extension.
pub fn by_extension(ext: &str) -> Option<Box<dyn Frontend>> {
    match ext {
        "basalt" => Some(Box::new(IrFrontend)),
        "int" => Some(Box::new(ExternalFrontend {
            language: "F-Int",
            extension: "int",
        })),
        "laye" => Some(Box::new(ExternalFrontend {
            language: "F-Laye",
            extension: "laye",
        })),
        "c" => Some(Box::new(ExternalFrontend {
            language: "C",
            extension: "c",
        })),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::Target;

    #[test]
    fn test_ir_frontend_roundtrip() {
        let mut ctx = Context::new(Target::X86_64Linux);
        let src = "\
fn @main() -> i64 {
entry:
  return 0
}
";
        let module = IrFrontend.compile(&mut ctx, src, "t.basalt").unwrap();
        assert!(module.function("main").is_some());
    }

    #[test]
    fn test_external_frontends_report_sorry() {
        let mut ctx = Context::new(Target::X86_64Linux);
        let fe = by_extension("laye").unwrap();
        assert_eq!(fe.language(), "F-Laye");
        assert!(fe.compile(&mut ctx, "", "x.laye").is_err());
        assert!(!ctx.diagnostics.is_empty());
        assert!(!ctx.diagnostics.has_error());
    }

    #[test]
    fn test_unknown_extension() {
        assert!(by_extension("zig").is_none());
    }
}
