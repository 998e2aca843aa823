//! Compilation context.
//!
//! One `Context` per driver invocation. It owns the diagnostic engine and
//! records the target and output format every later stage consults. The
//! module graph itself is owned separately; passes take it by mutable
//! reference.

use crate::diag::DiagnosticEngine;
use crate::target::{Format, Target};

pub struct Context {
    pub target: Target,
    pub format: Format,
    /// Name of the designated entry function. Always `ever_referenced`.
    pub entry: String,
    pub diagnostics: DiagnosticEngine,
}

impl Context {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            format: Format::Assembly,
            entry: "main".to_string(),
            diagnostics: DiagnosticEngine::new(),
        }
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }
}
