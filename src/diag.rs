//! Diagnostics for the compiler driver.
//!
//! The front ends report against source locations; the middle and back end
//! never produce source-level diagnostics (their failures are internal
//! compiler errors). The engine collects everything and the driver decides
//! the exit code from `has_error`.

use std::fmt;

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Something is suspicious but compilation continues.
    Warning,
    /// The input is invalid; no output is produced.
    Error,
    /// The construct is valid but not supported by this build.
    Sorry,
    /// An internal invariant was violated.
    Ice,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
            Severity::Sorry => write!(f, "sorry"),
            Severity::Ice => write!(f, "internal compiler error"),
        }
    }
}

/// A single reported diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// Input file the diagnostic refers to, when known.
    pub file: Option<String>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}: {}: {}", file, self.severity, self.message),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

/// Collects diagnostics for one compilation.
#[derive(Debug, Default)]
pub struct DiagnosticEngine {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, severity: Severity, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            message: message.into(),
            file: None,
        });
    }

    pub fn report_in(&mut self, severity: Severity, file: &str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            message: message.into(),
            file: Some(file.to_string()),
        });
    }

    /// True if anything of `error` severity or above was reported.
    pub fn has_error(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity >= Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Write every collected diagnostic to stderr.
    pub fn flush(&self) {
        for diag in &self.diagnostics {
            eprintln!("{}", diag);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Sorry);
        assert!(Severity::Sorry < Severity::Ice);
    }

    #[test]
    fn test_has_error() {
        let mut engine = DiagnosticEngine::new();
        engine.report(Severity::Warning, "just a warning");
        assert!(!engine.has_error());

        engine.report(Severity::Error, "a real problem");
        assert!(engine.has_error());
    }

    #[test]
    fn test_display() {
        let diag = Diagnostic {
            severity: Severity::Sorry,
            message: "front end not linked in".to_string(),
            file: Some("demo.laye".to_string()),
        };
        assert_eq!(format!("{}", diag), "demo.laye: sorry: front end not linked in");
    }
}
