//! Error types for the basalt compiler.
//!
//! One error enum covers the whole pipeline, from reading input through
//! object emission. Invariant violations inside the middle end are not
//! represented here; those are internal compiler errors and assert.

use std::error::Error;
use std::fmt;

/// Main error type for the basalt compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BasaltError {
    /// Errors encountered while reading textual IR.
    ParseError(String),
    /// A module failed verification after a front end produced it.
    VerifyError(String),
    /// Errors during lowering, instruction selection or register allocation.
    CodegenError(String),
    /// Errors while building or serialising an object file.
    ObjectError(String),
    /// A declared but unimplemented feature was requested.
    Unsupported(String),
    /// I/O errors when reading or writing files.
    IoError(String),
}

impl fmt::Display for BasaltError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BasaltError::ParseError(msg) => write!(f, "Parse Error: {}", msg),
            BasaltError::VerifyError(msg) => write!(f, "Verify Error: {}", msg),
            BasaltError::CodegenError(msg) => write!(f, "Codegen Error: {}", msg),
            BasaltError::ObjectError(msg) => write!(f, "Object Error: {}", msg),
            BasaltError::Unsupported(msg) => write!(f, "Unsupported: {}", msg),
            BasaltError::IoError(msg) => write!(f, "IO Error: {}", msg),
        }
    }
}

impl Error for BasaltError {}

impl From<std::io::Error> for BasaltError {
    fn from(err: std::io::Error) -> Self {
        BasaltError::IoError(err.to_string())
    }
}

impl From<object::write::Error> for BasaltError {
    fn from(err: object::write::Error) -> Self {
        BasaltError::ObjectError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BasaltError>;
