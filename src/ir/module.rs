//! Module: the single whole-program object.
//!
//! Owns an ordered table of functions and one of global variables. Every
//! pass takes the module (or one of its functions) by mutable reference and
//! reports whether it changed anything.

use std::fmt;

use indexmap::IndexMap;

use super::function::Function;
use super::types::Type;

/// Initialiser of a global variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalInit {
    Int(u64),
    Bytes(Vec<u8>),
    /// Address of a function; keeps the referent alive through attribute
    /// analysis.
    FuncRef(String),
}

/// A module-level global variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalVar {
    pub name: String,
    pub ty: Type,
    pub init: Option<GlobalInit>,
}

/// A complete IR module.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub name: String,
    pub functions: IndexMap<String, Function>,
    pub globals: IndexMap<String, GlobalVar>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: IndexMap::new(),
            globals: IndexMap::new(),
        }
    }

    pub fn add_function(&mut self, func: Function) {
        self.functions.insert(func.name.clone(), func);
    }

    pub fn add_global(&mut self, global: GlobalVar) {
        self.globals.insert(global.name.clone(), global);
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.get_mut(name)
    }

    /// The designated entry function: `main` when present, otherwise the
    /// first defined function.
    pub fn entry_function(&self) -> Option<&str> {
        if self.functions.contains_key("main") {
            return Some("main");
        }
        self.functions
            .values()
            .find(|f| f.is_definition())
            .map(|f| f.name.as_str())
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for global in self.globals.values() {
            write!(f, "global @{}: {}", global.name, global.ty)?;
            match &global.init {
                Some(GlobalInit::Int(v)) => writeln!(f, " = {}", v)?,
                Some(GlobalInit::Bytes(bytes)) => writeln!(f, " = {:?}", bytes)?,
                Some(GlobalInit::FuncRef(name)) => writeln!(f, " = @{}", name)?,
                None => writeln!(f)?,
            }
        }
        if !self.globals.is_empty() {
            writeln!(f)?;
        }
        for (i, func) in self.functions.values().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", func)?;
        }
        Ok(())
    }
}
