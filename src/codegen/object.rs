//! Generic object intermediate structure and its ELF64 serialisation.
//!
//! Encoded functions and global data land in a target-neutral
//! `GenericObject` (sections, symbols, relocations) which is then written
//! out as an ELF64 relocatable through `object::write`. COFF is declared
//! but unimplemented.

use std::collections::{HashMap, HashSet};

use object::write::{self, SymbolSection};
use object::{
    Architecture, BinaryFormat, Endianness, RelocationEncoding, RelocationFlags, RelocationKind,
    SectionKind, SymbolFlags, SymbolKind, SymbolScope,
};

use crate::error::{BasaltError, Result};
use crate::ir::{self, GlobalInit};
use crate::mir::MFunction;

use super::encode::{encode_function, RelocKind};

/// Where a symbol or relocation lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GSection {
    Text,
    Data,
    Bss,
}

#[derive(Debug, Clone)]
pub struct GSymbol {
    pub name: String,
    /// `None` for undefined (external) symbols.
    pub section: Option<GSection>,
    pub offset: u64,
    pub size: u64,
    pub is_function: bool,
}

#[derive(Debug, Clone)]
pub struct GReloc {
    pub section: GSection,
    pub offset: u64,
    pub symbol: String,
    pub kind: RelocKind,
    pub addend: i64,
}

/// Target-neutral object contents.
#[derive(Debug, Default)]
pub struct GenericObject {
    pub text: Vec<u8>,
    pub data: Vec<u8>,
    pub bss_size: u64,
    pub symbols: Vec<GSymbol>,
    pub relocs: Vec<GReloc>,
}

impl GenericObject {
    /// Assemble the finalised MIR and module globals into sections.
    pub fn from_mir(module: &ir::Module, mfuncs: &[MFunction]) -> Result<Self> {
        let mut gobj = GenericObject::default();

        for mfunc in mfuncs {
            let encoded = encode_function(mfunc)?;
            let base = gobj.text.len() as u64;
            gobj.symbols.push(GSymbol {
                name: mfunc.name.clone(),
                section: Some(GSection::Text),
                offset: base,
                size: encoded.code.len() as u64,
                is_function: true,
            });
            for reloc in encoded.relocs {
                gobj.relocs.push(GReloc {
                    section: GSection::Text,
                    offset: base + reloc.offset,
                    symbol: reloc.symbol,
                    kind: reloc.kind,
                    addend: reloc.addend,
                });
            }
            gobj.text.extend_from_slice(&encoded.code);
            // Keep function starts 16-byte aligned.
            while gobj.text.len() % 16 != 0 {
                gobj.text.push(0x90);
            }
        }

        for global in module.globals.values() {
            let size = global.ty.bytes().max(1);
            match &global.init {
                Some(init) => {
                    let offset = gobj.data.len() as u64;
                    match init {
                        GlobalInit::Int(v) => gobj.data.extend_from_slice(&v.to_le_bytes()),
                        GlobalInit::Bytes(bytes) => gobj.data.extend_from_slice(bytes),
                        GlobalInit::FuncRef(f) => {
                            gobj.relocs.push(GReloc {
                                section: GSection::Data,
                                offset,
                                symbol: f.clone(),
                                kind: RelocKind::Branch,
                                addend: 0,
                            });
                            gobj.data.extend_from_slice(&0u64.to_le_bytes());
                        }
                    }
                    while gobj.data.len() % 8 != 0 {
                        gobj.data.push(0);
                    }
                    gobj.symbols.push(GSymbol {
                        name: global.name.clone(),
                        section: Some(GSection::Data),
                        offset,
                        size,
                        is_function: false,
                    });
                }
                None => {
                    let offset = gobj.bss_size;
                    gobj.bss_size += size.div_ceil(8) * 8;
                    gobj.symbols.push(GSymbol {
                        name: global.name.clone(),
                        section: Some(GSection::Bss),
                        offset,
                        size,
                        is_function: false,
                    });
                }
            }
        }

        // Anything referenced but not defined is external.
        let defined: HashSet<&str> = gobj.symbols.iter().map(|s| s.name.as_str()).collect();
        let undefined: HashSet<String> = gobj
            .relocs
            .iter()
            .filter(|r| !defined.contains(r.symbol.as_str()))
            .map(|r| r.symbol.clone())
            .collect();
        for name in undefined {
            gobj.symbols.push(GSymbol {
                name,
                section: None,
                offset: 0,
                size: 0,
                is_function: true,
            });
        }

        Ok(gobj)
    }

    /// Serialise as an ELF64 relocatable object.
    pub fn as_elf(&self) -> Result<Vec<u8>> {
        let mut obj = write::Object::new(
            BinaryFormat::Elf,
            Architecture::X86_64,
            Endianness::Little,
        );

        let text = obj.add_section(Vec::new(), b".text".to_vec(), SectionKind::Text);
        obj.set_section_data(text, self.text.clone(), 16);
        let data = obj.add_section(Vec::new(), b".data".to_vec(), SectionKind::Data);
        obj.set_section_data(data, self.data.clone(), 8);
        let bss = obj.add_section(Vec::new(), b".bss".to_vec(), SectionKind::UninitializedData);
        if self.bss_size > 0 {
            obj.append_section_bss(bss, self.bss_size, 8);
        }

        let section_id = |s: GSection| match s {
            GSection::Text => text,
            GSection::Data => data,
            GSection::Bss => bss,
        };

        let mut symbol_ids: HashMap<&str, write::SymbolId> = HashMap::new();
        for sym in &self.symbols {
            let id = obj.add_symbol(write::Symbol {
                name: sym.name.clone().into_bytes(),
                value: sym.offset,
                size: sym.size,
                kind: if sym.is_function {
                    SymbolKind::Text
                } else {
                    SymbolKind::Data
                },
                scope: SymbolScope::Linkage,
                weak: false,
                section: match sym.section {
                    Some(s) => SymbolSection::Section(section_id(s)),
                    None => SymbolSection::Undefined,
                },
                flags: SymbolFlags::None,
            });
            symbol_ids.insert(sym.name.as_str(), id);
        }

        for reloc in &self.relocs {
            let symbol = *symbol_ids
                .get(reloc.symbol.as_str())
                .ok_or_else(|| BasaltError::ObjectError(format!(
                    "relocation against unknown symbol {}",
                    reloc.symbol
                )))?;
            let (kind, size) = match (reloc.kind, reloc.section) {
                // Function addresses stored in data are absolute.
                (RelocKind::Branch, GSection::Data) => (RelocationKind::Absolute, 64),
                (RelocKind::Branch, _) => (RelocationKind::PltRelative, 32),
                (RelocKind::Data, _) => (RelocationKind::Relative, 32),
            };
            obj.add_relocation(
                section_id(reloc.section),
                write::Relocation {
                    offset: reloc.offset,
                    symbol,
                    addend: reloc.addend,
                    flags: RelocationFlags::Generic {
                        kind,
                        encoding: RelocationEncoding::Generic,
                        size,
                    },
                },
            )?;
        }

        Ok(obj.write()?)
    }

    /// COFF output is declared but not implemented.
    pub fn as_coff(&self) -> Result<Vec<u8>> {
        Err(BasaltError::Unsupported(
            "COFF object file generation is not yet implemented".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::isel::select_instructions;
    use crate::codegen::lower::lower_function;
    use crate::codegen::regalloc::{allocate_registers, MachineDescription};
    use crate::ir::builder::FunctionBuilder;
    use crate::ir::{BinaryOp, Callee, Type};
    use crate::target::Target;

    fn i64t() -> Type {
        Type::Integer(64)
    }

    fn build_gobj() -> GenericObject {
        let mut module = ir::Module::new("t");
        module.add_global(ir::GlobalVar {
            name: "answer".into(),
            ty: i64t(),
            init: Some(GlobalInit::Int(42)),
        });

        let mut b = FunctionBuilder::new("main", Type::func(i64t(), vec![]));
        b.block("entry");
        let g = b.global_ref("answer");
        let v = b.load(i64t(), g);
        let one = b.imm(1, i64t());
        let sum = b.binary(BinaryOp::Add, i64t(), v, one);
        let r = b.call(Callee::Direct("helper".into()), vec![sum], i64t());
        b.ret(Some(r));
        module.add_function(b.build());

        let desc = MachineDescription::x86_64(Target::X86_64Linux);
        let mut m = lower_function(module.function("main").unwrap(), Target::X86_64Linux).unwrap();
        select_instructions(&mut m).unwrap();
        allocate_registers(&desc, &mut m).unwrap();
        GenericObject::from_mir(&module, &[m]).unwrap()
    }

    #[test]
    fn test_sections_and_symbols() {
        let gobj = build_gobj();
        assert!(!gobj.text.is_empty());
        assert_eq!(gobj.data.len(), 8);
        let names: Vec<_> = gobj.symbols.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"main"));
        assert!(names.contains(&"answer"));
        // helper is external.
        let helper = gobj.symbols.iter().find(|s| s.name == "helper").unwrap();
        assert!(helper.section.is_none());
    }

    #[test]
    fn test_relocations_recorded() {
        let gobj = build_gobj();
        assert!(gobj
            .relocs
            .iter()
            .any(|r| r.symbol == "answer" && r.kind == RelocKind::Data));
        assert!(gobj
            .relocs
            .iter()
            .any(|r| r.symbol == "helper" && r.kind == RelocKind::Branch));
    }

    #[test]
    fn test_elf_bytes_have_magic() {
        let gobj = build_gobj();
        let elf = gobj.as_elf().unwrap();
        assert_eq!(&elf[..4], b"\x7fELF");
    }

    #[test]
    fn test_coff_is_declared_stub() {
        let gobj = GenericObject::default();
        assert!(matches!(
            gobj.as_coff(),
            Err(BasaltError::Unsupported(_))
        ));
    }
}
