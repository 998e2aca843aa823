//! Function representation: arenas of values and blocks.
//!
//! A function exclusively owns its blocks, its parameter values and every
//! instruction it allocates. Operand edges and user lists are non-owning
//! cross-references inside the same function, kept in sync by the helpers
//! here. Removing an instruction requires its users list to be empty;
//! callers `replace_uses` first.

use std::fmt;

use super::types::Type;
use super::value::{BlockId, Value, ValueId, ValueKind};

/// Function attribute flags.
///
/// `pure`, `leaf` and `noreturn` are recomputed by whole-program analysis;
/// `ever_referenced` is cleared and re-derived on every analysis round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FnAttrs {
    pub pure: bool,
    pub leaf: bool,
    pub noreturn: bool,
    pub is_extern: bool,
    pub ever_referenced: bool,
}

/// A basic block: a label and an ordered instruction list. The last
/// instruction is the terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockData {
    pub name: String,
    pub insts: Vec<ValueId>,
}

/// An IR function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    /// Always a `Type::Function`.
    pub ty: Type,
    /// Parameter values, in order. Their kinds are `Parameter(i)`.
    pub params: Vec<ValueId>,
    pub attrs: FnAttrs,
    values: Vec<Value>,
    blocks: Vec<BlockData>,
    /// Linear block order; the first entry is the entry block.
    pub layout: Vec<BlockId>,
}

impl Function {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        let mut func = Self {
            name: name.into(),
            ty: ty.clone(),
            params: Vec::new(),
            attrs: FnAttrs::default(),
            values: Vec::new(),
            blocks: Vec::new(),
            layout: Vec::new(),
        };
        for (i, pty) in ty.param_types().iter().enumerate() {
            let id = func.new_value(ValueKind::Parameter(i as u32), pty.clone());
            func.params.push(id);
        }
        func
    }

    pub fn return_type(&self) -> &Type {
        self.ty.return_type().unwrap_or(&Type::Void)
    }

    // --- Arena access ---

    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.0 as usize]
    }

    pub fn value_mut(&mut self, id: ValueId) -> &mut Value {
        &mut self.values[id.0 as usize]
    }

    pub fn value_ids(&self) -> impl Iterator<Item = ValueId> {
        (0..self.values.len() as u32).map(ValueId)
    }

    pub fn block(&self, id: BlockId) -> &BlockData {
        &self.blocks[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BlockData {
        &mut self.blocks[id.0 as usize]
    }

    pub fn entry(&self) -> BlockId {
        self.layout[0]
    }

    pub fn is_definition(&self) -> bool {
        !self.attrs.is_extern && !self.layout.is_empty()
    }

    // --- Construction ---

    /// Allocate a value without placing it in a block and without
    /// registering operand uses. Used for constants, refs and parameters.
    pub fn new_value(&mut self, kind: ValueKind, ty: Type) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(Value {
            ty,
            kind,
            users: Vec::new(),
            block: None,
        });
        id
    }

    pub fn add_block(&mut self, name: impl Into<String>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BlockData {
            name: name.into(),
            insts: Vec::new(),
        });
        self.layout.push(id);
        id
    }

    /// Append an instruction to a block, registering all operand uses.
    pub fn append_inst(&mut self, block: BlockId, kind: ValueKind, ty: Type) -> ValueId {
        let id = self.new_value(kind, ty);
        self.register_uses(id);
        self.value_mut(id).block = Some(block);
        self.block_mut(block).insts.push(id);
        id
    }

    /// Insert an instruction at a position within a block.
    pub fn insert_inst(
        &mut self,
        block: BlockId,
        index: usize,
        kind: ValueKind,
        ty: Type,
    ) -> ValueId {
        let id = self.new_value(kind, ty);
        self.register_uses(id);
        self.value_mut(id).block = Some(block);
        self.block_mut(block).insts.insert(index, id);
        id
    }

    /// Record `user` in the users list of each of its operands.
    pub fn register_uses(&mut self, user: ValueId) {
        let operands = self.value(user).kind.operands();
        for op in operands {
            self.values[op.0 as usize].users.push(user);
        }
    }

    // --- Def–use maintenance ---

    /// Remove one occurrence of `user` from `users(value)`.
    pub fn remove_use(&mut self, value: ValueId, user: ValueId) {
        let users = &mut self.values[value.0 as usize].users;
        if let Some(pos) = users.iter().position(|u| *u == user) {
            users.swap_remove(pos);
        }
    }

    /// Replace every use of `old` with `new`. Former users of `old` are
    /// added to `users(new)` (one entry per rewritten edge) and `users(old)`
    /// is cleared.
    pub fn replace_uses(&mut self, old: ValueId, new: ValueId) {
        debug_assert_ne!(old, new);
        let old_users = std::mem::take(&mut self.values[old.0 as usize].users);
        let mut seen: Vec<ValueId> = Vec::new();
        for user in old_users {
            if seen.contains(&user) {
                continue;
            }
            seen.push(user);
            let rewritten = self.values[user.0 as usize].kind.replace_operand(old, new);
            for _ in 0..rewritten {
                self.values[new.0 as usize].users.push(user);
            }
        }
    }

    /// Remove an instruction from its block and sever its operand edges.
    /// The instruction must have no remaining users.
    pub fn remove_inst(&mut self, id: ValueId) {
        assert!(
            self.value(id).users.is_empty(),
            "removing instruction {} that still has users",
            id
        );
        let operands = self.value(id).kind.operands();
        for op in operands {
            self.remove_use(op, id);
        }
        if let Some(block) = self.value(id).block {
            self.block_mut(block).insts.retain(|i| *i != id);
        }
        let value = self.value_mut(id);
        value.kind = ValueKind::Removed;
        value.block = None;
    }

    // --- CFG queries ---

    /// The terminator of a block, i.e. its last instruction.
    pub fn terminator(&self, block: BlockId) -> Option<ValueId> {
        self.block(block).insts.last().copied()
    }

    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        match self.terminator(block).map(|t| &self.value(t).kind) {
            Some(ValueKind::Branch { target }) => vec![*target],
            Some(ValueKind::CondBranch {
                then_block,
                else_block,
                ..
            }) => vec![*then_block, *else_block],
            _ => Vec::new(),
        }
    }

    pub fn predecessors(&self, block: BlockId) -> Vec<BlockId> {
        let mut preds = Vec::new();
        for b in &self.layout {
            if self.successors(*b).contains(&block) {
                preds.push(*b);
            }
        }
        preds
    }

    /// Delete a block from the layout and arena bookkeeping. The block must
    /// no longer be referenced by any terminator or phi.
    pub fn remove_block(&mut self, block: BlockId) {
        let insts = std::mem::take(&mut self.block_mut(block).insts);
        for inst in insts {
            self.values[inst.0 as usize].users.clear();
            let operands = self.value(inst).kind.operands();
            for op in operands {
                self.remove_use(op, inst);
            }
            let value = self.value_mut(inst);
            value.kind = ValueKind::Removed;
            value.block = None;
        }
        self.layout.retain(|b| *b != block);
    }

    /// Number of live instructions, used as the inlining size measure.
    pub fn instruction_count(&self) -> usize {
        self.layout.iter().map(|b| self.block(*b).insts.len()).sum()
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attrs.is_extern {
            write!(f, "extern fn @{}(", self.name)?;
        } else {
            write!(f, "fn @{}(", self.name)?;
        }
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} {}", self.value(*p).ty, p)?;
        }
        write!(f, ") -> {}", self.return_type())?;
        if !self.is_definition() {
            return writeln!(f);
        }
        writeln!(f, " {{")?;
        for block in &self.layout {
            writeln!(f, "{}:", self.block(*block).name)?;
            for inst in &self.block(*block).insts {
                writeln!(f, "  {}", super::print::inst_to_string(self, *inst))?;
            }
        }
        writeln!(f, "}}")
    }
}
