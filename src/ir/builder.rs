//! Programmatic IR construction.
//!
//! The named interface for front ends, and the way tests assemble input
//! without going through the textual reader. The builder tracks a current
//! block; instruction helpers append there and hand back the `ValueId`.

use super::function::Function;
use super::module::Module;
use super::types::Type;
use super::value::{
    BinaryOp, BlockId, Callee, CmpOp, IntrinsicKind, UnaryOp, ValueId, ValueKind,
};

pub struct FunctionBuilder {
    func: Function,
    current: Option<BlockId>,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            func: Function::new(name, ty),
            current: None,
        }
    }

    pub fn param(&self, index: usize) -> ValueId {
        self.func.params[index]
    }

    /// Open a new block and make it current.
    pub fn block(&mut self, name: impl Into<String>) -> BlockId {
        let id = self.func.add_block(name);
        self.current = Some(id);
        id
    }

    /// Switch the current block.
    pub fn switch_to(&mut self, block: BlockId) {
        self.current = Some(block);
    }

    fn emit(&mut self, kind: ValueKind, ty: Type) -> ValueId {
        let block = self.current.expect("no current block");
        self.func.append_inst(block, kind, ty)
    }

    // --- Constants and references ---

    pub fn imm(&mut self, value: i64, ty: Type) -> ValueId {
        self.func.new_value(ValueKind::Immediate(value as u64), ty)
    }

    pub fn global_ref(&mut self, name: impl Into<String>) -> ValueId {
        self.func.new_value(ValueKind::StaticRef(name.into()), Type::Ptr)
    }

    pub fn func_ref(&mut self, name: impl Into<String>) -> ValueId {
        self.func.new_value(ValueKind::FuncRef(name.into()), Type::Ptr)
    }

    // --- Instructions ---

    pub fn alloca(&mut self, allocated: Type) -> ValueId {
        self.emit(ValueKind::Alloca { allocated }, Type::Ptr)
    }

    pub fn load(&mut self, ty: Type, ptr: ValueId) -> ValueId {
        self.emit(ValueKind::Load { ptr }, ty)
    }

    pub fn store(&mut self, value: ValueId, ptr: ValueId) -> ValueId {
        self.emit(ValueKind::Store { value, ptr }, Type::Void)
    }

    pub fn gep(&mut self, elem_ty: Type, ptr: ValueId, index: ValueId) -> ValueId {
        self.emit(ValueKind::GetElemPtr { ptr, index, elem_ty }, Type::Ptr)
    }

    pub fn copy(&mut self, value: ValueId) -> ValueId {
        let ty = self.func.value(value).ty.clone();
        self.emit(ValueKind::Copy { value }, ty)
    }

    pub fn binary(&mut self, op: BinaryOp, ty: Type, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.emit(ValueKind::Binary { op, lhs, rhs }, ty)
    }

    pub fn unary(&mut self, op: UnaryOp, ty: Type, operand: ValueId) -> ValueId {
        self.emit(ValueKind::Unary { op, operand }, ty)
    }

    pub fn cmp(&mut self, op: CmpOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.emit(ValueKind::Compare { op, lhs, rhs }, Type::Integer(1))
    }

    pub fn call(&mut self, callee: Callee, args: Vec<ValueId>, ret: Type) -> ValueId {
        self.emit(
            ValueKind::Call {
                callee,
                args,
                tail_call: false,
            },
            ret,
        )
    }

    pub fn memcpy(&mut self, dst: ValueId, src: ValueId, bytes: ValueId) -> ValueId {
        self.emit(
            ValueKind::Intrinsic {
                intrinsic: IntrinsicKind::MemCopy,
                args: vec![dst, src, bytes],
            },
            Type::Void,
        )
    }

    pub fn phi(&mut self, ty: Type, incoming: Vec<(BlockId, ValueId)>) -> ValueId {
        self.emit(ValueKind::Phi { incoming }, ty)
    }

    pub fn branch(&mut self, target: BlockId) -> ValueId {
        self.emit(ValueKind::Branch { target }, Type::Void)
    }

    pub fn cond_branch(&mut self, cond: ValueId, then_block: BlockId, else_block: BlockId) -> ValueId {
        self.emit(
            ValueKind::CondBranch {
                cond,
                then_block,
                else_block,
            },
            Type::Void,
        )
    }

    pub fn ret(&mut self, value: Option<ValueId>) -> ValueId {
        self.emit(ValueKind::Return { value }, Type::Void)
    }

    pub fn unreachable(&mut self) -> ValueId {
        self.emit(ValueKind::Unreachable, Type::Void)
    }

    pub fn build(self) -> Function {
        self.func
    }

    pub fn func(&self) -> &Function {
        &self.func
    }

    pub fn func_mut(&mut self) -> &mut Function {
        &mut self.func
    }
}

/// Convenience for tests: wrap a single function into a module.
pub fn module_with(func: Function) -> Module {
    let mut module = Module::new("test");
    module.add_function(func);
    module
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_simple_function() {
        let mut b = FunctionBuilder::new(
            "add_one",
            Type::func(Type::Integer(64), vec![Type::Integer(64)]),
        );
        b.block("entry");
        let x = b.param(0);
        let one = b.imm(1, Type::Integer(64));
        let sum = b.binary(BinaryOp::Add, Type::Integer(64), x, one);
        b.ret(Some(sum));
        let f = b.build();

        assert_eq!(f.instruction_count(), 2);
        assert_eq!(f.value(x).users.len(), 1);
        assert_eq!(f.value(sum).users.len(), 1);
    }
}
