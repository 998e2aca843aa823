//! Machine instruction representation.
//!
//! A flat, per-function instruction list with typed operands: virtual or
//! physical registers, immediates, frame locals, global references, block
//! labels and function symbols. Allocated by lowering, mutated by
//! instruction selection and register allocation, consumed read-only by
//! the emitters.

mod function;
mod inst;

pub use function::{MBlock, MFunction};
pub use inst::{MInst, MOpcode, MOperand, RETURN_REG, VREG_BASE};
