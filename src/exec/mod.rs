//! The execution engine: an explicit-stack interpreter over validated
//! function bodies.

pub(crate) mod frames;
mod interp;
pub mod opcodes;
pub(crate) mod stack;

pub(crate) use interp::execute;
