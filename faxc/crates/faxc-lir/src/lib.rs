//! LIR (Low-level Intermediate Representation) Crate
//!
//! Provides LIR constructs with an x86-64 flavoured instruction set,
//! virtual register management, out-of-line code stubs, a code cache of
//! installed blobs, System V AMD64 register roles and a word-level machine
//! that executes installed code.

pub mod assembler;
pub mod builder;
pub mod calling_convention;
pub mod code_cache;
pub mod error;
pub mod lir;
pub mod machine;
pub mod visitor;
#[cfg(test)]
mod tests;

pub use assembler::*;
pub use builder::*;
pub use calling_convention::*;
pub use code_cache::*;
pub use error::{LirError, Result};
pub use lir::*;
pub use machine::*;
pub use visitor::*;
