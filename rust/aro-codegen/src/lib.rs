//! ARO code generation.
//!
//! Lowers an analyzed program into a single module of LLVM IR with an
//! external C-like runtime ABI: feature-set functions, descriptor
//! construction, control flow for guards/match/loops, handler
//! registration, and the synthesized `main`.
//!
//! The module model ([`ir`]) is built through ID handles, verified, and
//! rendered to deterministic textual IR.

pub mod abi;
pub mod emit;
pub mod ir;
pub mod lower;
pub mod serialize;
pub mod strings;

pub use emit::{compile_program, CodegenError, CompileOptions, CompiledModule};
