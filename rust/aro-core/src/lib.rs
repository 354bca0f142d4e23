//! ARO Core
//!
//! Shared types used across the compiler, code generator, and runtime:
//! the analyzed AST, literal and runtime values, source spans, the
//! preposition ABI encoding, and verb canonicalization.

pub mod ast;
pub mod reserved;
pub mod span;
pub mod value;
pub mod verbs;
