//! ARO compiler passes.
//!
//! Everything that runs over the analyzed AST before code generation:
//! constant folding, event-chain cycle analysis, and the diagnostic
//! reporter that renders collected errors with source context.

pub mod diagnostics;
pub mod event_chain;
pub mod fold;
