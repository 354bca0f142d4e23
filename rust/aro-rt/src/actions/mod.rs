//! The action vocabulary.
//!
//! An action is a named operation bound to one or more verbs. It receives a
//! result descriptor (where to bind), an optional object descriptor (what
//! to operate on, with its preposition), and an [`ActionContext`], and
//! returns the value to bind to the result.

pub mod builtin;
mod registry;
mod runner;

pub use builtin::register_builtins;
pub use registry::ActionRegistry;
pub use runner::ActionRunner;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use aro_core::ast::Preposition;
use aro_core::value::Value;

use crate::context::ExecutionContext;
use crate::errors::RuntimeError;
use crate::events::EventBus;

/// Where an action sits in the request/response lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionRole {
    Request,
    Own,
    Response,
    Export,
}

/// The result half of a statement: the qualified noun being bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultDescriptor {
    pub base: String,
    pub specifiers: Vec<String>,
}

impl ResultDescriptor {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            specifiers: Vec::new(),
        }
    }
}

/// The object half of a statement: preposition plus qualified noun.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDescriptor {
    pub base: String,
    pub preposition: Preposition,
    pub specifiers: Vec<String>,
}

impl ObjectDescriptor {
    pub fn new(base: impl Into<String>, preposition: Preposition) -> Self {
        Self {
            base: base.into(),
            preposition,
            specifiers: Vec::new(),
        }
    }
}

/// Shared repositories: named collections written by `store` and observed
/// through the bus.
pub type RepositoryStore = Arc<Mutex<HashMap<String, Vec<Value>>>>;

/// Everything an action may touch: the invocation's variable context, the
/// event bus, and the repository store.
///
/// Cheap to clone; all parts are shared.
#[derive(Clone)]
pub struct ActionContext {
    pub context: Arc<ExecutionContext>,
    pub bus: EventBus,
    pub repositories: RepositoryStore,
}

impl ActionContext {
    pub fn new(context: Arc<ExecutionContext>, bus: EventBus) -> Self {
        Self {
            context,
            bus,
            repositories: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_repositories(
        context: Arc<ExecutionContext>,
        bus: EventBus,
        repositories: RepositoryStore,
    ) -> Self {
        Self {
            context,
            bus,
            repositories,
        }
    }
}

/// A verb-bound operation. Handlers are stateless and shared; one instance
/// serves every call.
pub trait ActionHandler: Send + Sync {
    fn role(&self) -> ActionRole;
    fn verbs(&self) -> &'static [&'static str];
    fn valid_prepositions(&self) -> &'static [Preposition];

    fn execute(
        &self,
        result: &ResultDescriptor,
        object: Option<&ObjectDescriptor>,
        ctx: &ActionContext,
    ) -> Result<Value, RuntimeError>;
}
