//! Execution contexts.
//!
//! A context is one feature-set invocation's view of the world: its named
//! variable bindings, its error slot, and its response value. Contexts are
//! shared (`Arc`) between the invoking code, the action runner, and the
//! FFI surface; the inner state serializes on a single mutex held across
//! short critical sections only.

use std::collections::HashMap;
use std::sync::Mutex;

use aro_core::value::Value;

use crate::errors::RuntimeError;

#[derive(Debug, Default)]
struct ContextState {
    variables: HashMap<String, Value>,
    error: Option<RuntimeError>,
    response: Option<Value>,
}

/// Variable bindings and outcome state for one feature-set invocation.
#[derive(Debug)]
pub struct ExecutionContext {
    name: String,
    state: Mutex<ContextState>,
}

impl ExecutionContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(ContextState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // -- variables --------------------------------------------------------

    pub fn bind(&self, name: impl Into<String>, value: Value) {
        let mut state = self.state.lock().expect("context lock");
        state.variables.insert(name.into(), value);
    }

    pub fn unbind(&self, name: &str) {
        let mut state = self.state.lock().expect("context lock");
        state.variables.remove(name);
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        let state = self.state.lock().expect("context lock");
        state.variables.get(name).cloned()
    }

    /// Resolve a base name and follow its specifiers into nested values.
    pub fn resolve(&self, base: &str, specifiers: &[String]) -> Result<Value, RuntimeError> {
        let root = self
            .lookup(base)
            .ok_or_else(|| RuntimeError::UndefinedVariable {
                name: base.to_string(),
            })?;
        if specifiers.is_empty() {
            return Ok(root);
        }
        root.get_path(specifiers)
            .cloned()
            .ok_or_else(|| RuntimeError::PropertyNotFound {
                base: base.to_string(),
                property: specifiers.join(": "),
            })
    }

    // -- error slot -------------------------------------------------------

    /// Record the first error; later errors do not overwrite it.
    pub fn set_error(&self, error: RuntimeError) {
        let mut state = self.state.lock().expect("context lock");
        state.error.get_or_insert(error);
    }

    pub fn has_error(&self) -> bool {
        let state = self.state.lock().expect("context lock");
        state.error.is_some()
    }

    pub fn error(&self) -> Option<RuntimeError> {
        let state = self.state.lock().expect("context lock");
        state.error.clone()
    }

    pub fn print_error(&self) {
        if let Some(error) = self.error() {
            eprintln!("[{}] {}: {}", self.name, error.kind(), error);
        }
    }

    // -- response ---------------------------------------------------------

    pub fn set_response(&self, value: Value) {
        let mut state = self.state.lock().expect("context lock");
        state.response = Some(value);
    }

    pub fn response(&self) -> Option<Value> {
        let state = self.state.lock().expect("context lock");
        state.response.clone()
    }

    pub fn print_response(&self) {
        if let Some(response) = self.response() {
            println!("{response}");
        }
    }
}
