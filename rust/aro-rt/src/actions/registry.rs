//! The process-wide verb → action registry.
//!
//! Mutations serialize on a write lock; lookups take the read lock and are
//! concurrent. Verbs are stored canonicalized and lowercased, so lookup
//! through any synonym reaches the same handler.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use aro_core::verbs::canonicalize;

use super::ActionHandler;

#[derive(Default)]
pub struct ActionRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn ActionHandler>>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under every verb it declares. Later registrations
    /// for the same verb win, which is how plugins override built-ins.
    pub fn register(&self, handler: Arc<dyn ActionHandler>) {
        let mut handlers = self.handlers.write().expect("registry lock");
        for verb in handler.verbs() {
            handlers.insert(canonicalize(verb), Arc::clone(&handler));
        }
    }

    /// Resolve a verb (canonical or synonym, any case) to its handler.
    pub fn lookup(&self, verb: &str) -> Option<Arc<dyn ActionHandler>> {
        let handlers = self.handlers.read().expect("registry lock");
        handlers.get(&canonicalize(verb)).cloned()
    }

    pub fn registered_verbs(&self) -> Vec<String> {
        let handlers = self.handlers.read().expect("registry lock");
        let mut verbs: Vec<String> = handlers.keys().cloned().collect();
        verbs.sort();
        verbs
    }
}
