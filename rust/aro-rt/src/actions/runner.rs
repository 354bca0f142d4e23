//! The action runner.
//!
//! Two entry points: [`execute`](ActionRunner::execute) dispatches on the
//! calling thread and is what event handlers and tests use;
//! [`execute_blocking`](ActionRunner::execute_blocking) is the compiled-code
//! path — it ships the call to a detached task and blocks on the completion
//! signal under the yield-while-blocked discipline, so a saturated
//! compiled-execution pool cannot deadlock on cascading emits.

use std::sync::Arc;
use std::thread;

use aro_core::value::Value;

use crate::errors::RuntimeError;
use crate::exec_pool::CompiledExecPool;

use super::{ActionContext, ActionHandler, ActionRegistry, ObjectDescriptor, ResultDescriptor};

#[derive(Clone)]
pub struct ActionRunner {
    registry: Arc<ActionRegistry>,
    pool: CompiledExecPool,
}

impl ActionRunner {
    pub fn new(registry: Arc<ActionRegistry>, pool: CompiledExecPool) -> Self {
        Self { registry, pool }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &CompiledExecPool {
        &self.pool
    }

    /// Canonicalize, dispatch, and bind the result on the calling thread.
    pub fn execute(
        &self,
        verb: &str,
        result: &ResultDescriptor,
        object: Option<&ObjectDescriptor>,
        ctx: &ActionContext,
    ) -> Result<Value, RuntimeError> {
        let handler = self.resolve(verb, object)?;
        let value = handler.execute(result, object, ctx)?;
        ctx.context.bind(result.base.clone(), value.clone());
        Ok(value)
    }

    /// The compiled-code path: run the action on a detached task and block
    /// for its completion, releasing any held compiled-execution slot while
    /// waiting.
    pub fn execute_blocking(
        &self,
        verb: &str,
        result: &ResultDescriptor,
        object: Option<&ObjectDescriptor>,
        ctx: &ActionContext,
    ) -> Result<Value, RuntimeError> {
        let handler = self.resolve(verb, object)?;
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        {
            let result = result.clone();
            let object = object.cloned();
            let ctx = ctx.clone();
            thread::spawn(move || {
                let outcome = handler.execute(&result, object.as_ref(), &ctx);
                let _ = done_tx.send(outcome);
            });
        }
        let value = self
            .pool
            .yield_while_blocked(|| done_rx.recv())
            .map_err(|_| RuntimeError::Cancelled)??;
        ctx.context.bind(result.base.clone(), value.clone());
        Ok(value)
    }

    fn resolve(
        &self,
        verb: &str,
        object: Option<&ObjectDescriptor>,
    ) -> Result<Arc<dyn ActionHandler>, RuntimeError> {
        let handler = self
            .registry
            .lookup(verb)
            .ok_or_else(|| RuntimeError::UnknownAction {
                verb: verb.to_string(),
            })?;
        if let Some(object) = object {
            if !handler.valid_prepositions().contains(&object.preposition) {
                return Err(RuntimeError::InvalidPreposition {
                    action: verb.to_string(),
                    preposition: object.preposition.to_string(),
                });
            }
        }
        Ok(handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{register_builtins, ActionContext};
    use crate::context::ExecutionContext;
    use crate::events::EventBus;
    use aro_core::ast::Preposition;
    use std::collections::BTreeMap;

    fn runner() -> ActionRunner {
        let registry = Arc::new(ActionRegistry::new());
        register_builtins(&registry);
        ActionRunner::new(registry, CompiledExecPool::with_capacity(2))
    }

    fn action_ctx() -> ActionContext {
        ActionContext::new(Arc::new(ExecutionContext::new("runner-test")), EventBus::new())
    }

    #[test]
    fn unknown_verbs_are_rejected() {
        let runner = runner();
        let ctx = action_ctx();
        let err = runner
            .execute("transmogrify", &ResultDescriptor::new("x"), None, &ctx)
            .unwrap_err();
        assert_eq!(err.kind(), "unknown-action");
    }

    #[test]
    fn invalid_prepositions_are_rejected() {
        let runner = runner();
        let ctx = action_ctx();
        ctx.context.bind("request", Value::Object(BTreeMap::new()));
        // `extract ... on` is outside the extract action's allowed set.
        let object = ObjectDescriptor::new("request", Preposition::On);
        let err = runner
            .execute("extract", &ResultDescriptor::new("user"), Some(&object), &ctx)
            .unwrap_err();
        assert_eq!(err.kind(), "invalid-preposition");
    }

    #[test]
    fn successful_actions_bind_their_result() {
        let runner = runner();
        let ctx = action_ctx();
        ctx.context.bind(
            "request",
            Value::Object(BTreeMap::from([(
                "user".to_string(),
                Value::Str("ada".into()),
            )])),
        );
        let object = ObjectDescriptor {
            base: "request".to_string(),
            preposition: Preposition::From,
            specifiers: vec!["user".to_string()],
        };
        let value = runner
            .execute("extract", &ResultDescriptor::new("user"), Some(&object), &ctx)
            .unwrap();
        assert_eq!(value, Value::Str("ada".into()));
        assert_eq!(ctx.context.lookup("user"), Some(Value::Str("ada".into())));
    }

    #[test]
    fn blocking_path_matches_direct_path() {
        let runner = runner();
        let ctx = action_ctx();
        ctx.context.bind("payload", Value::Int(5));
        let object = ObjectDescriptor::new("payload", Preposition::From);
        let value = runner
            .execute_blocking("extract", &ResultDescriptor::new("copy"), Some(&object), &ctx)
            .unwrap();
        assert_eq!(value, Value::Int(5));
        assert_eq!(ctx.context.lookup("copy"), Some(Value::Int(5)));
    }

    #[test]
    fn handler_errors_propagate_unchanged() {
        let runner = runner();
        let ctx = action_ctx();
        let err = runner
            .execute("extract", &ResultDescriptor::new("ghost"), Some(&ObjectDescriptor::new("ghost", Preposition::From)), &ctx)
            .unwrap_err();
        assert_eq!(err.kind(), "undefined-variable");
    }
}
