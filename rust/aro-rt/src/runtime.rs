//! The runtime handle.
//!
//! One `AroRuntime` lives for the whole process: it owns the event bus, the
//! action registry and runner, the compiled-execution pool, and the shared
//! repository store, and it wires compiled feature-set functions into the
//! bus as event handlers and repository observers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use aro_core::value::Value;

use crate::actions::{
    register_builtins, ActionContext, ActionRegistry, ActionRunner, RepositoryStore,
};
use crate::actions::builtin::REPOSITORY_EVENT_PREFIX;
use crate::context::ExecutionContext;
use crate::events::{Event, EventBus};
use crate::exec_pool::CompiledExecPool;

/// The shape of every emitted feature-set function: context in, last
/// action's result (or null) out.
pub type CompiledFeatureSetFn =
    unsafe extern "C" fn(*mut std::ffi::c_void) -> *mut std::ffi::c_void;

/// Everything a compiled feature-set invocation needs behind its context
/// pointer.
pub struct CompiledContext {
    pub actions: ActionContext,
    pub runner: ActionRunner,
}

impl CompiledContext {
    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.actions.context
    }
}

struct RuntimeInner {
    bus: EventBus,
    registry: Arc<ActionRegistry>,
    runner: ActionRunner,
    pool: CompiledExecPool,
    repositories: RepositoryStore,
    embedded_openapi: Mutex<Option<String>>,
}

/// Process-wide runtime state. Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct AroRuntime {
    inner: Arc<RuntimeInner>,
}

impl Default for AroRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl AroRuntime {
    pub fn new() -> Self {
        let registry = Arc::new(ActionRegistry::new());
        register_builtins(&registry);
        let pool = CompiledExecPool::new();
        let runner = ActionRunner::new(Arc::clone(&registry), pool.clone());
        Self {
            inner: Arc::new(RuntimeInner {
                bus: EventBus::new(),
                registry,
                runner,
                pool,
                repositories: RepositoryStore::default(),
                embedded_openapi: Mutex::new(None),
            }),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.inner.registry
    }

    pub fn runner(&self) -> &ActionRunner {
        &self.inner.runner
    }

    pub fn pool(&self) -> &CompiledExecPool {
        &self.inner.pool
    }

    pub fn repositories(&self) -> &RepositoryStore {
        &self.inner.repositories
    }

    /// Create a named invocation context sharing this runtime's bus and
    /// repositories.
    pub fn create_context(&self, name: &str) -> Box<CompiledContext> {
        let context = Arc::new(ExecutionContext::new(name));
        let actions = ActionContext::with_repositories(
            context,
            self.inner.bus.clone(),
            Arc::clone(&self.inner.repositories),
        );
        Box::new(CompiledContext {
            actions,
            runner: self.inner.runner.clone(),
        })
    }

    // -- compiled handler wiring ------------------------------------------

    /// Register a compiled feature-set function as the handler for an event
    /// type. Each delivery runs under a compiled-execution slot with a
    /// fresh context carrying the payload under `event`.
    pub fn register_handler(&self, event_type: &str, function: CompiledFeatureSetFn) {
        let runtime = self.clone();
        let context_name = format!("{event_type} handler");
        self.inner.bus.subscribe(
            event_type,
            Arc::new(move |event: &Event| {
                runtime.invoke_compiled(&context_name, &event.payload, function);
            }),
        );
    }

    /// Register a compiled feature-set function as a repository observer.
    /// It runs after every store into that repository, with the stored
    /// value as its event payload.
    pub fn register_repository_observer(&self, repository: &str, function: CompiledFeatureSetFn) {
        let runtime = self.clone();
        let context_name = format!("{repository} observer");
        self.inner.bus.subscribe(
            &format!("{REPOSITORY_EVENT_PREFIX}{repository}"),
            Arc::new(move |event: &Event| {
                runtime.invoke_compiled(&context_name, &event.payload, function);
            }),
        );
    }

    fn invoke_compiled(&self, context_name: &str, payload: &Value, function: CompiledFeatureSetFn) {
        let compiled = self.create_context(context_name);
        compiled.context().bind("event", payload.clone());
        let ptr = Box::into_raw(compiled).cast::<std::ffi::c_void>();
        self.inner.pool.with_slot(|| {
            // SAFETY: `ptr` was produced by `Box::into_raw` just above and
            // is reclaimed right after the call; the function pointer comes
            // from the emitted module whose ABI matches
            // `CompiledFeatureSetFn`.
            let result = unsafe { function(ptr) };
            if !result.is_null() {
                // SAFETY: non-null results are `Box<Value>` handed out by
                // the FFI value constructors.
                drop(unsafe { Box::from_raw(result.cast::<Value>()) });
            }
        });
        // The compiled function's error path has already reported through
        // print-error; all that is left is reclaiming the context.
        // SAFETY: reclaim the box allocated above.
        drop(unsafe { Box::from_raw(ptr.cast::<CompiledContext>()) });
    }

    // -- embedded spec and plugins ----------------------------------------

    pub fn set_embedded_openapi(&self, json: impl Into<String>) {
        let mut slot = self.inner.embedded_openapi.lock().expect("runtime lock");
        *slot = Some(json.into());
    }

    pub fn embedded_openapi(&self) -> Option<String> {
        self.inner.embedded_openapi.lock().expect("runtime lock").clone()
    }

    /// Hook for precompiled plugin registration. Dynamic loading is out of
    /// scope; statically linked plugins register through the action
    /// registry before the program's main runs.
    pub fn load_precompiled_plugins(&self) -> usize {
        0
    }

    // -- shutdown ----------------------------------------------------------

    /// Wait for in-flight handlers before shutdown. Returns whether the
    /// bus drained within the window.
    pub fn await_pending_events(&self, timeout: Duration) -> bool {
        self.inner.bus.await_pending_events(timeout)
    }

    pub fn shutdown(&self) {
        // Handlers that are still running keep their clones of the inner
        // state alive; nothing to tear down eagerly.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    unsafe extern "C" fn probe_handler(ctx: *mut std::ffi::c_void) -> *mut std::ffi::c_void {
        let compiled = unsafe { &*ctx.cast::<CompiledContext>() };
        let payload = compiled.context().lookup("event").unwrap_or(Value::Null);
        compiled.context().bind("seen", payload);
        std::ptr::null_mut()
    }

    #[test]
    fn context_creation_shares_repositories() {
        let runtime = AroRuntime::new();
        let a = runtime.create_context("a");
        a.actions
            .repositories
            .lock()
            .unwrap()
            .insert("orders".into(), vec![Value::Int(1)]);
        let b = runtime.create_context("b");
        assert_eq!(
            b.actions.repositories.lock().unwrap()["orders"],
            vec![Value::Int(1)]
        );
    }

    #[test]
    fn registered_handler_runs_on_publish() {
        let runtime = AroRuntime::new();
        runtime.register_handler("Order-Placed", probe_handler);
        let payload = Value::Object(BTreeMap::from([("id".to_string(), Value::Int(4))]));
        runtime
            .bus()
            .publish_and_track(Event::new("Order-Placed", payload));
        // The handler ran to completion before publish_and_track returned;
        // its context is gone, but the call not crashing and the bus being
        // drained is the observable contract here.
        assert!(runtime.await_pending_events(Duration::from_secs(1)));
    }

    #[test]
    fn embedded_openapi_round_trips() {
        let runtime = AroRuntime::new();
        assert_eq!(runtime.embedded_openapi(), None);
        runtime.set_embedded_openapi("{\"openapi\":\"3.0.0\"}");
        assert_eq!(
            runtime.embedded_openapi().as_deref(),
            Some("{\"openapi\":\"3.0.0\"}")
        );
    }
}
