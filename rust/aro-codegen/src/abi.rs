//! The runtime ABI as seen from emitted code.
//!
//! One declaration per runtime helper, the two descriptor struct layouts,
//! and the verb → action-symbol table. Descriptor layouts and the
//! preposition encoding are bit-exact contracts with the runtime; the
//! runtime's `#[repr(C)]` structs mirror these fields one for one.

use aro_core::verbs::canonicalize;

use crate::ir::{Module, Type};

/// `{ ptr base; ptr specifiers_array; i32 specifier_count }`
pub const RESULT_DESCRIPTOR: &str = "aro.ResultDescriptor";

/// `{ ptr base; i32 preposition; ptr specifiers_array; i32 specifier_count }`
pub const OBJECT_DESCRIPTOR: &str = "aro.ObjectDescriptor";

/// The internal global holding the runtime handle.
pub const RUNTIME_GLOBAL: &str = "aro.runtime";

// Runtime entry points. Each helper has exactly one symbol.
pub const RT_INIT: &str = "aro_rt_init";
pub const RT_SHUTDOWN: &str = "aro_rt_shutdown";
pub const RT_AWAIT_PENDING_EVENTS: &str = "aro_rt_await_pending_events";
pub const RT_SET_EMBEDDED_OPENAPI: &str = "aro_rt_set_embedded_openapi";
pub const RT_LOAD_PRECOMPILED_PLUGINS: &str = "aro_rt_load_precompiled_plugins";
pub const RT_REGISTER_HANDLER: &str = "aro_rt_register_handler";
pub const RT_REGISTER_REPOSITORY_OBSERVER: &str = "aro_rt_register_repository_observer";
pub const RT_CONTEXT_CREATE: &str = "aro_rt_context_create";
pub const RT_CONTEXT_DESTROY: &str = "aro_rt_context_destroy";
pub const RT_CONTEXT_PRINT_RESPONSE: &str = "aro_rt_context_print_response";
pub const RT_CONTEXT_PRINT_ERROR: &str = "aro_rt_context_print_error";
pub const RT_CONTEXT_HAS_ERROR: &str = "aro_rt_context_has_error";
pub const RT_BIND_STRING: &str = "aro_rt_bind_string";
pub const RT_BIND_INT: &str = "aro_rt_bind_int";
pub const RT_BIND_DOUBLE: &str = "aro_rt_bind_double";
pub const RT_BIND_BOOL: &str = "aro_rt_bind_bool";
pub const RT_BIND_ARRAY: &str = "aro_rt_bind_array";
pub const RT_BIND_DICT: &str = "aro_rt_bind_dict";
pub const RT_BIND_VALUE: &str = "aro_rt_bind_value";
pub const RT_UNBIND: &str = "aro_rt_unbind";
pub const RT_RESOLVE: &str = "aro_rt_resolve";
pub const RT_EVALUATE_EXPRESSION: &str = "aro_rt_evaluate_expression";
pub const RT_EVALUATE_AND_BIND: &str = "aro_rt_evaluate_and_bind";
pub const RT_EVALUATE_WHEN_GUARD: &str = "aro_rt_evaluate_when_guard";
pub const RT_MATCH_PATTERN: &str = "aro_rt_match_pattern";
pub const RT_ARRAY_COUNT: &str = "aro_rt_array_count";
pub const RT_ARRAY_GET: &str = "aro_rt_array_get";
pub const RT_DICT_GET: &str = "aro_rt_dict_get";
pub const RT_VALUE_CREATE_INT: &str = "aro_rt_value_create_int";
pub const RT_VALUE_DESTROY: &str = "aro_rt_value_destroy";

/// The verbs with a compiled action entry point. A statement whose
/// canonical verb is not in this table is an unknown-verb diagnostic.
pub const ACTION_VERBS: [&str; 9] = [
    "extract", "compute", "validate", "store", "publish", "respond", "throw", "start", "watch",
];

/// The action symbol bound to a verb, if the verb resolves to a known
/// action.
pub fn action_symbol(verb: &str) -> Option<String> {
    let canonical = canonicalize(verb);
    ACTION_VERBS
        .contains(&canonical.as_str())
        .then(|| format!("aro_action_{canonical}"))
}

/// Define the descriptor struct types and declare every runtime helper and
/// action entry point in the module.
pub fn declare_runtime(module: &mut Module) {
    module.define_struct(
        RESULT_DESCRIPTOR,
        vec![Type::Ptr, Type::Ptr, Type::I32],
    );
    module.define_struct(
        OBJECT_DESCRIPTOR,
        vec![Type::Ptr, Type::I32, Type::Ptr, Type::I32],
    );
    module.add_ptr_global(RUNTIME_GLOBAL);

    use Type::{F64, I32, I64, Ptr, Void};
    let declarations: &[(&str, Type, Vec<Type>)] = &[
        (RT_INIT, Ptr, vec![]),
        (RT_SHUTDOWN, Void, vec![Ptr]),
        (RT_AWAIT_PENDING_EVENTS, I32, vec![Ptr, F64]),
        (RT_SET_EMBEDDED_OPENAPI, Void, vec![Ptr, Ptr]),
        (RT_LOAD_PRECOMPILED_PLUGINS, I32, vec![Ptr]),
        (RT_REGISTER_HANDLER, Void, vec![Ptr, Ptr, Ptr]),
        (RT_REGISTER_REPOSITORY_OBSERVER, Void, vec![Ptr, Ptr, Ptr]),
        (RT_CONTEXT_CREATE, Ptr, vec![Ptr, Ptr]),
        (RT_CONTEXT_DESTROY, Void, vec![Ptr]),
        (RT_CONTEXT_PRINT_RESPONSE, Void, vec![Ptr]),
        (RT_CONTEXT_PRINT_ERROR, Void, vec![Ptr]),
        (RT_CONTEXT_HAS_ERROR, I32, vec![Ptr]),
        (RT_BIND_STRING, Void, vec![Ptr, Ptr, Ptr]),
        (RT_BIND_INT, Void, vec![Ptr, Ptr, I64]),
        (RT_BIND_DOUBLE, Void, vec![Ptr, Ptr, F64]),
        (RT_BIND_BOOL, Void, vec![Ptr, Ptr, I32]),
        (RT_BIND_ARRAY, Void, vec![Ptr, Ptr, Ptr]),
        (RT_BIND_DICT, Void, vec![Ptr, Ptr, Ptr]),
        (RT_BIND_VALUE, Void, vec![Ptr, Ptr, Ptr]),
        (RT_UNBIND, Void, vec![Ptr, Ptr]),
        (RT_RESOLVE, Ptr, vec![Ptr, Ptr, Ptr, I32]),
        (RT_EVALUATE_EXPRESSION, Ptr, vec![Ptr, Ptr]),
        (RT_EVALUATE_AND_BIND, I32, vec![Ptr, Ptr, Ptr]),
        (RT_EVALUATE_WHEN_GUARD, I32, vec![Ptr, Ptr]),
        (RT_MATCH_PATTERN, I32, vec![Ptr, Ptr, Ptr]),
        (RT_ARRAY_COUNT, I64, vec![Ptr]),
        (RT_ARRAY_GET, Ptr, vec![Ptr, I64]),
        (RT_DICT_GET, Ptr, vec![Ptr, Ptr]),
        (RT_VALUE_CREATE_INT, Ptr, vec![I64]),
        (RT_VALUE_DESTROY, Void, vec![Ptr]),
    ];
    for (name, ret, params) in declarations {
        module.declare_extern(name, ret.clone(), params.clone());
    }
    for verb in ACTION_VERBS {
        module.declare_extern(&format!("aro_action_{verb}"), Ptr, vec![Ptr, Ptr, Ptr]);
    }
}
