//! The C ABI consumed by emitted IR.
//!
//! Every helper the code generator declares has exactly one entry point
//! here. Handles cross the boundary as opaque pointers: the runtime as
//! `Box<AroRuntime>`, contexts as `Box<CompiledContext>`, and values as
//! `Box<Value>`. Descriptor layouts mirror the emitted
//! `%aro.ResultDescriptor` / `%aro.ObjectDescriptor` structs field for
//! field; the preposition integer is the stable encoding from `aro-core`.
//!
//! Ownership at the boundary:
//! - `*_create`/`resolve`/`array_get`/`dict_get`/`evaluate_expression`
//!   return owned `Box<Value>` pointers; callers release them with
//!   `aro_rt_value_destroy` or transfer them into `aro_rt_bind_value`.
//! - Descriptors and strings are borrowed for the duration of the call.

use std::ffi::{c_char, c_void, CStr};
use std::slice;
use std::str::FromStr;
use std::time::Duration;

use aro_core::ast::Preposition;
use aro_core::value::Value;

use crate::actions::{ObjectDescriptor, ResultDescriptor};
use crate::errors::RuntimeError;
use crate::eval;
use crate::runtime::{AroRuntime, CompiledContext, CompiledFeatureSetFn};

/// The result half of a statement as laid out in emitted IR:
/// `{ ptr base; ptr specifiers_array; i32 specifier_count }`.
#[repr(C)]
pub struct RawResultDescriptor {
    pub base: *const c_char,
    pub specifiers: *const *const c_char,
    pub specifier_count: i32,
}

/// The object half of a statement as laid out in emitted IR:
/// `{ ptr base; i32 preposition; ptr specifiers_array; i32 specifier_count }`.
#[repr(C)]
pub struct RawObjectDescriptor {
    pub base: *const c_char,
    pub preposition: i32,
    pub specifiers: *const *const c_char,
    pub specifier_count: i32,
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

unsafe fn read_str<'a>(ptr: *const c_char) -> &'a str {
    if ptr.is_null() {
        return "";
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().unwrap_or("")
}

unsafe fn read_specifiers(ptr: *const *const c_char, count: i32) -> Vec<String> {
    if ptr.is_null() || count <= 0 {
        return Vec::new();
    }
    unsafe { slice::from_raw_parts(ptr, count as usize) }
        .iter()
        .map(|&s| unsafe { read_str(s) }.to_string())
        .collect()
}

unsafe fn context<'a>(ctx: *mut c_void) -> &'a CompiledContext {
    unsafe { &*ctx.cast::<CompiledContext>() }
}

unsafe fn runtime<'a>(rt: *mut c_void) -> &'a AroRuntime {
    unsafe { &*rt.cast::<AroRuntime>() }
}

fn preposition_from(encoding: i32) -> Preposition {
    Preposition::all()
        .into_iter()
        .find(|p| p.encoding() == encoding)
        .unwrap_or(Preposition::From)
}

fn boxed(value: Value) -> *mut c_void {
    Box::into_raw(Box::new(value)).cast()
}

fn fail(ctx: &CompiledContext, error: RuntimeError) -> *mut c_void {
    ctx.context().set_error(error);
    std::ptr::null_mut()
}

unsafe fn parse_json(ctx: &CompiledContext, json: *const c_char) -> Option<serde_json::Value> {
    let text = unsafe { read_str(json) };
    match serde_json::from_str(text) {
        Ok(value) => Some(value),
        Err(e) => {
            ctx.context()
                .set_error(RuntimeError::Runtime(format!("malformed payload: {e}")));
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Runtime lifecycle
// ---------------------------------------------------------------------------

/// Allocate the process runtime.
#[no_mangle]
pub extern "C" fn aro_rt_init() -> *mut c_void {
    Box::into_raw(Box::new(AroRuntime::new())).cast()
}

/// Tear down the runtime handle.
///
/// # Safety
/// `rt` must be a pointer from [`aro_rt_init`], not used afterwards.
#[no_mangle]
pub extern "C" fn aro_rt_shutdown(rt: *mut c_void) {
    if rt.is_null() {
        return;
    }
    let runtime = unsafe { Box::from_raw(rt.cast::<AroRuntime>()) };
    runtime.shutdown();
}

/// Block until tracked handlers drain or `seconds` elapse. Returns 1 when
/// the bus drained in time.
#[no_mangle]
pub extern "C" fn aro_rt_await_pending_events(rt: *mut c_void, seconds: f64) -> i32 {
    let runtime = unsafe { runtime(rt) };
    i32::from(runtime.await_pending_events(Duration::from_secs_f64(seconds.max(0.0))))
}

/// Register the program's embedded OpenAPI document.
#[no_mangle]
pub extern "C" fn aro_rt_set_embedded_openapi(rt: *mut c_void, json: *const c_char) {
    let runtime = unsafe { runtime(rt) };
    runtime.set_embedded_openapi(unsafe { read_str(json) });
}

/// Register statically linked plugins. Returns how many registered.
#[no_mangle]
pub extern "C" fn aro_rt_load_precompiled_plugins(rt: *mut c_void) -> i32 {
    let runtime = unsafe { runtime(rt) };
    runtime.load_precompiled_plugins() as i32
}

/// Wire a compiled feature-set function as an event handler.
#[no_mangle]
pub extern "C" fn aro_rt_register_handler(
    rt: *mut c_void,
    event_type: *const c_char,
    function: CompiledFeatureSetFn,
) {
    let runtime = unsafe { runtime(rt) };
    runtime.register_handler(unsafe { read_str(event_type) }, function);
}

/// Wire a compiled feature-set function as a repository observer.
#[no_mangle]
pub extern "C" fn aro_rt_register_repository_observer(
    rt: *mut c_void,
    repository: *const c_char,
    function: CompiledFeatureSetFn,
) {
    let runtime = unsafe { runtime(rt) };
    runtime.register_repository_observer(unsafe { read_str(repository) }, function);
}

// ---------------------------------------------------------------------------
// Contexts
// ---------------------------------------------------------------------------

/// Create a named invocation context.
#[no_mangle]
pub extern "C" fn aro_rt_context_create(rt: *mut c_void, name: *const c_char) -> *mut c_void {
    let runtime = unsafe { runtime(rt) };
    Box::into_raw(runtime.create_context(unsafe { read_str(name) })).cast()
}

/// Destroy a context created with [`aro_rt_context_create`].
#[no_mangle]
pub extern "C" fn aro_rt_context_destroy(ctx: *mut c_void) {
    if !ctx.is_null() {
        drop(unsafe { Box::from_raw(ctx.cast::<CompiledContext>()) });
    }
}

/// Print the context's response value to stdout, if one was set.
#[no_mangle]
pub extern "C" fn aro_rt_context_print_response(ctx: *mut c_void) {
    unsafe { context(ctx) }.context().print_response();
}

/// Print the context's error to stderr, if one was recorded.
#[no_mangle]
pub extern "C" fn aro_rt_context_print_error(ctx: *mut c_void) {
    unsafe { context(ctx) }.context().print_error();
}

/// 1 when the context has recorded an error.
#[no_mangle]
pub extern "C" fn aro_rt_context_has_error(ctx: *mut c_void) -> i32 {
    i32::from(unsafe { context(ctx) }.context().has_error())
}

// ---------------------------------------------------------------------------
// Variable binding
// ---------------------------------------------------------------------------

#[no_mangle]
pub extern "C" fn aro_rt_bind_string(ctx: *mut c_void, name: *const c_char, value: *const c_char) {
    let compiled = unsafe { context(ctx) };
    compiled
        .context()
        .bind(unsafe { read_str(name) }, Value::Str(unsafe { read_str(value) }.to_string()));
}

#[no_mangle]
pub extern "C" fn aro_rt_bind_int(ctx: *mut c_void, name: *const c_char, value: i64) {
    let compiled = unsafe { context(ctx) };
    compiled.context().bind(unsafe { read_str(name) }, Value::Int(value));
}

#[no_mangle]
pub extern "C" fn aro_rt_bind_double(ctx: *mut c_void, name: *const c_char, value: f64) {
    let compiled = unsafe { context(ctx) };
    compiled.context().bind(unsafe { read_str(name) }, Value::Float(value));
}

#[no_mangle]
pub extern "C" fn aro_rt_bind_bool(ctx: *mut c_void, name: *const c_char, value: i32) {
    let compiled = unsafe { context(ctx) };
    compiled.context().bind(unsafe { read_str(name) }, Value::Bool(value != 0));
}

/// Bind an array literal given its plain JSON serialization.
#[no_mangle]
pub extern "C" fn aro_rt_bind_array(ctx: *mut c_void, name: *const c_char, json: *const c_char) {
    let compiled = unsafe { context(ctx) };
    if let Some(parsed) = unsafe { parse_json(compiled, json) } {
        compiled.context().bind(unsafe { read_str(name) }, Value::from_json(&parsed));
    }
}

/// Bind a map literal given its plain JSON serialization.
#[no_mangle]
pub extern "C" fn aro_rt_bind_dict(ctx: *mut c_void, name: *const c_char, json: *const c_char) {
    let compiled = unsafe { context(ctx) };
    if let Some(parsed) = unsafe { parse_json(compiled, json) } {
        compiled.context().bind(unsafe { read_str(name) }, Value::from_json(&parsed));
    }
}

/// Bind an owned value handle, consuming it.
///
/// # Safety
/// `value` must be an owned `Box<Value>` pointer; it is released here.
#[no_mangle]
pub extern "C" fn aro_rt_bind_value(ctx: *mut c_void, name: *const c_char, value: *mut c_void) {
    let compiled = unsafe { context(ctx) };
    if value.is_null() {
        compiled.context().bind(unsafe { read_str(name) }, Value::Null);
        return;
    }
    let value = unsafe { Box::from_raw(value.cast::<Value>()) };
    compiled.context().bind(unsafe { read_str(name) }, *value);
}

#[no_mangle]
pub extern "C" fn aro_rt_unbind(ctx: *mut c_void, name: *const c_char) {
    unsafe { context(ctx) }.context().unbind(unsafe { read_str(name) });
}

/// Resolve a variable (with specifiers) to an owned value handle. Null and
/// a recorded context error on failure.
#[no_mangle]
pub extern "C" fn aro_rt_resolve(
    ctx: *mut c_void,
    base: *const c_char,
    specifiers: *const *const c_char,
    specifier_count: i32,
) -> *mut c_void {
    let compiled = unsafe { context(ctx) };
    let specs = unsafe { read_specifiers(specifiers, specifier_count) };
    match compiled.context().resolve(unsafe { read_str(base) }, &specs) {
        Ok(value) => boxed(value),
        Err(error) => fail(compiled, error),
    }
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

#[no_mangle]
pub extern "C" fn aro_rt_value_create_int(value: i64) -> *mut c_void {
    boxed(Value::Int(value))
}

/// Release an owned value handle.
///
/// # Safety
/// `value` must be an owned `Box<Value>` pointer, not used afterwards.
#[no_mangle]
pub extern "C" fn aro_rt_value_destroy(value: *mut c_void) {
    if !value.is_null() {
        drop(unsafe { Box::from_raw(value.cast::<Value>()) });
    }
}

/// Element count of an array value (0 for anything else).
#[no_mangle]
pub extern "C" fn aro_rt_array_count(value: *const c_void) -> i64 {
    if value.is_null() {
        return 0;
    }
    match unsafe { &*value.cast::<Value>() } {
        Value::Array(items) => items.len() as i64,
        _ => 0,
    }
}

/// Owned clone of an array element; null when out of range.
#[no_mangle]
pub extern "C" fn aro_rt_array_get(value: *const c_void, index: i64) -> *mut c_void {
    if value.is_null() || index < 0 {
        return std::ptr::null_mut();
    }
    match unsafe { &*value.cast::<Value>() } {
        Value::Array(items) => items
            .get(index as usize)
            .map_or(std::ptr::null_mut(), |item| boxed(item.clone())),
        _ => std::ptr::null_mut(),
    }
}

/// Owned clone of an object member; null when absent.
#[no_mangle]
pub extern "C" fn aro_rt_dict_get(value: *const c_void, key: *const c_char) -> *mut c_void {
    if value.is_null() {
        return std::ptr::null_mut();
    }
    match unsafe { &*value.cast::<Value>() } {
        Value::Object(entries) => entries
            .get(unsafe { read_str(key) })
            .map_or(std::ptr::null_mut(), |item| boxed(item.clone())),
        _ => std::ptr::null_mut(),
    }
}

// ---------------------------------------------------------------------------
// Expression evaluation
// ---------------------------------------------------------------------------

/// Evaluate a serialized expression to an owned value handle. Null and a
/// recorded context error on failure.
#[no_mangle]
pub extern "C" fn aro_rt_evaluate_expression(ctx: *mut c_void, json: *const c_char) -> *mut c_void {
    let compiled = unsafe { context(ctx) };
    let Some(expr) = (unsafe { parse_json(compiled, json) }) else {
        return std::ptr::null_mut();
    };
    match eval::evaluate(compiled.context(), &expr) {
        Ok(value) => boxed(value),
        Err(error) => fail(compiled, error),
    }
}

/// Evaluate a serialized expression and bind the result. Returns 1 on
/// success.
#[no_mangle]
pub extern "C" fn aro_rt_evaluate_and_bind(
    ctx: *mut c_void,
    name: *const c_char,
    json: *const c_char,
) -> i32 {
    let compiled = unsafe { context(ctx) };
    let Some(expr) = (unsafe { parse_json(compiled, json) }) else {
        return 0;
    };
    match eval::evaluate(compiled.context(), &expr) {
        Ok(value) => {
            compiled.context().bind(unsafe { read_str(name) }, value);
            1
        }
        Err(error) => {
            compiled.context().set_error(error);
            0
        }
    }
}

/// Evaluate a `when` guard. A guard that fails to evaluate skips its
/// statement (returns 0) without recording an error.
#[no_mangle]
pub extern "C" fn aro_rt_evaluate_when_guard(ctx: *mut c_void, json: *const c_char) -> i32 {
    let compiled = unsafe { context(ctx) };
    let text = unsafe { read_str(json) };
    let Ok(expr) = serde_json::from_str::<serde_json::Value>(text) else {
        return 0;
    };
    i32::from(eval::evaluate_when_guard(compiled.context(), &expr))
}

/// Match a serialized subject against a serialized arm pattern. Returns 1
/// on match; evaluation failures record a context error and return 0.
#[no_mangle]
pub extern "C" fn aro_rt_match_pattern(
    ctx: *mut c_void,
    subject: *const c_char,
    pattern: *const c_char,
) -> i32 {
    let compiled = unsafe { context(ctx) };
    let (Some(subject), Some(pattern)) = (unsafe { parse_json(compiled, subject) }, unsafe {
        parse_json(compiled, pattern)
    }) else {
        return 0;
    };
    match eval::match_pattern(compiled.context(), &subject, &pattern) {
        Ok(matched) => i32::from(matched),
        Err(error) => {
            compiled.context().set_error(error);
            0
        }
    }
}

// ---------------------------------------------------------------------------
// Action dispatch
// ---------------------------------------------------------------------------

fn dispatch_action(
    ctx: *mut c_void,
    verb: &str,
    result: *const RawResultDescriptor,
    object: *const RawObjectDescriptor,
) -> *mut c_void {
    let compiled = unsafe { context(ctx) };
    if result.is_null() {
        return fail(
            compiled,
            RuntimeError::Runtime("missing result descriptor".into()),
        );
    }
    let raw_result = unsafe { &*result };
    let result_desc = ResultDescriptor {
        base: unsafe { read_str(raw_result.base) }.to_string(),
        specifiers: unsafe { read_specifiers(raw_result.specifiers, raw_result.specifier_count) },
    };
    let object_desc = if object.is_null() {
        None
    } else {
        let raw_object = unsafe { &*object };
        Some(ObjectDescriptor {
            base: unsafe { read_str(raw_object.base) }.to_string(),
            preposition: preposition_from(raw_object.preposition),
            specifiers: unsafe {
                read_specifiers(raw_object.specifiers, raw_object.specifier_count)
            },
        })
    };
    match compiled.runner.execute_blocking(
        verb,
        &result_desc,
        object_desc.as_ref(),
        &compiled.actions,
    ) {
        Ok(value) => boxed(value),
        Err(error) => fail(compiled, error),
    }
}

macro_rules! action_entry_points {
    ($(($fn_name:ident, $verb:literal)),+ $(,)?) => {
        $(
            /// Action entry point bound by verb in the emitted function
            /// table.
            #[no_mangle]
            pub extern "C" fn $fn_name(
                ctx: *mut c_void,
                result: *const RawResultDescriptor,
                object: *const RawObjectDescriptor,
            ) -> *mut c_void {
                dispatch_action(ctx, $verb, result, object)
            }
        )+
    };
}

action_entry_points![
    (aro_action_extract, "extract"),
    (aro_action_compute, "compute"),
    (aro_action_validate, "validate"),
    (aro_action_store, "store"),
    (aro_action_publish, "publish"),
    (aro_action_respond, "respond"),
    (aro_action_throw, "throw"),
    (aro_action_start, "start"),
    (aro_action_watch, "watch"),
];

/// Symbol name for a canonical verb's entry point, shared with the code
/// generator's action table.
pub fn action_symbol(canonical_verb: &str) -> String {
    format!("aro_action_{canonical_verb}")
}

/// Preposition helper for tests asserting the ABI table.
pub fn preposition_encoding(name: &str) -> Option<i32> {
    Preposition::from_str(name).ok().map(Preposition::encoding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    fn cstr(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    #[test]
    fn context_round_trip_through_the_abi() {
        let rt = aro_rt_init();
        let name = cstr("test");
        let ctx = aro_rt_context_create(rt, name.as_ptr());

        let var = cstr("count");
        aro_rt_bind_int(ctx, var.as_ptr(), 41);
        let expr = cstr(r#"{"$binary":{"op":"add","left":{"$var":"count"},"right":{"$lit":1}}}"#);
        let value = aro_rt_evaluate_expression(ctx, expr.as_ptr());
        assert!(!value.is_null());
        assert_eq!(unsafe { &*value.cast::<Value>() }, &Value::Int(42));
        aro_rt_value_destroy(value);

        assert_eq!(aro_rt_context_has_error(ctx), 0);
        aro_rt_context_destroy(ctx);
        aro_rt_shutdown(rt);
    }

    #[test]
    fn resolve_failure_sets_context_error() {
        let rt = aro_rt_init();
        let name = cstr("test");
        let ctx = aro_rt_context_create(rt, name.as_ptr());
        let base = cstr("ghost");
        let value = aro_rt_resolve(ctx, base.as_ptr(), std::ptr::null(), 0);
        assert!(value.is_null());
        assert_eq!(aro_rt_context_has_error(ctx), 1);
        aro_rt_context_destroy(ctx);
        aro_rt_shutdown(rt);
    }

    #[test]
    fn action_entry_point_runs_extract() {
        let rt = aro_rt_init();
        let name = cstr("test");
        let ctx = aro_rt_context_create(rt, name.as_ptr());

        let payload = cstr("request");
        let json = cstr(r#"{"user":"ada"}"#);
        aro_rt_bind_dict(ctx, payload.as_ptr(), json.as_ptr());

        let result_base = cstr("user");
        let result = RawResultDescriptor {
            base: result_base.as_ptr(),
            specifiers: std::ptr::null(),
            specifier_count: 0,
        };
        let object_base = cstr("request");
        let spec = cstr("user");
        let specs = [spec.as_ptr()];
        let object = RawObjectDescriptor {
            base: object_base.as_ptr(),
            preposition: 1, // from
            specifiers: specs.as_ptr(),
            specifier_count: 1,
        };
        let value = aro_action_extract(ctx, &result, &object);
        assert!(!value.is_null());
        assert_eq!(
            unsafe { &*value.cast::<Value>() },
            &Value::Str("ada".into())
        );
        aro_rt_value_destroy(value);
        assert_eq!(aro_rt_context_has_error(ctx), 0);
        aro_rt_context_destroy(ctx);
        aro_rt_shutdown(rt);
    }

    #[test]
    fn array_helpers_follow_the_loop_protocol() {
        let items = Box::into_raw(Box::new(Value::Array(vec![
            Value::Int(10),
            Value::Int(20),
        ])))
        .cast::<c_void>();
        assert_eq!(aro_rt_array_count(items), 2);
        let second = aro_rt_array_get(items, 1);
        assert_eq!(unsafe { &*second.cast::<Value>() }, &Value::Int(20));
        aro_rt_value_destroy(second);
        assert!(aro_rt_array_get(items, 5).is_null());
        aro_rt_value_destroy(items);
    }
}
