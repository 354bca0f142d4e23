//! The built-in action vocabulary.
//!
//! A closed, compile-time set covering the core verbs the code generator
//! can emit. Plugins register additional handlers through the same
//! registry; later registrations for a verb win.
//!
//! Actions read statement modifiers through the reserved variable names and
//! unbind them after consuming, so stale modifiers never leak into the next
//! statement.

use std::sync::Arc;

use aro_core::ast::Preposition;
use aro_core::reserved;
use aro_core::value::Value;

use crate::errors::RuntimeError;
use crate::eval::values_equal;
use crate::events::Event;

use super::{ActionContext, ActionHandler, ActionRegistry, ActionRole, ObjectDescriptor, ResultDescriptor};

/// Register every built-in action.
pub fn register_builtins(registry: &ActionRegistry) {
    registry.register(Arc::new(ExtractAction));
    registry.register(Arc::new(ComputeAction));
    registry.register(Arc::new(ValidateAction));
    registry.register(Arc::new(StoreAction));
    registry.register(Arc::new(PublishAction));
    registry.register(Arc::new(RespondAction));
    registry.register(Arc::new(ThrowAction));
    registry.register(Arc::new(StartAction));
    registry.register(Arc::new(WatchAction));
}

fn take_binding(ctx: &ActionContext, name: &str) -> Option<Value> {
    let value = ctx.context.lookup(name);
    if value.is_some() {
        ctx.context.unbind(name);
    }
    value
}

fn resolve_object(
    object: Option<&ObjectDescriptor>,
    ctx: &ActionContext,
) -> Result<Value, RuntimeError> {
    let object = object.ok_or_else(|| RuntimeError::Runtime("missing object".into()))?;
    ctx.context.resolve(&object.base, &object.specifiers)
}

// ---------------------------------------------------------------------------
// extract
// ---------------------------------------------------------------------------

/// `<Extract> the <user> from the <request>`: resolve a value out of a
/// bound variable, or satisfy a `require` statement's source.
pub struct ExtractAction;

impl ActionHandler for ExtractAction {
    fn role(&self) -> ActionRole {
        ActionRole::Request
    }

    fn verbs(&self) -> &'static [&'static str] {
        &["extract"]
    }

    fn valid_prepositions(&self) -> &'static [Preposition] {
        &[Preposition::From, Preposition::Via, Preposition::By]
    }

    fn execute(
        &self,
        result: &ResultDescriptor,
        object: Option<&ObjectDescriptor>,
        ctx: &ActionContext,
    ) -> Result<Value, RuntimeError> {
        // A lowered `require` statement arrives with the reserved pair bound.
        if let (Some(variable), Some(source)) = (
            ctx.context.lookup(reserved::REQUIRE_VARIABLE),
            ctx.context.lookup(reserved::REQUIRE_SOURCE),
        ) {
            ctx.context.unbind(reserved::REQUIRE_VARIABLE);
            ctx.context.unbind(reserved::REQUIRE_SOURCE);
            return extract_required(&variable, &source, ctx);
        }

        let object = object.ok_or_else(|| RuntimeError::Runtime("missing object".into()))?;
        let mut value = ctx.context.resolve(&object.base, &object.specifiers)?;
        if !result.specifiers.is_empty() {
            value = value.get_path(&result.specifiers).cloned().ok_or_else(|| {
                RuntimeError::PropertyNotFound {
                    base: result.base.clone(),
                    property: result.specifiers.join(": "),
                }
            })?;
        }
        Ok(value)
    }
}

fn extract_required(
    variable: &Value,
    source: &Value,
    ctx: &ActionContext,
) -> Result<Value, RuntimeError> {
    let Value::Str(name) = variable else {
        return Err(RuntimeError::Runtime("malformed require binding".into()));
    };
    match source {
        Value::Str(s) if s == "environment" => std::env::var(name)
            .map(Value::Str)
            .map_err(|_| RuntimeError::MissingService {
                service: name.clone(),
            }),
        // A feature-set source resolves to whatever that feature set has
        // already published into this context under its own name.
        Value::Str(feature_set) => ctx
            .context
            .lookup(feature_set)
            .ok_or_else(|| RuntimeError::FeatureSetNotFound(feature_set.clone())),
        _ => Err(RuntimeError::Runtime("malformed require binding".into())),
    }
}

// ---------------------------------------------------------------------------
// compute
// ---------------------------------------------------------------------------

/// `<Compute> the <total> from the <line-items>`: evaluate the statement's
/// expression, or aggregate over a collection using the query modifiers.
pub struct ComputeAction;

impl ActionHandler for ComputeAction {
    fn role(&self) -> ActionRole {
        ActionRole::Own
    }

    fn verbs(&self) -> &'static [&'static str] {
        &["compute"]
    }

    fn valid_prepositions(&self) -> &'static [Preposition] {
        &[
            Preposition::From,
            Preposition::For,
            Preposition::With,
            Preposition::Against,
            Preposition::By,
            Preposition::On,
        ]
    }

    fn execute(
        &self,
        _result: &ResultDescriptor,
        object: Option<&ObjectDescriptor>,
        ctx: &ActionContext,
    ) -> Result<Value, RuntimeError> {
        if let Some(value) = take_binding(ctx, reserved::RESULT_EXPRESSION) {
            return Ok(value);
        }
        let value = resolve_object(object, ctx)?;
        let filtered = apply_where(value, ctx)?;
        apply_aggregation(filtered, ctx)
    }
}

/// Filter an array of objects by the `where` modifier triple.
fn apply_where(value: Value, ctx: &ActionContext) -> Result<Value, RuntimeError> {
    let (Some(field), Some(op), Some(expected)) = (
        take_binding(ctx, reserved::WHERE_FIELD),
        take_binding(ctx, reserved::WHERE_OP),
        take_binding(ctx, reserved::WHERE_VALUE),
    ) else {
        return Ok(value);
    };
    let (Value::Str(field), Value::Str(op)) = (&field, &op) else {
        return Err(RuntimeError::Runtime("malformed where modifier".into()));
    };
    let Value::Array(items) = value else {
        return Err(RuntimeError::TypeMismatch {
            expected: "array".into(),
            actual: value.type_name().into(),
        });
    };
    let kept = items
        .into_iter()
        .filter(|item| {
            let Some(actual) = item.get_path(std::slice::from_ref(field)) else {
                return false;
            };
            match op.as_str() {
                "==" | "equals" => values_equal(actual, &expected),
                "!=" => !values_equal(actual, &expected),
                "<" => number(actual).zip(number(&expected)).is_some_and(|(a, b)| a < b),
                "<=" => number(actual).zip(number(&expected)).is_some_and(|(a, b)| a <= b),
                ">" => number(actual).zip(number(&expected)).is_some_and(|(a, b)| a > b),
                ">=" => number(actual).zip(number(&expected)).is_some_and(|(a, b)| a >= b),
                _ => false,
            }
        })
        .collect();
    Ok(Value::Array(kept))
}

fn apply_aggregation(value: Value, ctx: &ActionContext) -> Result<Value, RuntimeError> {
    let Some(kind) = take_binding(ctx, reserved::AGGREGATION_TYPE) else {
        return Ok(value);
    };
    let field = take_binding(ctx, reserved::AGGREGATION_FIELD);
    let Value::Str(kind) = &kind else {
        return Err(RuntimeError::Runtime("malformed aggregation modifier".into()));
    };
    let Value::Array(items) = &value else {
        return Err(RuntimeError::TypeMismatch {
            expected: "array".into(),
            actual: value.type_name().into(),
        });
    };
    if kind == "count" {
        return Ok(Value::Int(items.len() as i64));
    }
    let numbers: Vec<f64> = items
        .iter()
        .filter_map(|item| match (&field, item) {
            (Some(Value::Str(f)), Value::Object(_)) => {
                item.get_path(std::slice::from_ref(f)).and_then(number)
            }
            _ => number(item),
        })
        .collect();
    let folded = match kind.as_str() {
        "sum" => numbers.iter().sum::<f64>(),
        "average" => {
            if numbers.is_empty() {
                return Err(RuntimeError::Runtime("average of empty collection".into()));
            }
            numbers.iter().sum::<f64>() / numbers.len() as f64
        }
        "min" => numbers.iter().copied().fold(f64::INFINITY, f64::min),
        "max" => numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        other => {
            return Err(RuntimeError::Runtime(format!(
                "unknown aggregation '{other}'"
            )))
        }
    };
    Ok(Value::Float(folded))
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

/// `<Validate> the <input> against the <rules>`: fail the feature set when
/// the resolved value is null or falsy.
pub struct ValidateAction;

impl ActionHandler for ValidateAction {
    fn role(&self) -> ActionRole {
        ActionRole::Own
    }

    fn verbs(&self) -> &'static [&'static str] {
        &["validate"]
    }

    fn valid_prepositions(&self) -> &'static [Preposition] {
        &[
            Preposition::Against,
            Preposition::With,
            Preposition::From,
            Preposition::For,
        ]
    }

    fn execute(
        &self,
        result: &ResultDescriptor,
        object: Option<&ObjectDescriptor>,
        ctx: &ActionContext,
    ) -> Result<Value, RuntimeError> {
        let value = match object {
            Some(_) => resolve_object(object, ctx)?,
            None => ctx.context.resolve(&result.base, &result.specifiers)?,
        };
        if value.is_truthy() {
            Ok(value)
        } else {
            Err(RuntimeError::ValidationFailed(format!(
                "'{}' is empty",
                result.base
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// store
// ---------------------------------------------------------------------------

/// `<Store> the <user> into the <user-repository>`: append to a named
/// repository and notify its observers through the bus.
pub struct StoreAction;

/// Event-type prefix for repository change notifications. The runtime
/// subscribes registered observers under this prefix.
pub const REPOSITORY_EVENT_PREFIX: &str = "aro.repository.";

impl ActionHandler for StoreAction {
    fn role(&self) -> ActionRole {
        ActionRole::Own
    }

    fn verbs(&self) -> &'static [&'static str] {
        &["store"]
    }

    fn valid_prepositions(&self) -> &'static [Preposition] {
        &[Preposition::Into, Preposition::To, Preposition::On, Preposition::At]
    }

    fn execute(
        &self,
        result: &ResultDescriptor,
        object: Option<&ObjectDescriptor>,
        ctx: &ActionContext,
    ) -> Result<Value, RuntimeError> {
        let object = object.ok_or_else(|| RuntimeError::Runtime("missing repository".into()))?;
        let value = take_binding(ctx, reserved::RESULT_EXPRESSION)
            .map_or_else(|| ctx.context.resolve(&result.base, &result.specifiers), Ok)?;
        {
            let mut repositories = ctx.repositories.lock().expect("repository lock");
            repositories
                .entry(object.base.clone())
                .or_default()
                .push(value.clone());
        }
        ctx.bus.publish_tracked_detached(Event::new(
            format!("{REPOSITORY_EVENT_PREFIX}{}", object.base),
            value.clone(),
        ));
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// publish
// ---------------------------------------------------------------------------

/// `<Publish> the <order-placed> from the <order>`: put an event on the
/// bus. The statement returns immediately; handlers run as tracked tasks so
/// the shutdown barrier still waits for them.
pub struct PublishAction;

impl ActionHandler for PublishAction {
    fn role(&self) -> ActionRole {
        ActionRole::Export
    }

    fn verbs(&self) -> &'static [&'static str] {
        &["publish"]
    }

    fn valid_prepositions(&self) -> &'static [Preposition] {
        &[Preposition::From, Preposition::To, Preposition::Via, Preposition::On]
    }

    fn execute(
        &self,
        result: &ResultDescriptor,
        object: Option<&ObjectDescriptor>,
        ctx: &ActionContext,
    ) -> Result<Value, RuntimeError> {
        let event_type = match take_binding(ctx, reserved::PUBLISH_ALIAS) {
            Some(Value::Str(alias)) => alias,
            _ => result.base.clone(),
        };
        let payload = match take_binding(ctx, reserved::PUBLISH_VARIABLE) {
            Some(Value::Str(variable)) => ctx.context.resolve(&variable, &[])?,
            _ => match object {
                Some(object) => ctx.context.resolve(&object.base, &object.specifiers)?,
                None => ctx
                    .context
                    .resolve(&result.base, &result.specifiers)
                    .unwrap_or(Value::Null),
            },
        };
        ctx.bus
            .publish_tracked_detached(Event::new(event_type, payload.clone()));
        Ok(payload)
    }
}

// ---------------------------------------------------------------------------
// respond
// ---------------------------------------------------------------------------

/// `<Respond> with the <greeting>`: set the invocation's response value.
pub struct RespondAction;

impl ActionHandler for RespondAction {
    fn role(&self) -> ActionRole {
        ActionRole::Response
    }

    fn verbs(&self) -> &'static [&'static str] {
        &["respond"]
    }

    fn valid_prepositions(&self) -> &'static [Preposition] {
        &[Preposition::With, Preposition::To, Preposition::From]
    }

    fn execute(
        &self,
        result: &ResultDescriptor,
        object: Option<&ObjectDescriptor>,
        ctx: &ActionContext,
    ) -> Result<Value, RuntimeError> {
        let value = if let Some(expr) = take_binding(ctx, reserved::RESULT_EXPRESSION) {
            expr
        } else if object.is_some() {
            resolve_object(object, ctx)?
        } else {
            ctx.context.resolve(&result.base, &result.specifiers)?
        };
        ctx.context.set_response(value.clone());
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// throw
// ---------------------------------------------------------------------------

/// `<Throw> the <quota-exceeded> with "too many requests"`: raise an
/// explicit error carrying the thrown type and reason.
pub struct ThrowAction;

impl ActionHandler for ThrowAction {
    fn role(&self) -> ActionRole {
        ActionRole::Own
    }

    fn verbs(&self) -> &'static [&'static str] {
        &["throw"]
    }

    fn valid_prepositions(&self) -> &'static [Preposition] {
        &[Preposition::With, Preposition::For]
    }

    fn execute(
        &self,
        result: &ResultDescriptor,
        object: Option<&ObjectDescriptor>,
        ctx: &ActionContext,
    ) -> Result<Value, RuntimeError> {
        let reason = take_binding(ctx, reserved::RANGE_WITH)
            .or_else(|| take_binding(ctx, reserved::RESULT_EXPRESSION))
            .map(|v| v.to_string())
            .or_else(|| {
                object.and_then(|o| ctx.context.resolve(&o.base, &o.specifiers).ok())
                    .map(|v| v.to_string())
            })
            .unwrap_or_default();
        Err(RuntimeError::ExplicitThrow {
            thrown_type: result.base.clone(),
            reason,
        })
    }
}

// ---------------------------------------------------------------------------
// start / watch
// ---------------------------------------------------------------------------

/// `<Start> the <http-server> at <8080>`: register a long-lived event
/// source that keeps the runtime awake. The transport itself is provided
/// by a service plugin; the core only does the accounting.
pub struct StartAction;

impl ActionHandler for StartAction {
    fn role(&self) -> ActionRole {
        ActionRole::Own
    }

    fn verbs(&self) -> &'static [&'static str] {
        &["start"]
    }

    fn valid_prepositions(&self) -> &'static [Preposition] {
        &[Preposition::With, Preposition::For, Preposition::On, Preposition::At]
    }

    fn execute(
        &self,
        _result: &ResultDescriptor,
        _object: Option<&ObjectDescriptor>,
        ctx: &ActionContext,
    ) -> Result<Value, RuntimeError> {
        ctx.bus.add_event_source();
        Ok(Value::Null)
    }
}

/// `<Watch> the <orders>`: observe a repository as a long-lived source.
pub struct WatchAction;

impl ActionHandler for WatchAction {
    fn role(&self) -> ActionRole {
        ActionRole::Own
    }

    fn verbs(&self) -> &'static [&'static str] {
        &["watch"]
    }

    fn valid_prepositions(&self) -> &'static [Preposition] {
        &[Preposition::For, Preposition::On, Preposition::At]
    }

    fn execute(
        &self,
        _result: &ResultDescriptor,
        _object: Option<&ObjectDescriptor>,
        ctx: &ActionContext,
    ) -> Result<Value, RuntimeError> {
        ctx.bus.add_event_source();
        Ok(Value::Null)
    }
}
