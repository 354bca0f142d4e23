//! Serialized-expression evaluation.
//!
//! The code generator serializes every expression it cannot fold into a
//! compact JSON form (`$lit`, `$var`, `$binary`, …). This module is the
//! runtime half of that contract: it walks the JSON against an execution
//! context and produces a [`Value`].
//!
//! Plain JSON without a `$` marker evaluates to itself; that is the shape
//! used for collection literals bound via the array/dict bind helpers.

use std::collections::BTreeMap;

use serde_json::Value as Json;

use aro_core::value::Value;

use crate::context::ExecutionContext;
use crate::errors::RuntimeError;

/// Evaluate a serialized expression against a context.
pub fn evaluate(ctx: &ExecutionContext, expr: &Json) -> Result<Value, RuntimeError> {
    let map = match expr {
        // Array-literal expressions keep their element shapes, so each
        // element evaluates on its own.
        Json::Array(items) => {
            let values: Result<Vec<Value>, RuntimeError> =
                items.iter().map(|item| evaluate(ctx, item)).collect();
            return values.map(Value::Array);
        }
        Json::Object(map) => map,
        other => return Ok(Value::from_json(other)),
    };

    if let Some(lit) = map.get("$lit") {
        return Ok(Value::from_json(lit));
    }
    if let Some(var) = map.get("$var") {
        let base = var.as_str().ok_or_else(|| malformed("$var"))?;
        let specs: Vec<String> = map
            .get("$specs")
            .and_then(Json::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Json::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        return ctx.resolve(base, &specs);
    }
    if let Some(binary) = map.get("$binary") {
        let op = binary
            .get("op")
            .and_then(Json::as_str)
            .ok_or_else(|| malformed("$binary"))?;
        let left = evaluate(ctx, binary.get("left").ok_or_else(|| malformed("$binary"))?)?;
        let right = evaluate(ctx, binary.get("right").ok_or_else(|| malformed("$binary"))?)?;
        return apply_binary(op, left, right);
    }
    if let Some(unary) = map.get("$unary") {
        let op = unary
            .get("op")
            .and_then(Json::as_str)
            .ok_or_else(|| malformed("$unary"))?;
        let operand = evaluate(ctx, unary.get("operand").ok_or_else(|| malformed("$unary"))?)?;
        return apply_unary(op, operand);
    }
    if let Some(template) = map.get("$interpolated") {
        let template = template.as_str().ok_or_else(|| malformed("$interpolated"))?;
        return interpolate(ctx, template).map(Value::Str);
    }
    if let Some(member) = map.get("$member") {
        let base = evaluate(ctx, member.get("base").ok_or_else(|| malformed("$member"))?)?;
        let name = member
            .get("member")
            .and_then(Json::as_str)
            .ok_or_else(|| malformed("$member"))?;
        return member_of(&base, name);
    }
    if let Some(subscript) = map.get("$subscript") {
        let base = evaluate(ctx, subscript.get("base").ok_or_else(|| malformed("$subscript"))?)?;
        let index = evaluate(ctx, subscript.get("index").ok_or_else(|| malformed("$subscript"))?)?;
        return subscript_of(&base, &index);
    }
    if let Some(inner) = map.get("$exists") {
        return Ok(Value::Bool(evaluate(ctx, inner).is_ok()));
    }
    if let Some(check) = map.get("$typeCheck") {
        let value = evaluate(ctx, check.get("expr").ok_or_else(|| malformed("$typeCheck"))?)?;
        let wanted = check
            .get("type")
            .and_then(Json::as_str)
            .ok_or_else(|| malformed("$typeCheck"))?;
        return Ok(Value::Bool(type_matches(&value, wanted)));
    }

    // An object with no marker is a plain map literal.
    let mut entries = BTreeMap::new();
    for (key, value) in map {
        entries.insert(key.clone(), evaluate(ctx, value)?);
    }
    Ok(Value::Object(entries))
}

/// Evaluate a `when` guard: truthiness of the evaluated expression. A guard
/// that fails to evaluate skips its statement rather than halting.
pub fn evaluate_when_guard(ctx: &ExecutionContext, expr: &Json) -> bool {
    evaluate(ctx, expr).map(|v| v.is_truthy()).unwrap_or(false)
}

/// Match a subject against an arm pattern.
///
/// Patterns compare structurally (with int/float promotion). A string
/// pattern additionally matches an error payload whose `kind` equals it,
/// which is how arms pattern-match error kinds.
pub fn match_pattern(
    ctx: &ExecutionContext,
    subject: &Json,
    pattern: &Json,
) -> Result<bool, RuntimeError> {
    let subject = evaluate(ctx, subject)?;
    let pattern = evaluate(ctx, pattern)?;
    if let (Value::Object(entries), Value::Str(wanted)) = (&subject, &pattern) {
        if let Some(Value::Str(kind)) = entries.get("kind") {
            if kind == wanted {
                return Ok(true);
            }
        }
    }
    Ok(values_equal(&subject, &pattern))
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

fn apply_binary(op: &str, lhs: Value, rhs: Value) -> Result<Value, RuntimeError> {
    match op {
        "add" => match (&lhs, &rhs) {
            (Value::Int(a), Value::Int(b)) => checked_int(a.checked_add(*b), "addition"),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
            _ => numeric(&lhs, &rhs, "add").map(|(a, b)| Value::Float(a + b)),
        },
        "subtract" => match (&lhs, &rhs) {
            (Value::Int(a), Value::Int(b)) => checked_int(a.checked_sub(*b), "subtraction"),
            _ => numeric(&lhs, &rhs, "subtract").map(|(a, b)| Value::Float(a - b)),
        },
        "multiply" => match (&lhs, &rhs) {
            (Value::Int(a), Value::Int(b)) => checked_int(a.checked_mul(*b), "multiplication"),
            _ => numeric(&lhs, &rhs, "multiply").map(|(a, b)| Value::Float(a * b)),
        },
        "divide" => match (&lhs, &rhs) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_div(*b)
                .map(Value::Int)
                .ok_or_else(|| RuntimeError::Runtime("division by zero".into())),
            _ => {
                let (a, b) = numeric(&lhs, &rhs, "divide")?;
                if b == 0.0 {
                    Err(RuntimeError::Runtime("division by zero".into()))
                } else {
                    Ok(Value::Float(a / b))
                }
            }
        },
        "modulo" => match (&lhs, &rhs) {
            (Value::Int(a), Value::Int(b)) => a
                .checked_rem(*b)
                .map(Value::Int)
                .ok_or_else(|| RuntimeError::Runtime("modulo by zero".into())),
            _ => Err(type_mismatch("integer", &lhs)),
        },
        "equal" | "is" => Ok(Value::Bool(values_equal(&lhs, &rhs))),
        "not_equal" | "is_not" => Ok(Value::Bool(!values_equal(&lhs, &rhs))),
        "less_than" => ordering(&lhs, &rhs).map(|ord| Value::Bool(ord.is_lt())),
        "less_than_or_equal" => ordering(&lhs, &rhs).map(|ord| Value::Bool(ord.is_le())),
        "greater_than" => ordering(&lhs, &rhs).map(|ord| Value::Bool(ord.is_gt())),
        "greater_than_or_equal" => ordering(&lhs, &rhs).map(|ord| Value::Bool(ord.is_ge())),
        "and" => match (&lhs, &rhs) {
            (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(*a && *b)),
            _ => Err(type_mismatch("boolean", if matches!(lhs, Value::Bool(_)) { &rhs } else { &lhs })),
        },
        "or" => match (&lhs, &rhs) {
            (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(*a || *b)),
            _ => Err(type_mismatch("boolean", if matches!(lhs, Value::Bool(_)) { &rhs } else { &lhs })),
        },
        "concat" => Ok(Value::Str(format!("{lhs}{rhs}"))),
        "contains" => contains(&lhs, &rhs),
        "matches" => {
            let (Value::Str(text), Value::Str(pattern)) = (&lhs, &rhs) else {
                return Err(type_mismatch("string", if matches!(lhs, Value::Str(_)) { &rhs } else { &lhs }));
            };
            let re = regex::Regex::new(pattern)
                .map_err(|e| RuntimeError::Runtime(format!("invalid pattern '{pattern}': {e}")))?;
            Ok(Value::Bool(re.is_match(text)))
        }
        other => Err(RuntimeError::Runtime(format!("unknown operator '{other}'"))),
    }
}

fn apply_unary(op: &str, operand: Value) -> Result<Value, RuntimeError> {
    match (op, &operand) {
        ("not", Value::Bool(b)) => Ok(Value::Bool(!b)),
        ("not", other) => Err(type_mismatch("boolean", other)),
        ("negate", Value::Int(i)) => checked_int(i.checked_neg(), "negation"),
        ("negate", Value::Float(f)) => Ok(Value::Float(-f)),
        ("negate", other) => Err(type_mismatch("number", other)),
        (other, _) => Err(RuntimeError::Runtime(format!("unknown operator '{other}'"))),
    }
}

/// Structural equality with int/float promotion. Cross-kind pairs are
/// unequal, never an error.
pub fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .zip(b)
                    .all(|((ka, va), (kb, vb))| ka == kb && values_equal(va, vb))
        }
        _ => lhs == rhs,
    }
}

fn ordering(lhs: &Value, rhs: &Value) -> Result<std::cmp::Ordering, RuntimeError> {
    let ord = match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => None,
    };
    ord.ok_or_else(|| {
        RuntimeError::ComparisonFailed(format!(
            "cannot order {} against {}",
            lhs.type_name(),
            rhs.type_name()
        ))
    })
}

fn contains(lhs: &Value, rhs: &Value) -> Result<Value, RuntimeError> {
    match (lhs, rhs) {
        (Value::Str(haystack), Value::Str(needle)) => Ok(Value::Bool(haystack.contains(needle))),
        (Value::Array(items), needle) => {
            Ok(Value::Bool(items.iter().any(|item| values_equal(item, needle))))
        }
        (Value::Object(entries), Value::Str(key)) => Ok(Value::Bool(entries.contains_key(key))),
        _ => Err(type_mismatch("string, array, or object", lhs)),
    }
}

// ---------------------------------------------------------------------------
// Resolution forms
// ---------------------------------------------------------------------------

fn member_of(base: &Value, name: &str) -> Result<Value, RuntimeError> {
    match base {
        Value::Object(entries) => entries.get(name).cloned().ok_or_else(|| {
            RuntimeError::PropertyNotFound {
                base: base.type_name().to_string(),
                property: name.to_string(),
            }
        }),
        _ => Err(type_mismatch("object", base)),
    }
}

fn subscript_of(base: &Value, index: &Value) -> Result<Value, RuntimeError> {
    match (base, index) {
        (Value::Array(items), Value::Int(i)) => {
            let idx = usize::try_from(*i).ok();
            idx.and_then(|i| items.get(i))
                .cloned()
                .ok_or_else(|| RuntimeError::Runtime(format!("index {i} out of bounds")))
        }
        (Value::Object(entries), Value::Str(key)) => {
            entries
                .get(key)
                .cloned()
                .ok_or_else(|| RuntimeError::PropertyNotFound {
                    base: "object".to_string(),
                    property: key.clone(),
                })
        }
        (Value::Array(_), other) => Err(type_mismatch("integer", other)),
        (other, _) => Err(type_mismatch("array or object", other)),
    }
}

/// Expand `${var}` markers. Dotted names traverse into nested values.
fn interpolate(ctx: &ExecutionContext, template: &str) -> Result<String, RuntimeError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let path = &after[..end];
        let mut segments = path.split('.');
        let base = segments.next().unwrap_or_default();
        let specs: Vec<String> = segments.map(str::to_string).collect();
        let value = ctx.resolve(base, &specs)?;
        out.push_str(&value.to_string());
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn type_matches(value: &Value, wanted: &str) -> bool {
    match wanted {
        "number" => matches!(value, Value::Int(_) | Value::Float(_)),
        other => value.type_name() == other,
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn checked_int(result: Option<i64>, what: &str) -> Result<Value, RuntimeError> {
    result
        .map(Value::Int)
        .ok_or_else(|| RuntimeError::Runtime(format!("integer overflow in {what}")))
}

fn numeric(lhs: &Value, rhs: &Value, op: &str) -> Result<(f64, f64), RuntimeError> {
    let promote = |v: &Value| match v {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    };
    match (promote(lhs), promote(rhs)) {
        (Some(a), Some(b)) => Ok((a, b)),
        (None, _) => Err(RuntimeError::TypeMismatch {
            expected: format!("number for '{op}'"),
            actual: lhs.type_name().to_string(),
        }),
        (_, None) => Err(RuntimeError::TypeMismatch {
            expected: format!("number for '{op}'"),
            actual: rhs.type_name().to_string(),
        }),
    }
}

fn type_mismatch(expected: &str, actual: &Value) -> RuntimeError {
    RuntimeError::TypeMismatch {
        expected: expected.to_string(),
        actual: actual.type_name().to_string(),
    }
}

fn malformed(marker: &str) -> RuntimeError {
    RuntimeError::Runtime(format!("malformed serialized expression: bad {marker}"))
}
