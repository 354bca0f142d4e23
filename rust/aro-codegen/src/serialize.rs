//! Expression serialization.
//!
//! Expressions that survive constant folding are handed to the runtime
//! evaluator as compact JSON. The shapes here are the other half of the
//! runtime's `eval` contract:
//!
//! | AST form            | JSON shape |
//! |---------------------|------------|
//! | literal             | `{"$lit": <json>}` |
//! | variable ref        | `{"$var": "base", "$specs": [...]}` (specs omitted when empty) |
//! | binary              | `{"$binary": {"op", "left", "right"}}` |
//! | unary               | `{"$unary": {"op", "operand"}}` |
//! | interpolated string | `{"$interpolated": "..."}` |
//! | member access       | `{"$member": {"base", "member"}}` |
//! | subscript           | `{"$subscript": {"base", "index"}}` |
//! | grouped             | the inner expression |
//! | existence           | `{"$exists": <expr>}` |
//! | type check          | `{"$typeCheck": {"expr", "type"}}` |
//!
//! Array and map literals serialize as plain containers whose elements
//! keep their shapes. Collection literals bound through the array/dict
//! bind helpers use [`literal_plain_json`], which carries no markers at
//! all.

use serde_json::{json, Value as Json};

use aro_compiler::fold;
use aro_core::ast::{Expression, LiteralValue, QualifiedNoun, ValueSource};

/// Serialize an expression for the runtime evaluator.
pub fn expression_to_json(expr: &Expression) -> Json {
    match expr {
        Expression::Literal(lit) => json!({ "$lit": lit.to_json() }),
        Expression::VariableRef(noun) => variable_ref_json(noun),
        Expression::Binary { op, left, right } => json!({
            "$binary": {
                "op": op.to_string(),
                "left": expression_to_json(left),
                "right": expression_to_json(right),
            }
        }),
        Expression::Unary { op, operand } => json!({
            "$unary": {
                "op": op.to_string(),
                "operand": expression_to_json(operand),
            }
        }),
        Expression::Grouped(inner) => expression_to_json(inner),
        Expression::InterpolatedString(template) => json!({ "$interpolated": template }),
        Expression::ArrayLiteral(items) => {
            Json::Array(items.iter().map(expression_to_json).collect())
        }
        Expression::MapLiteral(entries) => Json::Object(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), expression_to_json(value)))
                .collect(),
        ),
        Expression::MemberAccess { base, member } => json!({
            "$member": {
                "base": expression_to_json(base),
                "member": member,
            }
        }),
        Expression::Subscript { base, index } => json!({
            "$subscript": {
                "base": expression_to_json(base),
                "index": expression_to_json(index),
            }
        }),
        Expression::Existence(inner) => json!({ "$exists": expression_to_json(inner) }),
        Expression::TypeCheck { expr, type_name } => json!({
            "$typeCheck": {
                "expr": expression_to_json(expr),
                "type": type_name,
            }
        }),
    }
}

/// The `$var` shape for a qualified noun, used both for expression
/// operands and for match subjects.
pub fn variable_ref_json(noun: &QualifiedNoun) -> Json {
    if noun.specifiers.is_empty() {
        json!({ "$var": noun.base })
    } else {
        json!({ "$var": noun.base, "$specs": noun.specifiers })
    }
}

/// Plain serialization (no `$lit` wrappers) for collection literals bound
/// via the array/dict bind helpers.
pub fn literal_plain_json(literal: &LiteralValue) -> Json {
    literal.to_json()
}

/// The serialized text the lowering interns and hands to the runtime.
/// `serde_json` produces the escaping the evaluator expects
/// (backslash, quote, newline, carriage return, tab).
pub fn to_text(json: &Json) -> String {
    json.to_string()
}

/// What a value source lowers to, after consulting the constant folder.
///
/// Both the string-collection pre-pass and the statement lowering resolve
/// sources through this one function, so the strings the lowering looks up
/// are exactly the strings the pre-pass interned.
#[derive(Debug, Clone, PartialEq)]
pub enum LoweredValueSource {
    None,
    /// Bind the literal under the result base, by kind.
    Literal(LiteralValue),
    /// Evaluate at runtime and bind under the result base.
    Expression(Json),
    /// Evaluate-and-bind to the reserved result-expression name.
    Sink(Json),
    /// A sink whose expression folded; bound to the reserved name by kind.
    SinkLiteral(LiteralValue),
}

pub fn lowered_value_source(source: &ValueSource) -> LoweredValueSource {
    match source {
        ValueSource::None => LoweredValueSource::None,
        ValueSource::Literal(literal) => LoweredValueSource::Literal(literal.clone()),
        ValueSource::Expression(expr) => match fold::evaluate(expr) {
            Some(literal) => LoweredValueSource::Literal(literal),
            None => LoweredValueSource::Expression(expression_to_json(expr)),
        },
        ValueSource::Sink(expr) => match fold::evaluate(expr) {
            Some(literal) => LoweredValueSource::SinkLiteral(literal),
            None => LoweredValueSource::Sink(expression_to_json(expr)),
        },
    }
}
