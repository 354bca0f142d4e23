//! The string-constant pool and its collection pre-pass.
//!
//! Lowering never creates string constants on the fly: it looks every
//! string up by content and treats a miss as an internal error. The
//! pre-pass therefore has to walk the program and intern everything the
//! lowering will reference — reserved names, noun bases and specifiers,
//! literal contents, serialized expression/pattern JSON, registration
//! strings, and the embedded OpenAPI document. The pool deduplicates by
//! content.

use indexmap::IndexMap;

use aro_core::ast::{
    AnalyzedProgram, Expression, LiteralValue, QualifiedNoun, RequireSource, Statement,
    ValueSource,
};
use aro_core::reserved;

use crate::serialize::{expression_to_json, to_text, variable_ref_json};

/// Content-deduplicated pool of string constants.
#[derive(Debug, Default)]
pub struct StringPool {
    entries: IndexMap<String, String>,
}

impl StringPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning its global name.
    pub fn intern(&mut self, content: &str) -> String {
        if let Some(name) = self.entries.get(content) {
            return name.clone();
        }
        let name = format!(".str.{}", self.entries.len());
        self.entries.insert(content.to_string(), name.clone());
        name
    }

    /// Look up an interned string. Lowering treats `None` as an internal
    /// error: the pre-pass missed something.
    pub fn get(&self, content: &str) -> Option<&str> {
        self.entries.get(content).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(content, global_name)` pairs in interning order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Walk the program and intern every string the lowering will need.
pub fn collect_program_strings(
    program: &AnalyzedProgram,
    embedded_openapi: Option<&str>,
    pool: &mut StringPool,
) {
    for name in reserved::ALL {
        pool.intern(name);
    }
    for feature_set in &program.feature_sets {
        pool.intern(&feature_set.name);
        pool.intern(&feature_set.business_activity);
        if let Some(event_type) = feature_set.handler_event_type() {
            pool.intern(event_type);
        }
        if let Some(repository) = feature_set.observed_repository() {
            pool.intern(repository);
        }
        collect_statements(&feature_set.statements, pool);
    }
    if let Some(json) = embedded_openapi {
        pool.intern(json);
    }
}

fn collect_statements(statements: &[Statement], pool: &mut StringPool) {
    for statement in statements {
        match statement {
            Statement::Action {
                result,
                object,
                value,
                query,
                range,
                guard,
                ..
            } => {
                collect_noun(result, pool);
                if let Some(object) = object {
                    collect_noun(&object.noun, pool);
                }
                collect_value_source(value, pool);
                if let Some(guard) = guard {
                    collect_expression_json(guard, pool);
                }
                for text in [
                    query.where_field.as_deref(),
                    query.where_op.as_deref(),
                    query.aggregation_type.as_deref(),
                    query.aggregation_field.as_deref(),
                    query.by_pattern.as_deref(),
                    query.by_flags.as_deref(),
                ]
                .into_iter()
                .flatten()
                {
                    pool.intern(text);
                }
                for literal in [
                    query.where_value.as_ref(),
                    range.to.as_ref(),
                    range.with.as_ref(),
                ]
                .into_iter()
                .flatten()
                {
                    collect_literal(literal, pool);
                }
            }
            Statement::Match {
                subject,
                cases,
                otherwise,
                ..
            } => {
                pool.intern(&to_text(&variable_ref_json(subject)));
                for case in cases {
                    collect_expression_json(&case.pattern, pool);
                    collect_statements(&case.body, pool);
                }
                if let Some(body) = otherwise {
                    collect_statements(body, pool);
                }
            }
            Statement::ForEach {
                item,
                index,
                collection,
                filter,
                body,
                ..
            } => {
                pool.intern(item);
                if let Some(index) = index {
                    pool.intern(index);
                }
                collect_noun(collection, pool);
                if let Some(filter) = filter {
                    collect_expression_json(filter, pool);
                }
                collect_statements(body, pool);
            }
            Statement::Publish {
                external_name,
                internal_variable,
                ..
            } => {
                pool.intern(external_name);
                pool.intern(internal_variable);
            }
            Statement::Require {
                variable, source, ..
            } => match source {
                // Framework requires lower to nothing.
                RequireSource::Framework => {}
                RequireSource::Environment => {
                    pool.intern(variable);
                    pool.intern("environment");
                }
                RequireSource::FeatureSet(name) => {
                    pool.intern(variable);
                    pool.intern(name);
                }
            },
        }
    }
}

fn collect_noun(noun: &QualifiedNoun, pool: &mut StringPool) {
    pool.intern(&noun.base);
    for specifier in &noun.specifiers {
        pool.intern(specifier);
    }
}

/// Intern the serialized form of an expression, exactly as lowering will
/// reference it. Folding happens at the value-source level, not here.
fn collect_expression_json(expr: &Expression, pool: &mut StringPool) {
    pool.intern(&to_text(&expression_to_json(expr)));
}

fn collect_literal(literal: &LiteralValue, pool: &mut StringPool) {
    match literal {
        LiteralValue::String(s) => {
            pool.intern(s);
        }
        LiteralValue::Array(_) | LiteralValue::Object(_) => {
            pool.intern(&to_text(&literal.to_json()));
        }
        LiteralValue::Regex { pattern, flags } => {
            pool.intern(pattern);
            pool.intern(flags);
        }
        // Numeric, boolean, and null literals lower as immediates.
        LiteralValue::Integer(_) | LiteralValue::Float(_) | LiteralValue::Boolean(_)
        | LiteralValue::Null => {}
    }
}

/// Intern the strings for a lowered value source: the folded literal's
/// content, or the serialized expression text.
pub fn collect_value_source(source: &ValueSource, pool: &mut StringPool) {
    match crate::serialize::lowered_value_source(source) {
        crate::serialize::LoweredValueSource::None => {}
        crate::serialize::LoweredValueSource::Literal(lit)
        | crate::serialize::LoweredValueSource::SinkLiteral(lit) => collect_literal(&lit, pool),
        crate::serialize::LoweredValueSource::Expression(json)
        | crate::serialize::LoweredValueSource::Sink(json) => {
            pool.intern(&to_text(&json));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aro_core::ast::{FeatureSet, QueryModifiers, RangeModifiers};
    use aro_core::span::Span;

    #[test]
    fn interning_deduplicates_by_content() {
        let mut pool = StringPool::new();
        let a = pool.intern("user");
        let b = pool.intern("user");
        assert_eq!(a, b);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get("user"), Some(a.as_str()));
        assert_eq!(pool.get("ghost"), None);
    }

    #[test]
    fn pre_pass_covers_everything_an_action_needs() {
        let statement = Statement::Action {
            verb: "extract".to_string(),
            result: QualifiedNoun::new("user"),
            object: Some(aro_core::ast::ObjectRef {
                preposition: aro_core::ast::Preposition::From,
                noun: QualifiedNoun::with_specifiers("request", vec!["body".into()]),
            }),
            value: ValueSource::Literal(LiteralValue::String("fallback".into())),
            query: QueryModifiers {
                where_field: Some("price".into()),
                where_op: Some(">=".into()),
                where_value: Some(LiteralValue::Integer(10)),
                ..QueryModifiers::default()
            },
            range: RangeModifiers::default(),
            guard: Some(Expression::VariableRef(QualifiedNoun::new("enabled"))),
            span: Span::synthetic(),
        };
        let program = AnalyzedProgram::new(vec![FeatureSet {
            name: "Application-Start".to_string(),
            business_activity: "Serve".to_string(),
            statements: vec![statement],
            span: Span::synthetic(),
        }]);

        let mut pool = StringPool::new();
        collect_program_strings(&program, Some("{\"openapi\":\"3.0.0\"}"), &mut pool);

        for expected in [
            "_where_field_",
            "user",
            "request",
            "body",
            "fallback",
            "price",
            ">=",
            r#"{"$var":"enabled"}"#,
            "Application-Start",
            "Serve",
            "{\"openapi\":\"3.0.0\"}",
        ] {
            assert!(pool.get(expected).is_some(), "missing '{expected}'");
        }
    }
}
