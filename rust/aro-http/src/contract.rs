//! Compile-time contract validation.
//!
//! Before a routed program runs, the document and the program must agree:
//! every operation carries a unique `operationId`, every body `$ref`
//! resolves, and every operation has a feature set of the same name to
//! handle it. Violations are collected, not thrown, so one pass reports
//! them all.

use std::collections::HashSet;

use thiserror::Error;

use aro_core::ast::AnalyzedProgram;

use crate::openapi::{OpenApiSpec, Schema};
use crate::schema::SCHEMA_REF_PREFIX;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractViolation {
    #[error("{method} {path}: operation has no operationId")]
    MissingOperationId { method: String, path: String },

    #[error("operationId '{0}' is declared more than once")]
    DuplicateOperationId(String),

    #[error("operation '{operation_id}': unresolvable reference '{reference}'")]
    InvalidSchemaReference {
        operation_id: String,
        reference: String,
    },

    #[error("operation '{0}' has no matching feature set")]
    MissingHandler(String),

    #[error("no OpenAPI contract is available")]
    NoContract,
}

impl ContractViolation {
    pub fn kind(&self) -> &'static str {
        match self {
            ContractViolation::MissingOperationId { .. } => "missing-operation-id",
            ContractViolation::DuplicateOperationId(_) => "duplicate-operation-id",
            ContractViolation::InvalidSchemaReference { .. } => "invalid-schema-reference",
            ContractViolation::MissingHandler(_) => "missing-handler",
            ContractViolation::NoContract => "no-contract",
        }
    }
}

/// Validate a document against the program that should serve it. Returns
/// every violation found.
pub fn validate_contract(
    spec: &OpenApiSpec,
    program: &AnalyzedProgram,
) -> Vec<ContractViolation> {
    let mut violations = Vec::new();
    let mut seen_ids: HashSet<&str> = HashSet::new();

    for (template, item) in &spec.paths {
        for (method, operation) in item.operations() {
            let Some(operation_id) = operation.operation_id.as_deref() else {
                violations.push(ContractViolation::MissingOperationId {
                    method: method.to_string(),
                    path: template.clone(),
                });
                continue;
            };
            if !seen_ids.insert(operation_id) {
                violations.push(ContractViolation::DuplicateOperationId(
                    operation_id.to_string(),
                ));
            }

            let mut check_ref = |schema: &Schema| {
                let Some(reference) = schema.reference.as_deref() else {
                    return;
                };
                let resolved = reference
                    .strip_prefix(SCHEMA_REF_PREFIX)
                    .is_some_and(|name| spec.components.schemas.contains_key(name));
                if !resolved {
                    violations.push(ContractViolation::InvalidSchemaReference {
                        operation_id: operation_id.to_string(),
                        reference: reference.to_string(),
                    });
                }
            };
            if let Some(body) = &operation.request_body {
                for media in body.content.values() {
                    if let Some(schema) = &media.schema {
                        check_ref(schema);
                    }
                }
            }
            for response in operation.responses.values() {
                for media in response.content.values() {
                    if let Some(schema) = &media.schema {
                        check_ref(schema);
                    }
                }
            }

            if program.find(operation_id).is_none() {
                violations.push(ContractViolation::MissingHandler(operation_id.to_string()));
            }
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use aro_core::ast::FeatureSet;
    use aro_core::span::Span;

    fn feature_set(name: &str) -> FeatureSet {
        FeatureSet {
            name: name.to_string(),
            business_activity: "API Request Handler".to_string(),
            statements: Vec::new(),
            span: Span::synthetic(),
        }
    }

    fn spec(json: &str) -> OpenApiSpec {
        OpenApiSpec::parse(json, true).unwrap()
    }

    #[test]
    fn clean_contract_has_no_violations() {
        let spec = spec(
            r#"{"openapi":"3.0.0","paths":{
                "/users": {"get": {"operationId": "listUsers"}}
            }}"#,
        );
        let program = AnalyzedProgram::new(vec![feature_set("listUsers")]);
        assert!(validate_contract(&spec, &program).is_empty());
    }

    #[test]
    fn all_violation_kinds_are_collected_in_one_pass() {
        let spec = spec(
            r##"{"openapi":"3.0.0","paths":{
                "/a": {"get": {"operationId": "dup"}},
                "/b": {"get": {"operationId": "dup"}},
                "/c": {"post": {}},
                "/d": {"put": {
                    "operationId": "update",
                    "requestBody": {"content": {"application/json": {
                        "schema": {"$ref": "#/components/schemas/Missing"}
                    }}}
                }}
            }}"##,
        );
        let program = AnalyzedProgram::new(vec![feature_set("dup")]);
        let violations = validate_contract(&spec, &program);
        let kinds: Vec<&str> = violations.iter().map(ContractViolation::kind).collect();
        assert!(kinds.contains(&"duplicate-operation-id"));
        assert!(kinds.contains(&"missing-operation-id"));
        assert!(kinds.contains(&"invalid-schema-reference"));
        assert!(kinds.contains(&"missing-handler"));
        // `update` has no feature set either, so two missing handlers.
        assert_eq!(
            violations
                .iter()
                .filter(|v| v.kind() == "missing-handler")
                .count(),
            1
        );
    }
}
