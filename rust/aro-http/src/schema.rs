//! Schema validation.
//!
//! Validates a JSON value against a named (possibly `$ref`-chained) schema
//! from the document's components table. Integers promote to `number`;
//! unknown object properties pass through; `nullable` admits null.

use indexmap::IndexMap;
use serde_json::Value as Json;
use thiserror::Error;

use crate::openapi::Schema;

/// The `$ref` prefix this validator resolves.
pub const SCHEMA_REF_PREFIX: &str = "#/components/schemas/";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("schema '{0}' not found")]
    SchemaNotFound(String),

    #[error("schema '{schema}': expected {expected}, found {actual}")]
    TypeMismatch {
        schema: String,
        expected: String,
        actual: String,
    },

    #[error("schema '{schema}': missing required properties: {}", .properties.join(", "))]
    MissingRequiredProperty {
        schema: String,
        properties: Vec<String>,
    },

    #[error("schema '{schema}', property '{property}': expected {expected}, found {actual}")]
    InvalidPropertyType {
        schema: String,
        property: String,
        expected: String,
        actual: String,
    },

    #[error("schema '{schema}': unresolvable reference '{reference}'")]
    InvalidSchemaReference { schema: String, reference: String },
}

impl SchemaError {
    pub fn kind(&self) -> &'static str {
        match self {
            SchemaError::SchemaNotFound(_) => "schema-not-found",
            SchemaError::TypeMismatch { .. } => "type-mismatch",
            SchemaError::MissingRequiredProperty { .. } => "missing-required-property",
            SchemaError::InvalidPropertyType { .. } => "invalid-property-type",
            SchemaError::InvalidSchemaReference { .. } => "invalid-schema-reference",
        }
    }
}

/// Validates values against the schemas of one document.
pub struct SchemaValidator<'a> {
    schemas: &'a IndexMap<String, Schema>,
}

impl<'a> SchemaValidator<'a> {
    pub fn new(schemas: &'a IndexMap<String, Schema>) -> Self {
        Self { schemas }
    }

    /// Validate against a schema by component name.
    pub fn validate_named(&self, value: &Json, name: &str) -> Result<(), SchemaError> {
        let schema = self
            .schemas
            .get(name)
            .ok_or_else(|| SchemaError::SchemaNotFound(name.to_string()))?;
        self.validate(value, schema, name)
    }

    /// Validate against a schema node, resolving `$ref` chains first.
    pub fn validate(&self, value: &Json, schema: &Schema, name: &str) -> Result<(), SchemaError> {
        let (schema, name) = self.resolve(schema, name)?;

        if value.is_null() {
            return if schema.nullable {
                Ok(())
            } else {
                Err(SchemaError::TypeMismatch {
                    schema: name.to_string(),
                    expected: schema.schema_type.clone().unwrap_or_else(|| "value".into()),
                    actual: "null".into(),
                })
            };
        }

        let Some(schema_type) = schema.schema_type.as_deref() else {
            // An untyped schema constrains nothing beyond its properties.
            return self.validate_object_shape(value, schema, name);
        };

        let matches = match schema_type {
            "string" => value.is_string(),
            "integer" => value.as_i64().is_some() || value.as_u64().is_some(),
            // Integers promote to number.
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        };
        if !matches {
            return Err(SchemaError::TypeMismatch {
                schema: name.to_string(),
                expected: schema_type.to_string(),
                actual: json_type_name(value).to_string(),
            });
        }

        if schema_type == "array" {
            if let (Some(items), Some(elements)) = (&schema.items, value.as_array()) {
                for element in elements {
                    self.validate(element, items, name)?;
                }
            }
            return Ok(());
        }
        if schema_type == "object" {
            return self.validate_object_shape(value, schema, name);
        }
        Ok(())
    }

    fn validate_object_shape(
        &self,
        value: &Json,
        schema: &Schema,
        name: &str,
    ) -> Result<(), SchemaError> {
        let Some(entries) = value.as_object() else {
            return Ok(());
        };

        let missing: Vec<String> = schema
            .required
            .iter()
            .filter(|property| !entries.contains_key(*property))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(SchemaError::MissingRequiredProperty {
                schema: name.to_string(),
                properties: missing,
            });
        }

        for (property, property_schema) in &schema.properties {
            let Some(actual) = entries.get(property) else {
                continue;
            };
            self.validate(actual, property_schema, name).map_err(|e| {
                // Surface direct type failures as the property-level kind.
                match e {
                    SchemaError::TypeMismatch {
                        schema,
                        expected,
                        actual,
                    } if schema == name => SchemaError::InvalidPropertyType {
                        schema,
                        property: property.clone(),
                        expected,
                        actual,
                    },
                    other => other,
                }
            })?;
        }
        // Unknown properties are preserved, not rejected.
        Ok(())
    }

    /// Follow `$ref` chains to a concrete schema node.
    fn resolve(
        &self,
        mut schema: &'a Schema,
        mut name: &'a str,
    ) -> Result<(&'a Schema, &'a str), SchemaError> {
        // Bounded hop count guards against reference cycles.
        for _ in 0..32 {
            let Some(reference) = schema.reference.as_deref() else {
                return Ok((schema, name));
            };
            let target = reference.strip_prefix(SCHEMA_REF_PREFIX).ok_or_else(|| {
                SchemaError::InvalidSchemaReference {
                    schema: name.to_string(),
                    reference: reference.to_string(),
                }
            })?;
            let (key, next) = self.schemas.get_key_value(target).ok_or_else(|| {
                SchemaError::InvalidSchemaReference {
                    schema: name.to_string(),
                    reference: reference.to_string(),
                }
            })?;
            schema = next;
            name = key.as_str();
        }
        Err(SchemaError::InvalidSchemaReference {
            schema: name.to_string(),
            reference: "circular $ref chain".to_string(),
        })
    }
}

fn json_type_name(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schemas() -> IndexMap<String, Schema> {
        let spec = crate::openapi::OpenApiSpec::parse(
            r##"{
                "openapi": "3.0.0",
                "components": {"schemas": {
                    "User": {
                        "type": "object",
                        "required": ["id", "name"],
                        "properties": {
                            "id": {"type": "integer"},
                            "name": {"type": "string"},
                            "score": {"type": "number"},
                            "manager": {"$ref": "#/components/schemas/User"},
                            "tags": {"type": "array", "items": {"type": "string"}}
                        }
                    },
                    "Account": {"$ref": "#/components/schemas/User"},
                    "Broken": {"$ref": "#/components/schemas/Ghost"},
                    "MaybeName": {"type": "string", "nullable": true}
                }}
            }"##,
            true,
        )
        .unwrap();
        spec.components.schemas
    }

    #[test]
    fn valid_object_passes() {
        let schemas = schemas();
        let validator = SchemaValidator::new(&schemas);
        let value = json!({"id": 1, "name": "a", "extra": true});
        assert!(validator.validate_named(&value, "User").is_ok());
    }

    #[test]
    fn wrong_property_type_is_reported_with_context() {
        let schemas = schemas();
        let validator = SchemaValidator::new(&schemas);
        let err = validator
            .validate_named(&json!({"id": "x", "name": "a"}), "User")
            .unwrap_err();
        assert_eq!(
            err,
            SchemaError::InvalidPropertyType {
                schema: "User".into(),
                property: "id".into(),
                expected: "integer".into(),
                actual: "string".into(),
            }
        );
        assert_eq!(err.kind(), "invalid-property-type");
    }

    #[test]
    fn missing_required_lists_the_properties() {
        let schemas = schemas();
        let validator = SchemaValidator::new(&schemas);
        let err = validator.validate_named(&json!({"id": 1}), "User").unwrap_err();
        assert_eq!(
            err,
            SchemaError::MissingRequiredProperty {
                schema: "User".into(),
                properties: vec!["name".into()],
            }
        );
    }

    #[test]
    fn integers_promote_to_number() {
        let schemas = schemas();
        let validator = SchemaValidator::new(&schemas);
        let value = json!({"id": 1, "name": "a", "score": 3});
        assert!(validator.validate_named(&value, "User").is_ok());
    }

    #[test]
    fn refs_resolve_and_unresolvable_refs_fail() {
        let schemas = schemas();
        let validator = SchemaValidator::new(&schemas);
        assert!(validator
            .validate_named(&json!({"id": 1, "name": "a"}), "Account")
            .is_ok());
        let err = validator.validate_named(&json!({}), "Broken").unwrap_err();
        assert_eq!(err.kind(), "invalid-schema-reference");
    }

    #[test]
    fn unknown_schema_name_is_its_own_error() {
        let schemas = schemas();
        let validator = SchemaValidator::new(&schemas);
        let err = validator.validate_named(&json!({}), "Ghost").unwrap_err();
        assert_eq!(err, SchemaError::SchemaNotFound("Ghost".into()));
    }

    #[test]
    fn nullable_admits_null() {
        let schemas = schemas();
        let validator = SchemaValidator::new(&schemas);
        assert!(validator.validate_named(&json!(null), "MaybeName").is_ok());
        let err = validator.validate_named(&json!(null), "User").unwrap_err();
        assert_eq!(err.kind(), "type-mismatch");
    }

    #[test]
    fn nested_refs_validate_recursively() {
        let schemas = schemas();
        let validator = SchemaValidator::new(&schemas);
        let value = json!({"id": 1, "name": "a", "manager": {"id": 2}});
        let err = validator.validate_named(&value, "User").unwrap_err();
        // The nested User is missing `name`.
        assert_eq!(err.kind(), "missing-required-property");
    }

    #[test]
    fn array_items_are_checked() {
        let schemas = schemas();
        let validator = SchemaValidator::new(&schemas);
        let ok = json!({"id": 1, "name": "a", "tags": ["x", "y"]});
        assert!(validator.validate_named(&ok, "User").is_ok());
        let bad = json!({"id": 1, "name": "a", "tags": ["x", 3]});
        assert!(validator.validate_named(&bad, "User").is_err());
    }
}
