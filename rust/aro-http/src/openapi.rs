//! The OpenAPI 3.x document model and loader.
//!
//! Path templates and schema properties keep their document order
//! (`IndexMap`), which is what makes route tie-breaking and validation
//! output deterministic.
//!
//! Specs load from `openapi.yaml`, `openapi.yml`, or `openapi.json` in the
//! application directory, first hit wins in that order.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// File names probed in the application directory, in order.
pub const SPEC_FILE_NAMES: [&str; 3] = ["openapi.yaml", "openapi.yml", "openapi.json"];

#[derive(Debug, Error)]
pub enum OpenApiError {
    #[error("no OpenAPI document found in {0}")]
    NotFound(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("unsupported OpenAPI version '{0}': 3.x required")]
    UnsupportedVersion(String),
}

/// A parsed OpenAPI 3.x document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenApiSpec {
    pub openapi: String,
    #[serde(default)]
    pub info: Info,
    #[serde(default)]
    pub paths: IndexMap<String, PathItem>,
    #[serde(default)]
    pub components: Components,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Info {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get: Option<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub put: Option<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post: Option<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Operation>,
}

impl PathItem {
    /// The methods present on this path item, in a fixed order.
    pub fn operations(&self) -> impl Iterator<Item = (&'static str, &Operation)> {
        [
            ("GET", self.get.as_ref()),
            ("PUT", self.put.as_ref()),
            ("POST", self.post.as_ref()),
            ("DELETE", self.delete.as_ref()),
            ("PATCH", self.patch.as_ref()),
            ("HEAD", self.head.as_ref()),
            ("OPTIONS", self.options.as_ref()),
        ]
        .into_iter()
        .filter_map(|(method, op)| op.map(|op| (method, op)))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Operation {
    #[serde(default, rename = "operationId", skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
    #[serde(default, rename = "requestBody", skip_serializing_if = "Option::is_none")]
    pub request_body: Option<RequestBody>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub responses: IndexMap<String, Response>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "in")]
    pub location: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Schema>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestBody {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub content: IndexMap<String, MediaType>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaType {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Schema>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub content: IndexMap<String, MediaType>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Components {
    #[serde(default)]
    pub schemas: IndexMap<String, Schema>,
}

/// A schema node: either a `$ref` or an inline definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default, rename = "$ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<String>,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Schema>>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, Schema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl OpenApiSpec {
    /// Parse a document from YAML or JSON text. JSON is a subset of YAML,
    /// but JSON files get the JSON parser for exact error positions.
    pub fn parse(text: &str, json: bool) -> Result<Self, String> {
        let spec: OpenApiSpec = if json {
            serde_json::from_str(text).map_err(|e| e.to_string())?
        } else {
            serde_yaml::from_str(text).map_err(|e| e.to_string())?
        };
        Ok(spec)
    }

    /// Load from an application directory, probing the well-known file
    /// names.
    pub fn load_from_dir(dir: &Path) -> Result<Self, OpenApiError> {
        for name in SPEC_FILE_NAMES {
            let path = dir.join(name);
            if !path.is_file() {
                continue;
            }
            let text = std::fs::read_to_string(&path).map_err(|source| OpenApiError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let spec =
                Self::parse(&text, name.ends_with(".json")).map_err(|message| {
                    OpenApiError::Parse {
                        path: path.display().to_string(),
                        message,
                    }
                })?;
            spec.check_version()?;
            return Ok(spec);
        }
        Err(OpenApiError::NotFound(dir.display().to_string()))
    }

    /// Require a 3.x document.
    pub fn check_version(&self) -> Result<(), OpenApiError> {
        if self.openapi.starts_with("3.") {
            Ok(())
        } else {
            Err(OpenApiError::UnsupportedVersion(self.openapi.clone()))
        }
    }

    /// The document as the compact JSON blob embedded into compiled
    /// programs.
    pub fn to_embedded_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC_YAML: &str = r#"
openapi: 3.0.3
info:
  title: Users
  version: "1.0"
paths:
  /users/{id}:
    get:
      operationId: getUser
      responses:
        "200":
          description: ok
  /users/me:
    get:
      operationId: getCurrentUser
components:
  schemas:
    User:
      type: object
      required: [id, name]
      properties:
        id:
          type: integer
        name:
          type: string
"#;

    #[test]
    fn yaml_parses_with_document_order() {
        let spec = OpenApiSpec::parse(SPEC_YAML, false).unwrap();
        assert!(spec.check_version().is_ok());
        let templates: Vec<&String> = spec.paths.keys().collect();
        assert_eq!(templates, ["/users/{id}", "/users/me"]);
        let user = &spec.components.schemas["User"];
        assert_eq!(user.required, ["id", "name"]);
    }

    #[test]
    fn json_form_parses_too() {
        let json = r#"{"openapi":"3.1.0","paths":{"/ping":{"get":{"operationId":"ping"}}}}"#;
        let spec = OpenApiSpec::parse(json, true).unwrap();
        assert_eq!(
            spec.paths["/ping"].get.as_ref().unwrap().operation_id.as_deref(),
            Some("ping")
        );
    }

    #[test]
    fn non_3x_versions_are_rejected() {
        let spec = OpenApiSpec::parse(r#"{"openapi":"2.0"}"#, true).unwrap();
        assert!(matches!(
            spec.check_version(),
            Err(OpenApiError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn load_probes_well_known_names() {
        let dir = std::env::temp_dir().join(format!("aro-openapi-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("openapi.yaml"), SPEC_YAML).unwrap();
        let spec = OpenApiSpec::load_from_dir(&dir).unwrap();
        assert_eq!(spec.info.title, "Users");
        std::fs::remove_dir_all(&dir).unwrap();

        let empty = std::env::temp_dir().join(format!("aro-openapi-empty-{}", std::process::id()));
        std::fs::create_dir_all(&empty).unwrap();
        assert!(matches!(
            OpenApiSpec::load_from_dir(&empty),
            Err(OpenApiError::NotFound(_))
        ));
        std::fs::remove_dir_all(&empty).unwrap();
    }
}
