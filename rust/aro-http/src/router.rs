//! Route matching.
//!
//! A route table is derived from an OpenAPI document: one route per
//! `(method, template)` pair that carries an `operationId`. Routes sort by
//! descending specificity (`10·segments + 5·literal segments`) so that
//! `/users/me` beats `/users/{id}`; the sort is stable, so equal
//! specificities keep document order.

use crate::openapi::{OpenApiSpec, Operation};

/// One segment of a path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Parameter(String),
}

/// A parsed path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    pub template: String,
    pub segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(template: &str) -> Self {
        let segments = template
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.strip_prefix('{')
                    .and_then(|s| s.strip_suffix('}'))
                    .map_or_else(|| Segment::Literal(s.to_string()), |name| {
                        Segment::Parameter(name.to_string())
                    })
            })
            .collect();
        Self {
            template: template.to_string(),
            segments,
        }
    }

    /// Tie-break weight: more segments, then more literal segments, wins.
    pub fn specificity(&self) -> usize {
        let literals = self
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count();
        10 * self.segments.len() + 5 * literals
    }

    /// Match a normalized, split path. Requires equal segment counts;
    /// literals compare exactly, parameters bind.
    fn bind(&self, path_segments: &[&str]) -> Option<Vec<(String, String)>> {
        if path_segments.len() != self.segments.len() {
            return None;
        }
        let mut parameters = Vec::new();
        for (segment, actual) in self.segments.iter().zip(path_segments) {
            match segment {
                Segment::Literal(literal) => {
                    if literal != actual {
                        return None;
                    }
                }
                Segment::Parameter(name) => {
                    parameters.push((name.clone(), (*actual).to_string()));
                }
            }
        }
        Some(parameters)
    }
}

/// A registered route.
#[derive(Debug, Clone)]
pub struct Route {
    pub method: String,
    pub pattern: PathPattern,
    pub operation_id: String,
    pub operation: Operation,
}

/// A successful match.
#[derive(Debug, Clone)]
pub struct RouteMatch<'a> {
    pub operation_id: &'a str,
    pub operation: &'a Operation,
    pub template: &'a str,
    pub path_parameters: Vec<(String, String)>,
}

/// The method+path → operation registry.
#[derive(Debug, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Build the table from a document. Operations without an
    /// `operationId` are skipped here; the contract validator reports them.
    pub fn from_spec(spec: &OpenApiSpec) -> Self {
        let mut routes = Vec::new();
        for (template, item) in &spec.paths {
            for (method, operation) in item.operations() {
                let Some(operation_id) = operation.operation_id.clone() else {
                    continue;
                };
                routes.push(Route {
                    method: method.to_string(),
                    pattern: PathPattern::parse(template),
                    operation_id,
                    operation: operation.clone(),
                });
            }
        }
        // Stable: equal specificity keeps document order.
        routes.sort_by_key(|route| std::cmp::Reverse(route.pattern.specificity()));
        Self { routes }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Match a request. The first route (in specificity order) whose
    /// method and segments fit wins.
    pub fn match_route(&self, method: &str, path: &str) -> Option<RouteMatch<'_>> {
        let normalized = normalize_path(path);
        let segments: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();
        let method = method.to_ascii_uppercase();
        for route in &self.routes {
            if route.method != method {
                continue;
            }
            if let Some(path_parameters) = route.pattern.bind(&segments) {
                return Some(RouteMatch {
                    operation_id: &route.operation_id,
                    operation: &route.operation,
                    template: &route.pattern.template,
                    path_parameters,
                });
            }
        }
        None
    }
}

/// Prepend `/` when missing; strip a single trailing `/` except at the
/// root.
pub fn normalize_path(path: &str) -> String {
    let mut normalized = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    if normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openapi::OpenApiSpec;

    fn users_spec() -> OpenApiSpec {
        OpenApiSpec::parse(
            r#"{
                "openapi": "3.0.0",
                "paths": {
                    "/users/{id}": {"get": {"operationId": "getUser"}},
                    "/users/me": {"get": {"operationId": "getCurrentUser"}},
                    "/users": {"post": {"operationId": "createUser"}},
                    "/health": {"get": {}}
                }
            }"#,
            true,
        )
        .unwrap()
    }

    #[test]
    fn specificity_weights_literals() {
        assert_eq!(PathPattern::parse("/users/me").specificity(), 30);
        assert_eq!(PathPattern::parse("/users/{id}").specificity(), 25);
        assert_eq!(PathPattern::parse("/").specificity(), 0);
    }

    #[test]
    fn literal_route_beats_templated_route() {
        let router = Router::from_spec(&users_spec());
        let matched = router.match_route("GET", "/users/me").unwrap();
        assert_eq!(matched.operation_id, "getCurrentUser");
        assert!(matched.path_parameters.is_empty());
    }

    #[test]
    fn templated_route_binds_parameters() {
        let router = Router::from_spec(&users_spec());
        let matched = router.match_route("GET", "/users/42").unwrap();
        assert_eq!(matched.operation_id, "getUser");
        assert_eq!(
            matched.path_parameters,
            vec![("id".to_string(), "42".to_string())]
        );
        assert_eq!(matched.template, "/users/{id}");
    }

    #[test]
    fn method_mismatch_is_not_found() {
        let router = Router::from_spec(&users_spec());
        assert!(router.match_route("POST", "/users/42").is_none());
        assert!(router.match_route("POST", "/users").is_some());
    }

    #[test]
    fn operations_without_id_are_skipped() {
        let router = Router::from_spec(&users_spec());
        assert!(router.match_route("GET", "/health").is_none());
    }

    #[test]
    fn paths_are_normalized() {
        let router = Router::from_spec(&users_spec());
        assert!(router.match_route("get", "users/me").is_some());
        assert!(router.match_route("GET", "/users/me/").is_some());
        assert_eq!(normalize_path("/"), "/");
    }

    #[test]
    fn matching_is_deterministic() {
        let router = Router::from_spec(&users_spec());
        let first = router.match_route("GET", "/users/me").unwrap().operation_id.to_string();
        for _ in 0..10 {
            assert_eq!(
                router.match_route("GET", "/users/me").unwrap().operation_id,
                first
            );
        }
    }
}
