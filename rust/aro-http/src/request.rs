//! Request dispatch.
//!
//! Turns a wire tuple `(method, path, headers, body)` into a routed
//! operation event: the matched operation id becomes the event type, the
//! payload carries the request id, parameters, headers, and body. A miss
//! produces the canonical 404 response body.

use std::collections::BTreeMap;

use uuid::Uuid;

use aro_core::value::Value;
use aro_rt::events::{Event, EventBus};

use crate::router::{normalize_path, Router};

/// A wire request as the transport hands it over. The path may still carry
/// its query string.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// A request matched to an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedRequest {
    pub id: Uuid,
    pub operation_id: String,
    pub method: String,
    pub path: String,
    pub path_template: String,
    pub path_parameters: Vec<(String, String)>,
    pub query_parameters: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// The response for an unroutable request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotFoundResponse {
    pub status: u16,
    pub body: String,
}

impl NotFoundResponse {
    fn for_request(method: &str, path: &str) -> Self {
        let body = serde_json::json!({
            "error": "Not Found",
            "message": format!("No route matches {method} {path}"),
        });
        Self {
            status: 404,
            body: body.to_string(),
        }
    }
}

/// Match a request against the route table.
pub fn dispatch(router: &Router, request: &HttpRequest) -> Result<RoutedRequest, NotFoundResponse> {
    let method = request.method.to_ascii_uppercase();
    let (path, query) = split_query(&request.path);
    let Some(matched) = router.match_route(&method, path) else {
        return Err(NotFoundResponse::for_request(&method, path));
    };
    Ok(RoutedRequest {
        id: Uuid::new_v4(),
        operation_id: matched.operation_id.to_string(),
        method,
        path: normalize_path(path),
        path_template: matched.template.to_string(),
        path_parameters: matched.path_parameters,
        query_parameters: parse_query(query),
        headers: request.headers.clone(),
        body: request.body.clone(),
    })
}

/// Publish the routed request as its operation's event. Handlers run as
/// tracked tasks, so the shutdown barrier waits for them.
pub fn publish_operation_event(bus: &EventBus, routed: &RoutedRequest) {
    bus.publish_tracked_detached(Event::new(
        routed.operation_id.clone(),
        routed.to_event_payload(),
    ));
}

impl RoutedRequest {
    /// The event payload a handling feature set receives.
    pub fn to_event_payload(&self) -> Value {
        let pairs = |items: &[(String, String)]| {
            Value::Object(
                items
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::Str(v.clone())))
                    .collect::<BTreeMap<String, Value>>(),
            )
        };
        let body = match std::str::from_utf8(&self.body) {
            Ok(text) if !text.is_empty() => serde_json::from_str::<serde_json::Value>(text)
                .map_or_else(|_| Value::Str(text.to_string()), |json| Value::from_json(&json)),
            _ => Value::Null,
        };
        Value::Object(BTreeMap::from([
            ("id".to_string(), Value::Str(self.id.to_string())),
            (
                "operation-id".to_string(),
                Value::Str(self.operation_id.clone()),
            ),
            ("method".to_string(), Value::Str(self.method.clone())),
            ("path".to_string(), Value::Str(self.path.clone())),
            (
                "path-template".to_string(),
                Value::Str(self.path_template.clone()),
            ),
            ("parameters".to_string(), pairs(&self.path_parameters)),
            ("query".to_string(), pairs(&self.query_parameters)),
            ("headers".to_string(), pairs(&self.headers)),
            ("body".to_string(), body),
        ]))
    }
}

fn split_query(path: &str) -> (&str, &str) {
    match path.split_once('?') {
        Some((path, query)) => (path, query),
        None => (path, ""),
    }
}

/// Raw key=value pairs; no percent-decoding.
fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}
