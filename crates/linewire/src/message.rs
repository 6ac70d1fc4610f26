//! Wire types: one JSON object per frame.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// The `type` carried by responses to routed requests (and to unmatched ones).
pub const REQUEST_RESPONSE_TYPE: &str = "request";

/// Status code sent when no route matches.
pub const NOT_FOUND: i32 = 404;

/// An inbound request frame.
///
/// Missing and `null` fields decode to their empty value, so `{}` is a valid
/// (if unroutable) request. `params` is filled in by the router; whatever a
/// client sends there is ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Request {
    #[serde(deserialize_with = "null_as_default")]
    pub method: String,
    #[serde(deserialize_with = "null_as_default")]
    pub url: String,
    #[serde(deserialize_with = "null_as_default")]
    pub query: Map<String, Value>,
    #[serde(deserialize_with = "null_as_default")]
    pub body: Map<String, Value>,
    #[serde(deserialize_with = "null_as_default")]
    pub headers: Map<String, Value>,
    #[serde(skip_deserializing)]
    pub params: HashMap<String, String>,
    #[serde(deserialize_with = "null_as_default")]
    pub request_id: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl Request {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the identifier echoed back on every response to this request.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_body(mut self, body: Map<String, Value>) -> Self {
        self.body = body;
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// A bound path parameter, if the matched route declared it.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// An outbound response frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Response {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub code: i32,
    pub data: Value,
    pub request_id: String,
}

impl Response {
    pub fn new(
        kind: impl Into<String>,
        url: impl Into<String>,
        code: i32,
        data: Value,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            url: url.into(),
            code,
            data,
            request_id: request_id.into(),
        }
    }

    /// The reply for a request no route accepted.
    pub fn not_found(request: &Request) -> Self {
        Self::new(
            REQUEST_RESPONSE_TYPE,
            request.url.as_str(),
            NOT_FOUND,
            serde_json::json!({ "error": "NotFound" }),
            request.request_id.as_str(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_decodes_wire_names() {
        let request: Request = serde_json::from_str(
            r#"{"method":"GET","url":"/v1/ping","query":{"a":1},"body":{},"headers":{"x":"y"},"requestId":"r-1"}"#,
        )
        .unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.url, "/v1/ping");
        assert_eq!(request.query["a"], json!(1));
        assert_eq!(request.headers["x"], json!("y"));
        assert_eq!(request.request_id, "r-1");
        assert!(request.params.is_empty());
    }

    #[test]
    fn test_request_missing_fields_default() {
        let request: Request = serde_json::from_str("{}").unwrap();
        assert_eq!(request, Request::default());
    }

    #[test]
    fn test_request_null_maps_decode_empty() {
        let request: Request = serde_json::from_str(
            r#"{"method":"GET","url":"/v1/ping","query":null,"body":null,"headers":null,"params":null,"requestId":"r1"}"#,
        )
        .unwrap();
        assert_eq!(request.url, "/v1/ping");
        assert!(request.query.is_empty());
        assert!(request.body.is_empty());
        assert!(request.headers.is_empty());
        assert!(request.params.is_empty());
        assert_eq!(request.request_id, "r1");
    }

    #[test]
    fn test_request_ignores_client_params() {
        let request: Request = serde_json::from_str(
            r#"{"method":"GET","url":"/v1/users/7","params":{"id":5,"x":[1]},"requestId":"r2"}"#,
        )
        .unwrap();
        assert!(request.params.is_empty());
        assert_eq!(request.request_id, "r2");
    }

    #[test]
    fn test_response_code_outside_status_range() {
        let response: Response =
            serde_json::from_str(r#"{"type":"request","url":"/x","code":70000,"data":null,"requestId":""}"#)
                .unwrap();
        assert_eq!(response.code, 70000);

        let response: Response = serde_json::from_str(r#"{"code":-1}"#).unwrap();
        assert_eq!(response.code, -1);
    }

    #[test]
    fn test_response_wire_shape() {
        let response = Response::new("request", "/v1/ping", 200, json!({"pong": true}), "r-9");
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "request",
                "url": "/v1/ping",
                "code": 200,
                "data": {"pong": true},
                "requestId": "r-9",
            })
        );
    }

    #[test]
    fn test_not_found_echoes_request() {
        let request = Request::new("DELETE", "/v1/unknown").with_request_id("abc");
        let response = Response::not_found(&request);
        assert_eq!(response.code, NOT_FOUND);
        assert_eq!(response.url, "/v1/unknown");
        assert_eq!(response.request_id, "abc");
        assert_eq!(response.data, json!({"error": "NotFound"}));
    }
}
