//! Transport seam between the session manager and the network.
//!
//! The session manager only sees [`RequestDispatcher`] and [`TokenTransport`].
//! Real implementations live in [`http`]; tests supply their own.

pub mod classify;
pub mod http;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use taskdeck_common::{AuthPayload, LoginInput, NewAttachment, RegisterInput};

use crate::config::Protocol;
use crate::errors::{ApiError, ErrorClass};

pub use classify::{classify, classify_graphql, classify_rest};
pub use http::{HttpDispatcher, HttpTokenTransport, build_http_client};

pub const GRAPHQL_PATH: &str = "graphql";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    /// Text fields followed by file parts, each file under its own field name.
    Multipart {
        fields: Vec<(String, String)>,
        files: Vec<(String, NewAttachment)>,
    },
}

/// A fully built request. Cloneable so it can be replayed after a token refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// Short name used in logs, e.g. the GraphQL operation name.
    pub label: String,
    pub method: HttpMethod,
    /// Path relative to the API root.
    pub path: String,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn new(label: impl Into<String>, method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            method,
            path: path.into(),
            body: RequestBody::Empty,
        }
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn graphql(operation_name: &str, query: &str, variables: Value) -> Self {
        Self::new(operation_name, HttpMethod::Post, GRAPHQL_PATH).json(serde_json::json!({
            "operationName": operation_name,
            "query": query,
            "variables": variables,
        }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Extract the payload: `data.<field>` for GraphQL, `data` from the REST envelope.
    pub fn decode<T: DeserializeOwned>(&self, protocol: Protocol, field: &str) -> Result<T, ApiError> {
        let value = match protocol {
            Protocol::Graphql => self.body.get("data").and_then(|data| data.get(field)),
            Protocol::Rest => self.body.get("data"),
        };
        match value {
            Some(value) if !value.is_null() => Ok(serde_json::from_value(value.clone())?),
            _ => Err(ApiError::Decode(format!("missing '{}' in response", field))),
        }
    }

    /// Check a boolean acknowledgement (`deleteTask: true`). REST answers with a
    /// success status and no payload, which counts as acknowledged.
    pub fn acknowledged(&self, protocol: Protocol, field: &str) -> bool {
        match protocol {
            Protocol::Graphql => self
                .body
                .get("data")
                .and_then(|data| data.get(field))
                .and_then(Value::as_bool)
                .unwrap_or(false),
            Protocol::Rest => self.is_success(),
        }
    }
}

/// Sends requests with an access token attached.
#[async_trait]
pub trait RequestDispatcher: Send + Sync {
    /// Send `request`, attaching `token` as a bearer credential when present.
    ///
    /// Any response the server produced comes back as `Ok`, whatever its status;
    /// `Err` is reserved for requests that never got an answer.
    async fn send(&self, request: &ApiRequest, token: Option<&str>) -> Result<ApiResponse, ApiError>;

    /// `None` for a successful response, otherwise what kind of failure it is.
    fn classify(&self, response: &ApiResponse) -> Option<ErrorClass>;
}

/// Issues access tokens. The refresh credential is owned by the implementation.
#[async_trait]
pub trait TokenTransport: Send + Sync {
    /// Exchange the refresh credential for a new access token.
    async fn refresh(&self) -> Result<AuthPayload, ApiError>;

    async fn login(&self, credentials: &LoginInput) -> Result<AuthPayload, ApiError>;

    async fn register(&self, details: &RegisterInput) -> Result<AuthPayload, ApiError>;

    /// Revoke the refresh credential server-side.
    async fn logout(&self, access_token: &str) -> Result<(), ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn graphql_request_wraps_operation() {
        let request = ApiRequest::graphql("DeleteTask", "mutation DeleteTask", json!({"id": "t1"}));
        assert_eq!(request.path, GRAPHQL_PATH);
        assert_eq!(request.method, HttpMethod::Post);
        match &request.body {
            RequestBody::Json(body) => {
                assert_eq!(body["operationName"], "DeleteTask");
                assert_eq!(body["variables"]["id"], "t1");
            }
            other => panic!("Expected JSON body, got {:?}", other),
        }
    }

    #[test]
    fn decode_reads_graphql_field() {
        let response = ApiResponse::new(200, json!({"data": {"users": [{"id": "u1", "username": "ann"}]}}));
        let users: Vec<taskdeck_common::User> = response.decode(Protocol::Graphql, "users").unwrap();
        assert_eq!(users[0].username, "ann");
    }

    #[test]
    fn decode_reads_rest_envelope() {
        let response = ApiResponse::new(200, json!({"data": {"id": "u1", "username": "ann"}}));
        let user: taskdeck_common::User = response.decode(Protocol::Rest, "ignored").unwrap();
        assert_eq!(user.id.as_str(), "u1");
    }

    #[test]
    fn decode_reports_missing_payload() {
        let response = ApiResponse::new(200, json!({"data": {"other": null}}));
        let result: Result<Value, _> = response.decode(Protocol::Graphql, "createTask");
        assert!(matches!(result, Err(ApiError::Decode(_))));
    }

    #[test]
    fn acknowledged_requires_true_for_graphql() {
        let yes = ApiResponse::new(200, json!({"data": {"deleteTask": true}}));
        let no = ApiResponse::new(200, json!({"data": {"deleteTask": false}}));
        assert!(yes.acknowledged(Protocol::Graphql, "deleteTask"));
        assert!(!no.acknowledged(Protocol::Graphql, "deleteTask"));
        assert!(ApiResponse::new(204, Value::Null).acknowledged(Protocol::Rest, "deleteTask"));
    }
}
