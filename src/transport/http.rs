//! reqwest-backed dispatcher and token transport.
//!
//! Both share one `reqwest::Client` so the refresh cookie set by login is the one
//! sent back on refresh. Nothing outside the client's cookie jar ever sees it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::{Value, json};
use taskdeck_common::{AuthPayload, LoginInput, NewAttachment, RegisterInput};
use tracing::debug;

use super::{ApiRequest, ApiResponse, HttpMethod, RequestBody, RequestDispatcher, TokenTransport};
use crate::config::{ClientConfig, Protocol};
use crate::errors::{ApiError, ErrorClass};

const USER_FIELDS: &str = "user { id username role }";

/// Build the HTTP client shared by [`HttpDispatcher`] and [`HttpTokenTransport`].
pub fn build_http_client(config: &ClientConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .cookie_store(true)
        .timeout(config.request_timeout())
        .build()
        .context("Failed to build HTTP client")
}

async fn send_raw(
    client: &reqwest::Client,
    config: &ClientConfig,
    request: &ApiRequest,
    token: Option<&str>,
) -> Result<ApiResponse, ApiError> {
    let url = config.endpoint(&request.path);
    let mut builder = match request.method {
        HttpMethod::Get => client.get(&url),
        HttpMethod::Post => client.post(&url),
        HttpMethod::Patch => client.patch(&url),
        HttpMethod::Delete => client.delete(&url),
    };
    if let Some(token) = token {
        builder = builder.bearer_auth(token);
    }
    builder = match &request.body {
        RequestBody::Empty => builder,
        RequestBody::Json(body) => builder.json(body),
        RequestBody::Multipart { fields, files } => {
            if config.protocol == Protocol::Graphql {
                // Apollo rejects multipart requests without this as a CSRF guard.
                builder = builder.header("apollo-require-preflight", "true");
            }
            builder.multipart(multipart_form(fields, files)?)
        }
    };

    debug!(label = %request.label, method = ?request.method, url = %url, "Sending request");
    let response = builder.send().await?;
    let status = response.status().as_u16();
    let text = response.text().await?;
    debug!(label = %request.label, status, "Received response");

    let body = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    };
    Ok(ApiResponse::new(status, body))
}

fn multipart_form(
    fields: &[(String, String)],
    files: &[(String, NewAttachment)],
) -> Result<Form, ApiError> {
    let mut form = Form::new();
    for (name, value) in fields {
        form = form.text(name.clone(), value.clone());
    }
    for (name, file) in files {
        let mime = if file.mime_type.is_empty() {
            mime_guess::from_path(&file.file_name)
                .first_or_octet_stream()
                .to_string()
        } else {
            file.mime_type.clone()
        };
        let part = Part::bytes(file.bytes.clone())
            .file_name(file.file_name.clone())
            .mime_str(&mime)
            .map_err(|e| ApiError::InvalidRequest(format!("{}: {}", file.file_name, e)))?;
        form = form.part(name.clone(), part);
    }
    Ok(form)
}

/// Fail unless the response is a success, mapping the classified error.
fn expect_success(protocol: Protocol, response: &ApiResponse) -> Result<(), ApiError> {
    match super::classify(protocol, response.status, &response.body) {
        None => Ok(()),
        Some(class) => Err(ApiError::from_class(class, response.status)),
    }
}

pub struct HttpDispatcher {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpDispatcher {
    pub fn new(client: reqwest::Client, config: ClientConfig) -> Self {
        Self { client, config }
    }

    pub fn protocol(&self) -> Protocol {
        self.config.protocol
    }
}

#[async_trait]
impl RequestDispatcher for HttpDispatcher {
    async fn send(&self, request: &ApiRequest, token: Option<&str>) -> Result<ApiResponse, ApiError> {
        send_raw(&self.client, &self.config, request, token).await
    }

    fn classify(&self, response: &ApiResponse) -> Option<ErrorClass> {
        super::classify(self.config.protocol, response.status, &response.body)
    }
}

/// Token endpoints for either protocol.
///
/// GraphQL: `login`/`register`/`refresh`/`logout` mutations on `/graphql`.
/// REST: `POST /auth/{login,register,refresh,logout}` with the `{ data }` envelope.
pub struct HttpTokenTransport {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpTokenTransport {
    pub fn new(client: reqwest::Client, config: ClientConfig) -> Self {
        Self { client, config }
    }

    async fn authenticate(&self, request: ApiRequest, field: &str) -> Result<AuthPayload, ApiError> {
        let response = send_raw(&self.client, &self.config, &request, None).await?;
        expect_success(self.config.protocol, &response)?;
        response.decode(self.config.protocol, field)
    }

    fn credentials_request(&self, operation: &str, field: &str, input: &LoginInput) -> Result<ApiRequest, ApiError> {
        let input = serde_json::to_value(input)?;
        Ok(match self.config.protocol {
            Protocol::Graphql => {
                let input_type = if field == "register" { "RegisterInput" } else { "LoginInput" };
                let query = format!(
                    "mutation {op}($input: {ty}!) {{ {field}(input: $input) {{ token {user} }} }}",
                    op = operation,
                    ty = input_type,
                    field = field,
                    user = USER_FIELDS,
                );
                ApiRequest::graphql(operation, &query, json!({ "input": input }))
            }
            Protocol::Rest => {
                ApiRequest::new(operation, HttpMethod::Post, format!("auth/{}", field)).json(input)
            }
        })
    }
}

#[async_trait]
impl TokenTransport for HttpTokenTransport {
    async fn refresh(&self) -> Result<AuthPayload, ApiError> {
        let request = match self.config.protocol {
            Protocol::Graphql => ApiRequest::graphql(
                "Refresh",
                &format!("mutation Refresh {{ refresh {{ token {} }} }}", USER_FIELDS),
                json!({}),
            ),
            Protocol::Rest => ApiRequest::new("Refresh", HttpMethod::Post, "auth/refresh"),
        };
        self.authenticate(request, "refresh").await
    }

    async fn login(&self, credentials: &LoginInput) -> Result<AuthPayload, ApiError> {
        let request = self.credentials_request("Login", "login", credentials)?;
        self.authenticate(request, "login").await
    }

    async fn register(&self, details: &RegisterInput) -> Result<AuthPayload, ApiError> {
        let request = self.credentials_request("Register", "register", details)?;
        self.authenticate(request, "register").await
    }

    async fn logout(&self, access_token: &str) -> Result<(), ApiError> {
        let request = match self.config.protocol {
            Protocol::Graphql => {
                ApiRequest::graphql("Logout", "mutation Logout { logout }", json!({}))
            }
            Protocol::Rest => ApiRequest::new("Logout", HttpMethod::Post, "auth/logout"),
        };
        let response = send_raw(&self.client, &self.config, &request, Some(access_token)).await?;
        expect_success(self.config.protocol, &response)
    }
}
