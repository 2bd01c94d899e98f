//! Normalizes REST and GraphQL failure shapes into [`ErrorClass`].
//!
//! REST signals an expired token with HTTP 401. GraphQL answers 200 with an
//! `errors[]` array whose entries carry `extensions.code = "UNAUTHENTICATED"`
//! (or only a message saying so). Both end up as `ErrorClass::Unauthenticated`.

use serde_json::Value;

use crate::config::Protocol;
use crate::errors::{ErrorClass, FieldError};

const UNAUTHENTICATED_CODE: &str = "UNAUTHENTICATED";
const UNAUTHENTICATED_MARKERS: &[&str] = &["unauthorized", "unauthenticated"];

pub fn classify(protocol: Protocol, status: u16, body: &Value) -> Option<ErrorClass> {
    match protocol {
        Protocol::Graphql => classify_graphql(status, body),
        Protocol::Rest => classify_rest(status, body),
    }
}

pub fn classify_graphql(status: u16, body: &Value) -> Option<ErrorClass> {
    if status == 401 {
        return Some(ErrorClass::Unauthenticated);
    }

    let errors = body
        .get("errors")
        .and_then(Value::as_array)
        .filter(|errors| !errors.is_empty());

    let Some(errors) = errors else {
        if (200..300).contains(&status) {
            return None;
        }
        return Some(ErrorClass::Generic(status_message(status)));
    };

    if errors.iter().any(is_unauthenticated_entry) {
        return Some(ErrorClass::Unauthenticated);
    }

    let first = &errors[0];
    let message = first
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("Request failed")
        .to_string();
    let fields = field_errors(first.pointer("/extensions/errors"));
    if fields.is_empty() {
        Some(ErrorClass::Generic(message))
    } else {
        Some(ErrorClass::Validation { message, fields })
    }
}

pub fn classify_rest(status: u16, body: &Value) -> Option<ErrorClass> {
    if status == 401 {
        return Some(ErrorClass::Unauthenticated);
    }
    if (200..300).contains(&status) {
        return None;
    }

    let message = body
        .get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.trim().is_empty())
        .map(str::to_string)
        .or_else(|| body.as_str().filter(|s| !s.trim().is_empty()).map(str::to_string));

    let fields = field_errors(body.get("errors"));
    if !fields.is_empty() {
        return Some(ErrorClass::Validation {
            message: message.unwrap_or_else(|| "Validation failed!".to_string()),
            fields,
        });
    }
    Some(ErrorClass::Generic(
        message.unwrap_or_else(|| status_message(status)),
    ))
}

fn is_unauthenticated_entry(entry: &Value) -> bool {
    let code = entry.pointer("/extensions/code").and_then(Value::as_str);
    if code == Some(UNAUTHENTICATED_CODE) {
        return true;
    }
    entry
        .get("message")
        .and_then(Value::as_str)
        .map(|m| {
            let lower = m.to_lowercase();
            UNAUTHENTICATED_MARKERS.iter().any(|marker| lower.contains(marker))
        })
        .unwrap_or(false)
}

/// `[{ path, message }]` as both server generations emit it.
fn field_errors(value: Option<&Value>) -> Vec<FieldError> {
    value
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| {
                    let message = entry.get("message").and_then(Value::as_str)?;
                    if message.trim().is_empty() {
                        return None;
                    }
                    let field = match entry.get("path") {
                        Some(Value::String(path)) => path.clone(),
                        Some(Value::Array(parts)) => parts
                            .iter()
                            .map(|p| match p {
                                Value::String(s) => s.clone(),
                                other => other.to_string(),
                            })
                            .collect::<Vec<_>>()
                            .join("."),
                        _ => String::new(),
                    };
                    Some(FieldError::new(field, message))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn status_message(status: u16) -> String {
    format!("Request failed with status {}", status)
}
