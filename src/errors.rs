//! Typed error hierarchy for the taskdeck client.
//!
//! - `ErrorClass`: what a transport adapter makes of a failed response
//! - `ApiError`: request failures surfaced by the session manager and entity API
//! - `MutationError`: optimistic mutation failures, returned after rollback
//! - `StoreError`: token persistence failures

use std::path::PathBuf;

use serde::Serialize;
use taskdeck_common::{EntityId, EntityKind};
use thiserror::Error;

/// One field-level validation message from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Transport-independent classification of a failed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    Unauthenticated,
    Validation {
        message: String,
        fields: Vec<FieldError>,
    },
    Generic(String),
}

/// Errors from a request sent through the session manager.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// A replayed request was rejected again after a successful refresh.
    #[error("Unauthenticated")]
    Unauthenticated,

    /// The refresh credential was rejected; the session has been cleared.
    #[error("Session expired: {0}")]
    SessionExpired(String),

    #[error("{message}")]
    Validation {
        message: String,
        fields: Vec<FieldError>,
    },

    #[error("Request failed with status {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    /// Build the error for a classified response. Authentication failures that reach
    /// this point were already retried once.
    pub fn from_class(class: ErrorClass, status: u16) -> Self {
        match class {
            ErrorClass::Unauthenticated => Self::Unauthenticated,
            ErrorClass::Validation { message, fields } => Self::Validation { message, fields },
            ErrorClass::Generic(message) => Self::Server { status, message },
        }
    }

    /// Lines to show in a user notification.
    pub fn messages(&self) -> Vec<String> {
        match self {
            Self::Validation { message, fields } if fields.is_empty() => vec![message.clone()],
            Self::Validation { fields, .. } => fields.iter().map(|f| f.message.clone()).collect(),
            Self::Server { message, .. } => vec![message.clone()],
            other => vec![other.to_string()],
        }
    }

    /// Whether the session is gone and the UI should show the login view.
    pub fn requires_login(&self) -> bool {
        matches!(self, Self::Unauthenticated | Self::SessionExpired(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Errors from an optimistic mutation. Any cache write it made has been undone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MutationError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("{kind} {id} has not been confirmed by the server yet")]
    PendingEntity { kind: EntityKind, id: EntityId },
}

impl MutationError {
    pub fn messages(&self) -> Vec<String> {
        match self {
            Self::Api(err) => err.messages(),
            other => vec![other.to_string()],
        }
    }
}

/// Errors from the persisted token store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access token store at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Token store at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
