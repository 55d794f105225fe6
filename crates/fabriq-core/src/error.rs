//! Error taxonomy for Fabriq services.
//!
//! Every expected failure a handler or filter can report is a [`MicroError`]
//! in one of six categories. Each category has exactly one HTTP status:
//!
//! | `ErrorCategory` | Status |
//! |---|---|
//! | `Functional` | 400 Bad Request |
//! | `Technical` | 500 Internal Server Error |
//! | `Forbidden` | 403 Forbidden |
//! | `Unauthorized` | 401 Unauthorized |
//! | `ResourceNotFound` | 404 Not Found |
//! | `Conflict` | 409 Conflict |
//!
//! Anything else a handler returns is a [`HandlerError::Other`] and is left
//! unmapped; the server answers it with a generic 500.

use http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Result type alias using [`MicroError`].
pub type MicroResult<T> = Result<T, MicroError>;

/// Result type alias using [`HandlerError`].
pub type HandlerResult<T> = Result<T, HandlerError>;

/// The closed set of error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The caller's request is semantically invalid.
    Functional,
    /// Internal failure.
    Technical,
    /// The caller is known but not allowed.
    Forbidden,
    /// The caller could not be authenticated.
    Unauthorized,
    /// The addressed resource does not exist.
    ResourceNotFound,
    /// The request conflicts with current state.
    Conflict,
}

impl ErrorCategory {
    /// All categories, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Functional,
        Self::Technical,
        Self::Forbidden,
        Self::Unauthorized,
        Self::ResourceNotFound,
        Self::Conflict,
    ];

    /// Returns the HTTP status code for this category.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Functional => StatusCode::BAD_REQUEST,
            Self::Technical => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::ResourceNotFound => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
        }
    }

    /// Returns the category name used in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Functional => "functional",
            Self::Technical => "technical",
            Self::Forbidden => "forbidden",
            Self::Unauthorized => "unauthorized",
            Self::ResourceNotFound => "resource_not_found",
            Self::Conflict => "conflict",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A categorized domain error.
///
/// `kind` is a stable machine-readable string (for example `"validation"` or
/// `"order.closed"`), `message` is for humans, and `details` carries any
/// structured payload the client should see.
///
/// # Example
///
/// ```
/// use fabriq_core::{ErrorCategory, MicroError};
///
/// let err = MicroError::conflict("order.closed", "order already shipped");
/// assert_eq!(err.category(), ErrorCategory::Conflict);
/// assert_eq!(err.status_code().as_u16(), 409);
/// ```
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{category} error [{kind}]: {message}")]
pub struct MicroError {
    category: ErrorCategory,
    kind: String,
    message: String,
    details: Option<Value>,
}

impl MicroError {
    /// Creates an error in the given category.
    #[must_use]
    pub fn new(
        category: ErrorCategory,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            kind: kind.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Creates a functional (400) error.
    #[must_use]
    pub fn functional(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Functional, kind, message)
    }

    /// Creates a technical (500) error.
    #[must_use]
    pub fn technical(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Technical, kind, message)
    }

    /// Creates a forbidden (403) error.
    #[must_use]
    pub fn forbidden(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Forbidden, kind, message)
    }

    /// Creates an unauthorized (401) error.
    #[must_use]
    pub fn unauthorized(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Unauthorized, kind, message)
    }

    /// Creates a resource-not-found (404) error.
    #[must_use]
    pub fn not_found(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::ResourceNotFound, kind, message)
    }

    /// Creates a conflict (409) error.
    #[must_use]
    pub fn conflict(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Conflict, kind, message)
    }

    /// Attaches structured details.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<Value>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.category
    }

    /// Returns the machine-readable kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the structured details, if any.
    #[must_use]
    pub const fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        self.category.status_code()
    }

    /// Converts this error into the response body sent to clients.
    #[must_use]
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            kind: self.kind.clone(),
            message: self.message.clone(),
            details: self.details.clone(),
        }
    }
}

/// Failure returned by handlers and route filters.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// A categorized error with a defined HTTP mapping.
    #[error(transparent)]
    Micro(#[from] MicroError),

    /// Any other error. Not mapped; served as a generic 500.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    /// Returns the categorized error, if this is one.
    #[must_use]
    pub const fn as_micro(&self) -> Option<&MicroError> {
        match self {
            Self::Micro(e) => Some(e),
            Self::Other(_) => None,
        }
    }
}

/// Uniform error body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error kind.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// Structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Field-level validation failures: field name to the failed constraint tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failed constraint. The first failure per field is kept.
    pub fn add(&mut self, field: impl Into<String>, tag: impl Into<String>) {
        self.0.entry(field.into()).or_insert_with(|| tag.into());
    }

    /// Returns the tag recorded for a field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    /// Returns `true` if there are no failures.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of failed fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates over `(field, tag)` pairs in field order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Converts the failures into a JSON object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    }
}
