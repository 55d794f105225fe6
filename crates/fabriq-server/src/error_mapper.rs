//! Error-to-response mapping.

use http::StatusCode;

use fabriq_core::{ErrorResponse, HandlerError};

/// Kind used for failures that have no mapping.
pub const INTERNAL_ERROR_KIND: &str = "internal";

/// Maps a handler error to its status and body.
///
/// Categorized errors keep their kind, message and details verbatim.
/// Anything else is left unmapped (`None`).
///
/// # Example
///
/// ```rust
/// use fabriq_core::{HandlerError, MicroError};
/// use fabriq_server::map_error;
///
/// let err: HandlerError = MicroError::not_found("order", "no such order").into();
/// let (status, body) = map_error(&err).unwrap();
/// assert_eq!(status.as_u16(), 404);
/// assert_eq!(body.kind, "order");
///
/// let opaque: HandlerError = anyhow::anyhow!("socket closed").into();
/// assert!(map_error(&opaque).is_none());
/// ```
#[must_use]
pub fn map_error(err: &HandlerError) -> Option<(StatusCode, ErrorResponse)> {
    err.as_micro().map(|e| (e.status_code(), e.to_response()))
}

/// Body served for unmapped failures.
#[must_use]
pub fn internal_error() -> ErrorResponse {
    ErrorResponse {
        kind: INTERNAL_ERROR_KIND.to_string(),
        message: "Internal Server Error".to_string(),
        details: None,
    }
}
