//! Input binding.
//!
//! A handler's second parameter is assembled from the request as one JSON
//! object, later sources overwriting earlier ones:
//!
//! 1. path parameters
//! 2. query parameters (`GET`, `DELETE` and `HEAD` only)
//! 3. the body, as JSON or as a URL-encoded form
//! 4. the headers listed in [`Input::HEADERS`]
//!
//! The object is deserialized into the input type and then validated.
//! Values taken from the path, query, form or headers are strings; numeric
//! or boolean fields fed from them should use [`lenient`].

use std::collections::HashMap;
use std::str::FromStr;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, Method};
use mime::Mime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use tracing::warn;

use fabriq_core::MicroError;

use crate::validation::{Validate, Validator};

/// Error kind for payloads that cannot be bound.
pub const BINDING_ERROR_KIND: &str = "input.binding";

/// Error message for payloads that cannot be bound.
pub const BINDING_ERROR_MESSAGE: &str = "invalid_request_payload";

/// Error kind for inputs that fail validation.
pub const VALIDATION_ERROR_KIND: &str = "validation";

/// Error message for inputs that fail validation.
pub const VALIDATION_ERROR_MESSAGE: &str = "validation.failed";

/// A handler input type.
///
/// # Example
///
/// ```rust
/// use fabriq_server::{Input, Validate, Violations};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct CreateNote {
///     title: String,
///     idempotency_key: Option<String>,
/// }
///
/// impl Validate for CreateNote {
///     fn validate(&self, v: &mut Violations) {
///         v.required("title", &self.title);
///     }
/// }
///
/// impl Input for CreateNote {
///     const HEADERS: &'static [(&'static str, &'static str)] =
///         &[("idempotency-key", "idempotency_key")];
/// }
/// ```
pub trait Input: DeserializeOwned + Validate + Send + 'static {
    /// `(header name, field name)` pairs bound from request headers.
    const HEADERS: &'static [(&'static str, &'static str)] = &[];
}

/// The parts of a request a handler input can be bound from.
#[derive(Debug, Clone, Default)]
pub struct Exchange {
    /// Request method.
    pub method: Method,
    /// Request headers.
    pub headers: HeaderMap,
    /// Raw query string, without the `?`.
    pub query: Option<String>,
    /// Matched path parameters.
    pub params: HashMap<String, String>,
    /// Collected request body.
    pub body: Bytes,
}

impl Exchange {
    /// Returns a path parameter.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// Binds and validates an input from the exchange.
pub fn bind<I: Input>(exchange: &Exchange, validator: &Validator) -> Result<I, MicroError> {
    let input: I = decode(exchange).map_err(|reason| {
        warn!(error = %reason, "failed to bind request payload");
        MicroError::functional(BINDING_ERROR_KIND, BINDING_ERROR_MESSAGE).with_details(reason)
    })?;

    validator.validate(&input).map_err(|errors| {
        warn!(fields = %errors.to_value(), "request payload failed validation");
        MicroError::functional(VALIDATION_ERROR_KIND, VALIDATION_ERROR_MESSAGE)
            .with_details(errors.to_value())
    })?;

    Ok(input)
}

fn decode<I: Input>(exchange: &Exchange) -> Result<I, String> {
    let mut fields = Map::new();

    for (name, value) in &exchange.params {
        fields.insert(name.clone(), Value::String(value.clone()));
    }

    if matches!(exchange.method, Method::GET | Method::DELETE | Method::HEAD) {
        if let Some(query) = exchange.query.as_deref() {
            merge_pairs(&mut fields, query)?;
        }
    }

    if let Some(body) = body_value(exchange)? {
        match body {
            Value::Object(object) => fields.extend(object),
            other if fields.is_empty() && I::HEADERS.is_empty() => {
                return serde_json::from_value(other).map_err(|e| e.to_string());
            }
            _ => return Err("request body must be a JSON object".to_string()),
        }
    }

    for (header, field) in I::HEADERS {
        if let Some(value) = exchange.headers.get(*header) {
            let value = value
                .to_str()
                .map_err(|_| format!("header {header} is not valid UTF-8"))?;
            fields.insert((*field).to_string(), Value::String(value.to_string()));
        }
    }

    serde_json::from_value(Value::Object(fields)).map_err(|e| e.to_string())
}

fn body_value(exchange: &Exchange) -> Result<Option<Value>, String> {
    if exchange.body.is_empty() {
        return Ok(None);
    }

    let mime = match exchange.headers.get(CONTENT_TYPE) {
        Some(value) => value
            .to_str()
            .map_err(|e| e.to_string())?
            .parse::<Mime>()
            .map_err(|e| format!("invalid content type: {e}"))?,
        None => mime::APPLICATION_JSON,
    };

    if is_json(&mime) {
        serde_json::from_slice(&exchange.body)
            .map(Some)
            .map_err(|e| e.to_string())
    } else if mime.essence_str() == mime::APPLICATION_WWW_FORM_URLENCODED.essence_str() {
        let pairs: Vec<(String, String)> =
            serde_urlencoded::from_bytes(&exchange.body).map_err(|e| e.to_string())?;
        let mut form = Map::new();
        insert_pairs(&mut form, pairs);
        Ok(Some(Value::Object(form)))
    } else {
        Err(format!("unsupported content type {}", mime.essence_str()))
    }
}

/// `application/json` and `+json` types such as `application/problem+json`.
fn is_json(mime: &Mime) -> bool {
    mime.type_() == mime::APPLICATION
        && (mime.subtype() == mime::JSON || mime.suffix() == Some(mime::JSON))
}

fn merge_pairs(fields: &mut Map<String, Value>, encoded: &str) -> Result<(), String> {
    let pairs: Vec<(String, String)> =
        serde_urlencoded::from_str(encoded).map_err(|e| e.to_string())?;
    insert_pairs(fields, pairs);
    Ok(())
}

fn insert_pairs(fields: &mut Map<String, Value>, pairs: Vec<(String, String)>) {
    for (key, value) in pairs {
        fields.insert(key, Value::String(value));
    }
}

/// Deserializes a value given either natively or as a string.
///
/// ```rust
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Page {
///     #[serde(deserialize_with = "fabriq_server::bind::lenient")]
///     limit: u32,
/// }
///
/// let page: Page = serde_json::from_str(r#"{"limit":"25"}"#).unwrap();
/// assert_eq!(page.limit, 25);
/// ```
pub fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: std::fmt::Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Either<T> {
        Native(T),
        Text(String),
    }

    match Either::<T>::deserialize(deserializer)? {
        Either::Native(value) => Ok(value),
        Either::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::Violations;
    use http::HeaderValue;
    use proptest::prelude::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Search {
        tenant: String,
        q: String,
        #[serde(default, deserialize_with = "lenient")]
        limit: u32,
        trace: Option<String>,
    }

    impl Validate for Search {
        fn validate(&self, v: &mut Violations) {
            v.required("q", &self.q).gte("limit", self.limit, 1);
        }
    }

    impl Input for Search {
        const HEADERS: &'static [(&'static str, &'static str)] = &[("x-trace", "trace")];
    }

    fn exchange(method: Method, query: Option<&str>, body: &str) -> Exchange {
        Exchange {
            method,
            query: query.map(String::from),
            params: HashMap::from([("tenant".to_string(), "acme".to_string())]),
            body: Bytes::from(body.to_string()),
            ..Exchange::default()
        }
    }

    #[test]
    fn test_binds_path_query_and_headers() {
        let mut ex = exchange(Method::GET, Some("q=red+shoes&limit=20"), "");
        ex.headers.insert("x-trace", HeaderValue::from_static("t-1"));

        let search: Search = bind(&ex, &Validator::new()).unwrap();
        assert_eq!(search.tenant, "acme");
        assert_eq!(search.q, "red shoes");
        assert_eq!(search.limit, 20);
        assert_eq!(search.trace.as_deref(), Some("t-1"));
    }

    #[test]
    fn test_query_ignored_for_post() {
        let ex = exchange(Method::POST, Some("q=ignored&limit=1"), r#"{"q":"body","limit":5}"#);
        let search: Search = bind(&ex, &Validator::new()).unwrap();
        assert_eq!(search.q, "body");
        assert_eq!(search.limit, 5);
    }

    #[test]
    fn test_body_overrides_path() {
        let ex = exchange(Method::PUT, None, r#"{"tenant":"other","q":"x","limit":1}"#);
        let search: Search = bind(&ex, &Validator::new()).unwrap();
        assert_eq!(search.tenant, "other");
    }

    #[test]
    fn test_form_body() {
        let mut ex = exchange(Method::POST, None, "q=caf%C3%A9&limit=3");
        ex.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        let search: Search = bind(&ex, &Validator::new()).unwrap();
        assert_eq!(search.q, "café");
        assert_eq!(search.limit, 3);
    }

    #[test]
    fn test_malformed_body_is_binding_error() {
        let ex = exchange(Method::POST, None, "{not json");
        let err = bind::<Search>(&ex, &Validator::new()).unwrap_err();
        assert_eq!(err.kind(), BINDING_ERROR_KIND);
        assert_eq!(err.message(), BINDING_ERROR_MESSAGE);
        assert_eq!(err.status_code().as_u16(), 400);
        assert!(err.details().is_some());
    }

    #[test]
    fn test_json_suffix_and_charset() {
        for content_type in ["application/merge-patch+json", "Application/JSON; charset=utf-8"] {
            let mut ex = exchange(Method::PATCH, None, r#"{"q":"x","limit":2}"#);
            ex.headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
            let search: Search = bind(&ex, &Validator::new()).unwrap();
            assert_eq!(search.limit, 2, "{content_type}");
        }
    }

    #[test]
    fn test_json_lookalike_is_not_json() {
        let mut ex = exchange(Method::POST, None, r#"{"q":"x","limit":2}"#);
        ex.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/jsonish"));
        let err = bind::<Search>(&ex, &Validator::new()).unwrap_err();
        assert_eq!(err.kind(), BINDING_ERROR_KIND);
    }

    #[test]
    fn test_form_with_charset_parameter() {
        let mut ex = exchange(Method::POST, None, "q=a%26b+c&limit=4");
        ex.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded; charset=UTF-8"),
        );
        let search: Search = bind(&ex, &Validator::new()).unwrap();
        assert_eq!(search.q, "a&b c");
        assert_eq!(search.limit, 4);
    }

    #[test]
    fn test_unsupported_content_type() {
        let mut ex = exchange(Method::POST, None, "<q/>");
        ex.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/xml"));
        let err = bind::<Search>(&ex, &Validator::new()).unwrap_err();
        assert_eq!(err.kind(), BINDING_ERROR_KIND);
    }

    #[test]
    fn test_validation_failure_details() {
        let ex = exchange(Method::POST, None, r#"{"q":"","limit":0}"#);
        let err = bind::<Search>(&ex, &Validator::new()).unwrap_err();
        assert_eq!(err.kind(), VALIDATION_ERROR_KIND);
        assert_eq!(err.message(), VALIDATION_ERROR_MESSAGE);
        assert_eq!(err.details(), Some(&json!({"q": "required", "limit": "gte"})));
    }

    proptest! {
        #[test]
        fn test_query_pairs_decode_to_their_values(
            key in "[a-z][a-z_]{0,11}",
            value in "\\PC{0,24}",
        ) {
            let encoded = serde_urlencoded::to_string([(key.as_str(), value.as_str())]).unwrap();
            let mut fields = Map::new();
            merge_pairs(&mut fields, &encoded).unwrap();
            prop_assert_eq!(fields.get(&key), Some(&Value::String(value)));
        }

        #[test]
        fn test_later_query_pairs_win(first in "[a-z0-9]{1,8}", second in "[a-z0-9]{1,8}") {
            let mut fields = Map::new();
            merge_pairs(&mut fields, &format!("q={first}&q={second}")).unwrap();
            prop_assert_eq!(fields.len(), 1);
            prop_assert_eq!(fields.get("q"), Some(&Value::String(second)));
        }
    }

    #[test]
    fn test_non_object_body_for_plain_input() {
        #[derive(Deserialize)]
        struct Ids(Vec<u32>);
        impl Validate for Ids {}
        impl Input for Ids {}

        let ex = Exchange {
            method: Method::POST,
            body: Bytes::from_static(b"[1,2,3]"),
            ..Exchange::default()
        };
        let ids: Ids = bind(&ex, &Validator::new()).unwrap();
        assert_eq!(ids.0, [1, 2, 3]);
    }
}
