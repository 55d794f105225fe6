//! Request authentication.
//!
//! Requests without an `Authorization: Bearer` header are anonymous and
//! scoped to the tenant named by `X-TenantId` (or the default tenant).
//! Bearer tokens are checked by a [`TokenVerifier`]; a failure rejects the
//! request with 401 before routing.

use std::sync::Arc;

use http::header::AUTHORIZATION;
use http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use fabriq_core::{Authentication, ClaimError, MicroError, TENANT_HEADER};

/// Prefix of a bearer `Authorization` header.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Authentication failures.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The token failed verification.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// The token verified but its claims could not be decoded.
    #[error(transparent)]
    Claims(#[from] ClaimError),
}

impl From<AuthError> for MicroError {
    fn from(err: AuthError) -> Self {
        MicroError::unauthorized("unauthorized", "invalid or expired jwt")
            .with_details(err.to_string())
    }
}

/// Verifies bearer tokens and returns their claims.
pub trait TokenVerifier: Send + Sync + 'static {
    /// Verifies `token` and returns its claims.
    fn verify(&self, token: &str) -> Result<Map<String, Value>, AuthError>;
}

/// HMAC-signed JWT verification.
///
/// `exp` and `nbf` are checked when present but not required.
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Creates a verifier for HS256 tokens signed with `secret`.
    #[must_use]
    pub fn hs256(secret: &[u8]) -> Self {
        Self::with_algorithm(secret, Algorithm::HS256)
    }

    /// Creates a verifier for HMAC tokens using `algorithm`.
    #[must_use]
    pub fn with_algorithm(secret: &[u8], algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.required_spec_claims.clear();
        validation.validate_aud = false;
        validation.validate_nbf = true;

        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Only accepts tokens issued by one of `issuers`.
    #[must_use]
    pub fn with_issuers(mut self, issuers: &[&str]) -> Self {
        self.validation.set_issuer(issuers);
        self
    }

    /// Only accepts tokens for one of `audiences`.
    #[must_use]
    pub fn with_audiences(mut self, audiences: &[&str]) -> Self {
        self.validation.set_audience(audiences);
        self.validation.validate_aud = true;
        self
    }
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Map<String, Value>, AuthError> {
        decode::<Map<String, Value>>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }
}

/// Builds the [`Authentication`] for each request.
#[derive(Clone, Default)]
pub struct AuthResolver {
    verifier: Option<Arc<dyn TokenVerifier>>,
    multi_tenant: bool,
}

impl AuthResolver {
    /// Creates a resolver that treats every request as anonymous.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Verifies bearer tokens with `verifier`.
    #[must_use]
    pub fn with_verifier(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Lets the token issuer select the tenant.
    #[must_use]
    pub fn multi_tenant(mut self, enabled: bool) -> Self {
        self.multi_tenant = enabled;
        self
    }

    /// Resolves the caller from request headers.
    ///
    /// Without a verifier, bearer tokens are ignored.
    pub fn resolve(&self, headers: &HeaderMap) -> Result<Authentication, MicroError> {
        let token = bearer_token(headers);

        match (token, &self.verifier) {
            (Some(token), Some(verifier)) => {
                let claims = verifier.verify(token)?;
                let auth =
                    Authentication::from_claims(claims, self.multi_tenant).map_err(AuthError::from)?;
                debug!(
                    user_id = auth.user_id(),
                    tenant_id = auth.tenant_id(),
                    "authenticated request"
                );
                Ok(auth)
            }
            _ => {
                let tenant = headers.get(TENANT_HEADER).and_then(|v| v.to_str().ok());
                Ok(Authentication::anonymous(tenant))
            }
        }
    }
}

impl std::fmt::Debug for AuthResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthResolver")
            .field("verifier", &self.verifier.is_some())
            .field("multi_tenant", &self.multi_tenant)
            .finish()
    }
}

/// Returns the token of a `Bearer` authorization header.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
