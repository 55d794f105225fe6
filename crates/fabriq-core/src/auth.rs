//! Caller authentication context.
//!
//! An [`Authentication`] is built once per request, either anonymously from
//! the `X-TenantId` header or from verified token claims, and is never
//! mutated afterwards.
//!
//! Known claims are decoded one by one into typed values; a claim with an
//! unexpected JSON type is reported as [`ClaimError::Decode`] naming the
//! claim. Every claim, known or not, is also kept verbatim in
//! [`Authentication::claims`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::MicroError;

/// Tenant used when neither a header nor a token names one.
pub const DEFAULT_TENANT_ID: &str = "default";

/// Header carrying the tenant of unauthenticated requests.
pub const TENANT_HEADER: &str = "x-tenantid";

/// Errors decoding token claims.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClaimError {
    /// A known claim was present with the wrong shape.
    #[error("failed to decode claim {claim}: {reason}")]
    Decode {
        /// The claim name.
        claim: &'static str,
        /// Why decoding failed.
        reason: String,
    },
}

impl From<ClaimError> for MicroError {
    fn from(err: ClaimError) -> Self {
        MicroError::unauthorized("unauthorized", "invalid token claims")
            .with_details(err.to_string())
    }
}

/// Metadata about the token that authenticated the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    /// The `iss` claim.
    pub issuer: String,
}

/// Identity of the caller for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Authentication {
    authenticated: bool,
    tenant_id: String,
    user_id: String,
    roles: Vec<String>,
    permissions: Vec<String>,
    name: Option<String>,
    email: Option<String>,
    phone_number: Option<String>,
    claims: Map<String, Value>,
    token: Option<TokenInfo>,
}

impl Authentication {
    /// Creates an unauthenticated context for a tenant.
    ///
    /// A missing or blank tenant falls back to [`DEFAULT_TENANT_ID`].
    ///
    /// # Example
    ///
    /// ```
    /// use fabriq_core::{Authentication, DEFAULT_TENANT_ID};
    ///
    /// assert_eq!(Authentication::anonymous(Some("acme")).tenant_id(), "acme");
    /// assert_eq!(Authentication::anonymous(None).tenant_id(), DEFAULT_TENANT_ID);
    /// ```
    #[must_use]
    pub fn anonymous(tenant_id: Option<&str>) -> Self {
        let tenant_id = tenant_id
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TENANT_ID);

        Self {
            authenticated: false,
            tenant_id: tenant_id.to_string(),
            user_id: String::new(),
            roles: Vec::new(),
            permissions: Vec::new(),
            name: None,
            email: None,
            phone_number: None,
            claims: Map::new(),
            token: None,
        }
    }

    /// Creates an authenticated context from verified token claims.
    ///
    /// With `multi_tenant` set, a non-empty issuer becomes the tenant.
    /// `role` is applied after `roles`, so it wins when both are present.
    pub fn from_claims(claims: Map<String, Value>, multi_tenant: bool) -> Result<Self, ClaimError> {
        let known = StandardClaims::decode(&claims)?;
        let issuer = known.iss.unwrap_or_default();

        let tenant_id = if multi_tenant && !issuer.is_empty() {
            issuer.clone()
        } else {
            DEFAULT_TENANT_ID.to_string()
        };

        Ok(Self {
            authenticated: true,
            tenant_id,
            user_id: known.sub.unwrap_or_default(),
            roles: known.roles,
            permissions: known.permissions,
            name: known.name,
            email: known.email,
            phone_number: known.phone,
            claims,
            token: Some(TokenInfo { issuer }),
        })
    }

    /// Returns `true` if a token authenticated the caller.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Returns the tenant. Never empty.
    #[must_use]
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Returns the user id, empty when unauthenticated.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Returns the roles in claim order.
    #[must_use]
    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    /// Returns the permissions in claim order.
    #[must_use]
    pub fn permissions(&self) -> &[String] {
        &self.permissions
    }

    /// Returns the display name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the email.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Returns the phone number.
    #[must_use]
    pub fn phone_number(&self) -> Option<&str> {
        self.phone_number.as_deref()
    }

    /// Returns all raw claims.
    #[must_use]
    pub const fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }

    /// Returns a single raw claim.
    #[must_use]
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// Returns token metadata, if authenticated.
    #[must_use]
    pub const fn token(&self) -> Option<&TokenInfo> {
        self.token.as_ref()
    }

    /// Returns `true` if the caller has the role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Returns `true` if the caller has the permission.
    #[must_use]
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

impl Default for Authentication {
    fn default() -> Self {
        Self::anonymous(None)
    }
}

/// The claims Fabriq understands, decoded with their expected types.
#[derive(Debug, Default)]
struct StandardClaims {
    sub: Option<String>,
    iss: Option<String>,
    roles: Vec<String>,
    permissions: Vec<String>,
    name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
}

impl StandardClaims {
    fn decode(claims: &Map<String, Value>) -> Result<Self, ClaimError> {
        let mut roles = decode_claim::<ClaimList>(claims, "roles")?;
        if let Some(role) = decode_claim::<ClaimList>(claims, "role")? {
            roles = Some(role);
        }

        let phone = match decode_claim::<String>(claims, "phone")? {
            Some(phone) => Some(phone),
            None => decode_claim(claims, "phone_number")?,
        };

        Ok(Self {
            sub: decode_claim(claims, "sub")?,
            iss: decode_claim(claims, "iss")?,
            roles: roles.map(ClaimList::into_vec).unwrap_or_default(),
            permissions: decode_claim::<ClaimList>(claims, "permissions")?
                .map(ClaimList::into_vec)
                .unwrap_or_default(),
            name: decode_claim(claims, "name")?,
            email: decode_claim(claims, "email")?,
            phone,
        })
    }
}

fn decode_claim<T: DeserializeOwned>(
    claims: &Map<String, Value>,
    claim: &'static str,
) -> Result<Option<T>, ClaimError> {
    match claims.get(claim) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| ClaimError::Decode {
                claim,
                reason: e.to_string(),
            }),
    }
}

/// A list claim: either `"a,b"` or `["a", "b"]`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ClaimList {
    Joined(String),
    Items(Vec<String>),
}

impl ClaimList {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::Joined(s) => split_list(&s),
            Self::Items(items) => items
                .into_iter()
                .map(|i| i.trim().to_string())
                .filter(|i| !i.is_empty())
                .collect(),
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn claims(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("claims must be an object"),
        }
    }

    #[test]
    fn test_anonymous_with_tenant() {
        let auth = Authentication::anonymous(Some("acme"));
        assert_eq!(auth.tenant_id(), "acme");
        assert!(!auth.is_authenticated());
        assert!(auth.user_id().is_empty());
        assert!(auth.token().is_none());
    }

    #[test]
    fn test_anonymous_defaults_tenant() {
        assert_eq!(Authentication::anonymous(None).tenant_id(), DEFAULT_TENANT_ID);
        assert_eq!(
            Authentication::anonymous(Some("  ")).tenant_id(),
            DEFAULT_TENANT_ID
        );
        assert_eq!(Authentication::default().tenant_id(), DEFAULT_TENANT_ID);
    }

    #[test]
    fn test_from_claims_multi_tenant() {
        let auth = Authentication::from_claims(
            claims(json!({"sub": "u1", "iss": "acme.org", "roles": "admin,editor"})),
            true,
        )
        .unwrap();

        assert!(auth.is_authenticated());
        assert_eq!(auth.user_id(), "u1");
        assert_eq!(auth.tenant_id(), "acme.org");
        assert_eq!(auth.roles(), ["admin", "editor"]);
        assert_eq!(auth.token().unwrap().issuer, "acme.org");
    }

    #[test]
    fn test_from_claims_single_tenant_ignores_issuer() {
        let auth =
            Authentication::from_claims(claims(json!({"sub": "u1", "iss": "acme.org"})), false)
                .unwrap();
        assert_eq!(auth.tenant_id(), DEFAULT_TENANT_ID);
        assert_eq!(auth.token().unwrap().issuer, "acme.org");
    }

    #[test]
    fn test_from_claims_empty_issuer_uses_default() {
        let auth = Authentication::from_claims(claims(json!({"sub": "u1"})), true).unwrap();
        assert_eq!(auth.tenant_id(), DEFAULT_TENANT_ID);
    }

    #[test]
    fn test_role_overrides_roles() {
        let auth = Authentication::from_claims(
            claims(json!({"roles": "admin,editor", "role": "viewer"})),
            false,
        )
        .unwrap();
        assert_eq!(auth.roles(), ["viewer"]);
    }

    #[test]
    fn test_list_claims_accept_arrays() {
        let auth = Authentication::from_claims(
            claims(json!({"roles": ["admin", " ops "], "permissions": "orders:read, orders:write"})),
            false,
        )
        .unwrap();
        assert_eq!(auth.roles(), ["admin", "ops"]);
        assert_eq!(auth.permissions(), ["orders:read", "orders:write"]);
        assert!(auth.has_role("ops"));
        assert!(auth.has_permission("orders:write"));
        assert!(!auth.has_permission("orders:delete"));
    }

    #[test]
    fn test_profile_claims() {
        let auth = Authentication::from_claims(
            claims(json!({
                "name": "Ada",
                "email": "ada@example.com",
                "phone_number": "+100",
                "plan": "gold"
            })),
            false,
        )
        .unwrap();
        assert_eq!(auth.name(), Some("Ada"));
        assert_eq!(auth.email(), Some("ada@example.com"));
        assert_eq!(auth.phone_number(), Some("+100"));
        assert_eq!(auth.claim("plan"), Some(&json!("gold")));
        assert_eq!(auth.claims().len(), 4);
    }

    #[test]
    fn test_phone_preferred_over_phone_number() {
        let auth = Authentication::from_claims(
            claims(json!({"phone": "+1", "phone_number": "+2"})),
            false,
        )
        .unwrap();
        assert_eq!(auth.phone_number(), Some("+1"));
    }

    #[test]
    fn test_bad_claim_type_is_reported() {
        let err = Authentication::from_claims(claims(json!({"sub": 42})), false).unwrap_err();
        let ClaimError::Decode { claim, .. } = &err;
        assert_eq!(*claim, "sub");
        assert!(err.to_string().starts_with("failed to decode claim sub"));

        let err =
            Authentication::from_claims(claims(json!({"roles": {"a": 1}})), false).unwrap_err();
        assert!(err.to_string().contains("claim roles"));
    }

    #[test]
    fn test_null_claim_is_absent() {
        let auth = Authentication::from_claims(claims(json!({"email": null})), false).unwrap();
        assert_eq!(auth.email(), None);
    }

    #[test]
    fn test_claim_error_maps_to_unauthorized() {
        let err: MicroError = ClaimError::Decode {
            claim: "sub",
            reason: "bad".into(),
        }
        .into();
        assert_eq!(err.status_code().as_u16(), 401);
    }

    proptest! {
        #[test]
        fn prop_split_list_has_no_blank_items(input in "[a-z ,]{0,40}") {
            let items = split_list(&input);
            prop_assert!(items.iter().all(|i| !i.is_empty() && i.trim() == i));
            prop_assert!(items.len() <= input.split(',').count());
        }
    }
}
