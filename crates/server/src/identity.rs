//! Verification of identity-provider bearer tokens.
//!
//! The identity provider issues HS256 JWTs. The subject is the user id; an
//! optional `metadata.role` of `"admin"` grants administrator access.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use shopwright_core::{Role, UserId};

use crate::config::IdentityConfig;

/// Errors from token verification.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(String),
}

/// Claims carried by identity tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub metadata: ClaimsMetadata,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// Public metadata attached to the user by the identity provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClaimsMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// The authenticated caller of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: UserId,
    pub name: Option<String>,
    pub role: Role,
}

impl AuthUser {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Whether this user may read or act on an order owned by `owner`.
    #[must_use]
    pub fn can_access(&self, owner: &UserId) -> bool {
        self.is_admin() || &self.user_id == owner
    }
}

impl TryFrom<Claims> for AuthUser {
    type Error = IdentityError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        let user_id =
            UserId::parse(&claims.sub).map_err(|e| IdentityError::Invalid(e.to_string()))?;
        let role = match claims.metadata.role.as_deref() {
            Some("admin") => Role::Admin,
            _ => Role::Customer,
        };
        Ok(Self {
            user_id,
            name: claims.name,
            role,
        })
    }
}

/// Verifies bearer tokens against the shared secret.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("key", &"[REDACTED]")
            .field("issuer", &self.validation.iss)
            .finish()
    }
}

impl TokenVerifier {
    #[must_use]
    pub fn new(config: &IdentityConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }
        Self {
            key: DecodingKey::from_secret(config.jwt_secret.expose_secret().as_bytes()),
            validation,
        }
    }

    /// Verify a token and return the caller it identifies.
    ///
    /// # Errors
    ///
    /// Returns `Expired` for expired tokens and `Invalid` for anything else
    /// that fails verification.
    pub fn verify(&self, token: &str) -> Result<AuthUser, IdentityError> {
        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => IdentityError::Expired,
                _ => IdentityError::Invalid(e.to_string()),
            }
        })?;
        AuthUser::try_from(data.claims)
    }

    /// Verify the value of an `Authorization` header.
    ///
    /// # Errors
    ///
    /// Returns `MissingToken` if the header is not a bearer token.
    pub fn verify_header(&self, header: Option<&str>) -> Result<AuthUser, IdentityError> {
        let token = header
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(IdentityError::MissingToken)?;
        self.verify(token)
    }
}
