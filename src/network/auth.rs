//! Join Authentication
//!
//! A server may require a shared password, a JWT issued by an external
//! provider, or nothing at all. The server never issues tokens. A token
//! carrying `"role": "admin"` admits its holder straight into the Admin
//! group; everyone else lands in the default group.

use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Role claim value that grants the Admin group.
pub const ADMIN_ROLE: &str = "admin";

/// Authentication configuration.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Shared server password.
    pub password: Option<String>,
    /// HS256 secret for player tokens.
    pub jwt_secret: Option<String>,
    /// Required issuer claim, if any.
    pub issuer: Option<String>,
    /// Required audience claim, if any.
    pub audience: Option<String>,
    /// Accept expired tokens. Test servers only.
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Read `PARK_AUTH_PASSWORD` and the `PARK_JWT_*` variables.
    pub fn from_env() -> Self {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
        Self {
            password: var("PARK_AUTH_PASSWORD"),
            jwt_secret: var("PARK_JWT_SECRET"),
            issuer: var("PARK_JWT_ISSUER"),
            audience: var("PARK_JWT_AUDIENCE"),
            skip_expiry: false,
        }
    }

    /// True if joining requires credentials.
    pub fn is_required(&self) -> bool {
        self.password.is_some() || self.jwt_secret.is_some()
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = !self.skip_expiry;
        if self.skip_expiry {
            validation.set_required_spec_claims(&["sub"]);
        } else {
            validation.set_required_spec_claims(&["exp", "sub"]);
        }
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        validation
    }
}

/// What a joining client presents.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Requested display name
    pub name: String,
    /// Server password, if any
    pub password: Option<String>,
    /// Provider token, if any
    pub token: Option<String>,
}

/// Claims read from a player token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Provider user id.
    pub sub: String,
    /// Display name; falls back to the requested name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Park role, e.g. [`ADMIN_ROLE`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Expiry (Unix seconds).
    pub exp: u64,
    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// Outcome of a successful join check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Admission {
    /// Name to register in the player list.
    pub name: String,
    /// Join straight into the Admin group.
    pub admin: bool,
}

impl Admission {
    fn guest(name: &str) -> Self {
        Self {
            name: name.to_string(),
            admin: false,
        }
    }
}

/// Why a join was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Server wants credentials the client did not send.
    #[error("credentials required")]
    CredentialsRequired,
    /// Wrong server password.
    #[error("bad password")]
    BadPassword,
    /// Not a JWT.
    #[error("invalid token format")]
    InvalidFormat,
    /// Signed with another key.
    #[error("invalid signature")]
    InvalidSignature,
    /// Past its `exp`.
    #[error("token expired")]
    Expired,
    /// Wrong `iss`.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// Wrong `aud`.
    #[error("invalid audience")]
    InvalidAudience,
    /// A required claim is absent or empty.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// Anything else the JWT library reports.
    #[error("decode error: {0}")]
    DecodeError(String),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
            ErrorKind::InvalidAudience => AuthError::InvalidAudience,
            ErrorKind::MissingRequiredClaim(claim) => AuthError::MissingClaim(claim.clone()),
            ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                AuthError::InvalidFormat
            }
            _ => AuthError::DecodeError(err.to_string()),
        }
    }
}

/// Check a join request against the server's requirements.
pub fn authenticate(request: &AuthRequest, config: &AuthConfig) -> Result<Admission, AuthError> {
    if let Some(expected) = &config.password {
        let given = request.password.as_deref().ok_or(AuthError::CredentialsRequired)?;
        if !password_matches(given, expected) {
            return Err(AuthError::BadPassword);
        }
    }

    if config.jwt_secret.is_none() {
        return Ok(Admission::guest(&request.name));
    }
    let token = request.token.as_deref().ok_or(AuthError::CredentialsRequired)?;
    let claims = validate_token(token, config)?;
    Ok(Admission {
        admin: claims.role.as_deref() == Some(ADMIN_ROLE),
        name: claims.name.unwrap_or_else(|| request.name.clone()),
    })
}

// Digest both sides so the comparison runs over fixed-length input.
fn password_matches(given: &str, expected: &str) -> bool {
    let given = Sha256::digest(given.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    given.iter().zip(expected.iter()).fold(0u8, |diff, (a, b)| diff | (a ^ b)) == 0
}

/// Verify a player token and return its claims.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<TokenClaims, AuthError> {
    let secret = config.jwt_secret.as_deref().ok_or(AuthError::CredentialsRequired)?;
    let key = DecodingKey::from_secret(secret.as_bytes());
    let claims = decode::<TokenClaims>(token, &key, &config.validation())?.claims;
    if claims.sub.trim().is_empty() {
        return Err(AuthError::MissingClaim("sub".into()));
    }
    Ok(claims)
}
