//! Connection Authentication
//!
//! Tokens are JWTs minted by an external identity provider; this server only
//! checks them and maps the subject to a `UserId`.
//!
//! With no key configured the server runs in development mode and the token
//! is read as a bare user UUID.

use std::fmt;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::core::ids::UserId;
use crate::network::protocol::ErrorCode;

/// Token verification settings.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Required `iss`, if any.
    pub issuer: Option<String>,
    /// Required `aud`, if any.
    pub audience: Option<String>,
    /// RS256 public key (PEM). Takes precedence over `secret`.
    pub public_key_pem: Option<String>,
    /// HS256 shared secret.
    pub secret: Option<String>,
    /// Accept expired tokens. Test setups only.
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Read `AUTH_*` keys through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            issuer: lookup("AUTH_ISSUER"),
            audience: lookup("AUTH_AUDIENCE"),
            public_key_pem: lookup("AUTH_PUBLIC_KEY_PEM"),
            secret: lookup("AUTH_SECRET"),
            skip_expiry: lookup("AUTH_SKIP_EXPIRY")
                .map(|v| matches!(v.trim(), "1" | "true"))
                .unwrap_or(false),
        }
    }

    /// Is a verification key set?
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }
}

/// Why a token was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Not a token we can parse.
    #[error("malformed token: {0}")]
    Malformed(String),
    /// Signature does not verify.
    #[error("invalid signature")]
    InvalidSignature,
    /// Past `exp`.
    #[error("token expired")]
    Expired,
    /// `iss` does not match.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// `aud` does not match.
    #[error("invalid audience")]
    InvalidAudience,
    /// No `sub` claim.
    #[error("token has no subject")]
    MissingSubject,
    /// The configured key does not load.
    #[error("invalid verification key: {0}")]
    InvalidKey(String),
}

impl AuthError {
    /// Wire code for an `auth_result`.
    pub fn code(&self) -> ErrorCode {
        match self {
            AuthError::Expired => ErrorCode::TokenExpired,
            AuthError::Malformed(_) | AuthError::MissingSubject => ErrorCode::InvalidToken,
            _ => ErrorCode::AuthFailed,
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
            ErrorKind::InvalidAudience => AuthError::InvalidAudience,
            ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidKeyFormat => AuthError::InvalidKey(err.to_string()),
            _ => AuthError::Malformed(err.to_string()),
        }
    }
}

/// The claims this server reads. Everything else in the token is ignored.
#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    sub: String,
}

/// Map an identity-provider subject to a `UserId`.
///
/// UUID subjects are taken as-is; anything else is hashed so the mapping is
/// stable across restarts and servers.
pub fn subject_user_id(sub: &str) -> UserId {
    if let Some(id) = UserId::parse(sub) {
        return id;
    }
    let digest = Sha256::new()
        .chain_update(b"tabletop-user:")
        .chain_update(sub.as_bytes())
        .finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    UserId::from_bytes(bytes)
}

enum Mode {
    Development,
    Jwt { key: DecodingKey, validation: Validation },
}

/// Token checker, built once from an `AuthConfig`.
pub struct Authenticator {
    mode: Mode,
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.mode {
            Mode::Development => "development",
            Mode::Jwt { .. } => "jwt",
        };
        f.debug_struct("Authenticator").field("mode", &mode).finish()
    }
}

impl Authenticator {
    /// Load keys and validation rules.
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        let (key, algorithm) = match (&config.public_key_pem, &config.secret) {
            (Some(pem), _) => (DecodingKey::from_rsa_pem(pem.as_bytes())?, Algorithm::RS256),
            (None, Some(secret)) => (DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256),
            (None, None) => return Ok(Self::development()),
        };

        let mut validation = Validation::new(algorithm);
        validation.required_spec_claims.clear();
        validation.validate_exp = !config.skip_expiry;
        match &config.audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }
        if let Some(iss) = &config.issuer {
            validation.set_issuer(&[iss]);
        }

        Ok(Self { mode: Mode::Jwt { key, validation } })
    }

    /// Accept bare user UUIDs.
    pub fn development() -> Self {
        Self { mode: Mode::Development }
    }

    /// Running without keys?
    pub fn is_development(&self) -> bool {
        matches!(self.mode, Mode::Development)
    }

    /// Resolve a connection token to a user.
    pub fn authenticate(&self, token: &str) -> Result<UserId, AuthError> {
        match &self.mode {
            Mode::Development => UserId::parse(token.trim())
                .ok_or_else(|| AuthError::Malformed("expected a user id".into())),
            Mode::Jwt { key, validation } => {
                let claims = decode::<Claims>(token, key, validation)?.claims;
                if claims.sub.is_empty() {
                    return Err(AuthError::MissingSubject);
                }
                Ok(subject_user_id(&claims.sub))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "test-secret-key-256-bits-long!!";

    fn sign(claims: serde_json::Value, secret: &str) -> String {
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    fn in_an_hour() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    fn jwt(config: AuthConfig) -> Authenticator {
        Authenticator::new(&AuthConfig { secret: Some(SECRET.into()), ..config }).unwrap()
    }

    #[test]
    fn test_valid_token_maps_subject() {
        let auth = jwt(AuthConfig::default());
        let token = sign(json!({"sub": "user123", "exp": in_an_hour()}), SECRET);
        assert_eq!(auth.authenticate(&token).unwrap(), subject_user_id("user123"));
        assert!(!auth.is_development());
    }

    #[test]
    fn test_rejections() {
        let auth = jwt(AuthConfig { issuer: Some("issuer".into()), ..Default::default() });

        let expired = sign(json!({"sub": "u", "iss": "issuer", "exp": 1}), SECRET);
        assert_eq!(auth.authenticate(&expired), Err(AuthError::Expired));

        let forged = sign(json!({"sub": "u", "iss": "issuer", "exp": in_an_hour()}), "some-other-secret-entirely!!");
        assert_eq!(auth.authenticate(&forged), Err(AuthError::InvalidSignature));

        let foreign = sign(json!({"sub": "u", "iss": "elsewhere", "exp": in_an_hour()}), SECRET);
        assert_eq!(auth.authenticate(&foreign), Err(AuthError::InvalidIssuer));

        let anonymous = sign(json!({"iss": "issuer", "exp": in_an_hour()}), SECRET);
        assert_eq!(auth.authenticate(&anonymous), Err(AuthError::MissingSubject));

        assert!(matches!(auth.authenticate("not-a-jwt"), Err(AuthError::Malformed(_))));

        // Bare ids only work without keys
        let bare = UserId::from_bytes([1; 16]).to_string();
        assert!(auth.authenticate(&bare).is_err());
    }

    #[test]
    fn test_audience_and_expiry_settings() {
        let auth = jwt(AuthConfig { audience: Some("tabletop".into()), skip_expiry: true, ..Default::default() });
        let token = sign(json!({"sub": "u", "aud": "tabletop", "exp": 1}), SECRET);
        assert!(auth.authenticate(&token).is_ok());

        let wrong = sign(json!({"sub": "u", "aud": "chat", "exp": 1}), SECRET);
        assert_eq!(auth.authenticate(&wrong), Err(AuthError::InvalidAudience));
    }

    #[test]
    fn test_subject_mapping() {
        assert_eq!(subject_user_id("user123"), subject_user_id("user123"));
        assert_ne!(subject_user_id("user123"), subject_user_id("user456"));

        let uuid = UserId::from_bytes([7; 16]);
        assert_eq!(subject_user_id(&uuid.to_string()), uuid);
    }

    #[test]
    fn test_development_mode() {
        let auth = Authenticator::new(&AuthConfig::default()).unwrap();
        assert!(auth.is_development());

        let user = UserId::from_bytes([3; 16]);
        assert_eq!(auth.authenticate(&format!(" {} ", user)).unwrap(), user);
        assert_eq!(auth.authenticate("nope").unwrap_err().code(), ErrorCode::InvalidToken);
    }

    #[test]
    fn test_bad_key_is_reported() {
        let config = AuthConfig { public_key_pem: Some("not a pem".into()), ..Default::default() };
        assert!(matches!(Authenticator::new(&config), Err(AuthError::InvalidKey(_))));
    }

    #[test]
    fn test_from_lookup() {
        let config = AuthConfig::from_lookup(|key| match key {
            "AUTH_SECRET" => Some("s".into()),
            "AUTH_SKIP_EXPIRY" => Some("true".into()),
            _ => None,
        });
        assert!(config.is_configured());
        assert!(config.skip_expiry);
        assert!(config.issuer.is_none());
    }
}
