//! Identity providers: turn a raw credential into a verified [`Principal`].

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::models::{Principal, RoleId, UserId};
use crate::config::AuthConfig;
use crate::error::TaskgateError;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Credential verification failures.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid authentication token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token issuance failed: {0}")]
    Issuance(String),

    #[error("JWT secret required for HMAC algorithms (set TASKGATE__AUTH__JWT_SECRET)")]
    MissingSecret,
}

impl From<AuthError> for TaskgateError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::InvalidToken => TaskgateError::unauthenticated("Authentication invalid"),
            AuthError::TokenExpired => {
                TaskgateError::unauthenticated("Authentication token has expired")
            }
            AuthError::Issuance(message) => TaskgateError::internal(message),
            AuthError::MissingSecret => {
                TaskgateError::configuration(AuthError::MissingSecret.to_string())
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Provider Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Verifies raw credentials.
pub trait IdentityProvider: Send + Sync {
    fn verify(&self, raw_token: &str) -> Result<Principal, AuthError>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// JWT Claims
// ═══════════════════════════════════════════════════════════════════════════════

/// JWT token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: UserId,
    pub username: String,
    /// Role ID
    pub role: RoleId,
    /// Issued at timestamp
    pub iat: i64,
    /// Expiration timestamp
    pub exp: i64,
}

impl From<&Principal> for Claims {
    fn from(principal: &Principal) -> Self {
        Self {
            sub: principal.user_id,
            username: principal.username.clone(),
            role: principal.role_id,
            iat: principal.issued_at.timestamp(),
            exp: principal.expires_at.timestamp(),
        }
    }
}

impl TryFrom<Claims> for Principal {
    type Error = AuthError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        let issued_at = DateTime::<Utc>::from_timestamp(claims.iat, 0).ok_or(AuthError::InvalidToken)?;
        let expires_at = DateTime::<Utc>::from_timestamp(claims.exp, 0).ok_or(AuthError::InvalidToken)?;
        Ok(Self {
            user_id: claims.sub,
            username: claims.username,
            role_id: claims.role,
            issued_at,
            expires_at,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// JWT Provider
// ═══════════════════════════════════════════════════════════════════════════════

/// HS256 bearer-token provider.
pub struct JwtIdentityProvider {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityProvider {
    /// Fails without a configured, non-blank secret.
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        let secret = config
            .jwt_secret
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or(AuthError::MissingSecret)?
            .as_bytes();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = config.leeway_secs;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        })
    }

    /// Sign a token carrying the principal's claims.
    pub fn issue(&self, principal: &Principal) -> Result<String, AuthError> {
        encode(&Header::new(Algorithm::HS256), &Claims::from(principal), &self.encoding_key)
            .map_err(|e| AuthError::Issuance(e.to_string()))
    }
}

impl IdentityProvider for JwtIdentityProvider {
    fn verify(&self, raw_token: &str) -> Result<Principal, AuthError> {
        let data = decode::<Claims>(raw_token, &self.decoding_key, &self.validation).map_err(|e| {
            debug!("JWT validation failed: {}", e);
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken,
            }
        })?;

        counter!("taskgate_auth_success_total", "method" => "jwt").increment(1);
        Principal::try_from(data.claims)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn config() -> AuthConfig {
        AuthConfig {
            jwt_secret: Some("test-secret".to_string()),
            leeway_secs: 0,
            ..AuthConfig::default()
        }
    }

    fn principal(ttl: Duration) -> Principal {
        let issued_at = Utc::now();
        Principal {
            user_id: UserId::new(),
            username: "alice".to_string(),
            role_id: RoleId::new(),
            issued_at,
            expires_at: issued_at + ttl,
        }
    }

    #[test]
    fn test_issue_then_verify() {
        let provider = JwtIdentityProvider::new(&config()).unwrap();
        let original = principal(Duration::hours(1));

        let token = provider.issue(&original).unwrap();
        let verified = provider.verify(&token).unwrap();

        assert_eq!(verified.user_id, original.user_id);
        assert_eq!(verified.role_id, original.role_id);
        assert_eq!(verified.username, "alice");
        assert_eq!(verified.expires_at.timestamp(), original.expires_at.timestamp());
    }

    #[test]
    fn test_expired_token_rejected() {
        let provider = JwtIdentityProvider::new(&config()).unwrap();
        let token = provider.issue(&principal(Duration::hours(-1))).unwrap();
        assert!(matches!(provider.verify(&token), Err(AuthError::TokenExpired)));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = JwtIdentityProvider::new(&config())
            .unwrap()
            .issue(&principal(Duration::hours(1)))
            .unwrap();

        let other = JwtIdentityProvider::new(&AuthConfig {
            jwt_secret: Some("another-secret".to_string()),
            ..config()
        })
        .unwrap();
        assert!(matches!(other.verify(&token), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn test_garbage_rejected() {
        let provider = JwtIdentityProvider::new(&config()).unwrap();
        assert!(matches!(provider.verify("not.a.jwt"), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn test_missing_secret_refused() {
        use crate::error::ErrorCode;
        for secret in [None, Some(String::new()), Some("   ".to_string())] {
            let result = JwtIdentityProvider::new(&AuthConfig {
                jwt_secret: secret,
                ..AuthConfig::default()
            });
            let err = TaskgateError::from(result.err().unwrap());
            assert_eq!(err.code(), ErrorCode::ConfigurationError);
        }
    }

    #[test]
    fn test_auth_error_maps_to_401() {
        use crate::error::ErrorCode;
        let err: TaskgateError = AuthError::InvalidToken.into();
        assert_eq!(err.code(), ErrorCode::Unauthenticated);
    }
}
