//! JWT issuance and validation for user bearer tokens.
//!
//! Tokens carry the user's role and a `scope` that distinguishes a fully
//! authenticated session from the transitional state between password
//! login and OTP redemption.

use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use backhub_core::config::AuthConfig;
use backhub_core::error::AppError;
use backhub_core::result::AppResult;
use backhub_core::types::id::UserId;
use backhub_entity::user::UserRole;

/// What a token is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenScope {
    /// Fully authenticated.
    Full,
    /// Password accepted, OTP still outstanding. Only usable to redeem
    /// the OTP.
    MfaPending,
}

/// JWT claims payload embedded in every token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject — the user ID.
    pub sub: Uuid,
    /// User role at the time of issuance.
    pub role: UserRole,
    /// Token scope.
    pub scope: TokenScope,
    /// Issued-at timestamp (seconds since epoch).
    pub iat: i64,
    /// Expiration timestamp (seconds since epoch).
    pub exp: i64,
    /// JWT ID.
    pub jti: Uuid,
}

impl Claims {
    /// Returns the user ID from the subject claim.
    pub fn user_id(&self) -> UserId {
        UserId::from_uuid(self.sub)
    }

    /// Whether the token is fully authenticated.
    pub fn is_full(&self) -> bool {
        self.scope == TokenScope::Full
    }
}

/// Signs and validates bearer tokens.
#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
    mfa_ttl: Duration,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec").finish()
    }
}

impl TokenCodec {
    /// Build the codec from the auth configuration.
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.secret_key.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret_key.as_bytes()),
            access_ttl: Duration::minutes(config.access_token_minutes),
            mfa_ttl: Duration::minutes(config.mfa_token_minutes),
        }
    }

    /// Issue a token for a user at the given scope.
    pub fn issue(&self, user_id: UserId, role: UserRole, scope: TokenScope) -> AppResult<String> {
        let now = Utc::now();
        let ttl = match scope {
            TokenScope::Full => self.access_ttl,
            TokenScope::MfaPending => self.mfa_ttl,
        };
        let claims = Claims {
            sub: user_id.into_uuid(),
            role,
            scope,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: Uuid::new_v4(),
        };

        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AppError::internal(format!("Failed to sign token: {e}")))
    }

    /// Validate a token and return its claims.
    pub fn decode(&self, token: &str) -> AppResult<Claims> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| AppError::authentication(format!("Invalid token: {e}")))
    }

    /// Validate a token and require full scope.
    pub fn decode_full(&self, token: &str) -> AppResult<Claims> {
        let claims = self.decode(token)?;
        if !claims.is_full() {
            return Err(AppError::authorization(
                "Token is awaiting MFA verification",
            ));
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> TokenCodec {
        TokenCodec::new(&AuthConfig {
            secret_key: "unit-test-secret".to_string(),
            previous_secret_keys: vec![],
            access_token_minutes: 60,
            mfa_token_minutes: 5,
            mfa_issuer: "BackHub".to_string(),
        })
    }

    #[test]
    fn issue_and_decode() {
        let codec = codec();
        let user = UserId::new();
        let token = codec
            .issue(user, UserRole::NodeAdmin, TokenScope::Full)
            .unwrap();
        let claims = codec.decode(&token).unwrap();
        assert_eq!(claims.user_id(), user);
        assert_eq!(claims.role, UserRole::NodeAdmin);
        assert!(claims.is_full());
    }

    #[test]
    fn mfa_pending_token_is_not_full() {
        let codec = codec();
        let token = codec
            .issue(UserId::new(), UserRole::SuperAdmin, TokenScope::MfaPending)
            .unwrap();
        assert!(codec.decode(&token).is_ok());
        assert!(codec.decode_full(&token).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(codec().decode("not.a.token").is_err());
    }
}
