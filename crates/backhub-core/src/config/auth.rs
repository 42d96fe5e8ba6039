//! Authentication and credential-seal configuration.

use serde::{Deserialize, Serialize};

/// Authentication settings for the master.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Secret used to sign JWTs and to derive the credential-seal key.
    pub secret_key: String,
    /// Previous secrets accepted during key rotation, newest first.
    /// Records sealed under an old generation re-encrypt lazily on next write.
    #[serde(default)]
    pub previous_secret_keys: Vec<String>,
    /// Access token lifetime in minutes.
    #[serde(default = "default_token_ttl")]
    pub access_token_minutes: i64,
    /// Lifetime of the transitional MFA-pending token in minutes.
    #[serde(default = "default_mfa_token_ttl")]
    pub mfa_token_minutes: i64,
    /// TOTP issuer name shown in authenticator apps.
    #[serde(default = "default_issuer")]
    pub mfa_issuer: String,
}

fn default_token_ttl() -> i64 {
    60
}

fn default_mfa_token_ttl() -> i64 {
    5
}

fn default_issuer() -> String {
    "BackHub".to_string()
}
