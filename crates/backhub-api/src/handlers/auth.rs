//! Login, MFA redemption, and identity handlers.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use backhub_auth::jwt::TokenScope;
use backhub_auth::mfa;
use backhub_core::error::AppError;
use backhub_entity::user::UserRole;
use backhub_service::activity::{ActorContext, actions};

use crate::extractors::AuthUser;
use crate::state::AppState;

/// Login request body.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Account email.
    pub email: String,
    /// Plaintext password.
    pub password: String,
}

/// Login response body.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    /// Bearer token; transitional when MFA is pending.
    pub access_token: String,
    /// True when the token only redeems an OTP.
    pub mfa_required: bool,
    /// Role of the account.
    pub role: UserRole,
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let user = state
        .user_repo
        .find_by_email(&body.email)
        .await?
        .ok_or_else(|| AppError::authentication("Invalid email or password"))?;

    if !user.is_active {
        return Err(AppError::authentication("Account is disabled"));
    }

    let ok = state
        .password_hasher
        .verify_password(&body.password, &user.password_hash)?;
    if !ok {
        return Err(AppError::authentication("Invalid email or password"));
    }

    let scope = if user.mfa_enabled {
        TokenScope::MfaPending
    } else {
        TokenScope::Full
    };
    let token = state.tokens.issue(user.id, user.role, scope)?;

    if scope == TokenScope::Full {
        state
            .activity
            .log(
                &ActorContext {
                    actor_id: Some(user.id),
                    ip_address: None,
                    user_agent: None,
                },
                actions::USER_LOGIN,
                "user",
                Some(user.id.into_uuid()),
                Some(user.email.clone()),
                serde_json::Value::Null,
            )
            .await;
    }

    Ok(Json(LoginResponse {
        access_token: token,
        mfa_required: user.mfa_enabled,
        role: user.role,
    }))
}

/// OTP redemption body.
#[derive(Debug, Deserialize)]
pub struct MfaVerifyRequest {
    /// The transitional token from login.
    pub token: String,
    /// Six-digit TOTP code.
    pub code: String,
}

/// POST /api/auth/mfa/verify
///
/// Redeems an mfa-pending token for a full one.
pub async fn mfa_verify(
    State(state): State<AppState>,
    Json(body): Json<MfaVerifyRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let claims = state.tokens.decode(&body.token)?;
    if claims.scope != TokenScope::MfaPending {
        return Err(AppError::validation("Token is not awaiting MFA"));
    }

    let user = state
        .user_repo
        .find_by_id(claims.user_id())
        .await?
        .ok_or_else(|| AppError::authentication("Unknown user"))?;

    let sealed = user
        .mfa_secret_sealed
        .as_deref()
        .ok_or_else(|| AppError::integrity("MFA enabled without a secret"))?;
    let secret = state.seal.unseal(sealed)?.plaintext;
    let secret_bytes = secret.into_bytes();

    if !mfa::verify(&secret_bytes, body.code.trim()) {
        return Err(AppError::authentication("Invalid one-time code"));
    }

    let token = state.tokens.issue(user.id, user.role, TokenScope::Full)?;
    state
        .activity
        .log(
            &ActorContext {
                actor_id: Some(user.id),
                ip_address: None,
                user_agent: None,
            },
            actions::USER_LOGIN,
            "user",
            Some(user.id.into_uuid()),
            Some(user.email.clone()),
            serde_json::json!({"mfa": true}),
        )
        .await;

    Ok(Json(LoginResponse {
        access_token: token,
        mfa_required: false,
        role: user.role,
    }))
}

/// Identity response.
#[derive(Debug, Serialize)]
pub struct MeResponse {
    /// User id.
    pub id: uuid::Uuid,
    /// Role.
    pub role: UserRole,
}

/// GET /api/auth/me
pub async fn me(auth: AuthUser) -> Json<MeResponse> {
    Json(MeResponse {
        id: auth.user_id.into_uuid(),
        role: auth.role,
    })
}
