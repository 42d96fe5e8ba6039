//! User management CLI commands.

use clap::Args;
use rand::Rng;
use serde::Serialize;
use tabled::Tabled;

use backhub_auth::password::PasswordHasher;
use backhub_core::error::AppError;
use backhub_database::repositories::user::UserRepository;
use backhub_service::activity::{ActorContext, actions};

use crate::output::{self, OutputFormat};

/// Arguments for `list-users`.
#[derive(Debug, Args)]
pub struct ListUsersArgs {
    /// Filter by role
    #[arg(short, long)]
    pub role: Option<String>,
}

/// Arguments for `reset-password`.
#[derive(Debug, Args)]
pub struct ResetPasswordArgs {
    /// Email of the account
    pub email: String,
}

/// Arguments for `disable-mfa`.
#[derive(Debug, Args)]
pub struct DisableMfaArgs {
    /// Email of the account
    pub email: String,
}

/// User display row for table output.
#[derive(Debug, Serialize, Tabled)]
struct UserRow {
    /// User ID
    id: String,
    /// Email
    email: String,
    /// Role
    role: String,
    /// Active
    active: bool,
    /// MFA
    mfa: bool,
    /// Created at
    created_at: String,
}

/// `list-users`
pub async fn list(args: &ListUsersArgs, env: &str, format: OutputFormat) -> Result<(), AppError> {
    let config = super::load_config(env)?;
    let pool = super::create_db_pool(&config).await?;
    let repo = UserRepository::new(pool);

    let role = args.role.as_deref().map(str::parse).transpose()?;
    let users = repo.find_all(role).await?;

    let rows: Vec<UserRow> = users
        .iter()
        .map(|u| UserRow {
            id: u.id.to_string(),
            email: u.email.clone(),
            role: u.role.to_string(),
            active: u.is_active,
            mfa: u.mfa_enabled,
            created_at: u.created_at.format("%Y-%m-%d %H:%M").to_string(),
        })
        .collect();

    output::print_list(&rows, format);
    Ok(())
}

/// `reset-password <email>` — generates a temporary password and prints
/// it once.
pub async fn reset_password(args: &ResetPasswordArgs, env: &str) -> Result<(), AppError> {
    let config = super::load_config(env)?;
    let pool = super::create_db_pool(&config).await?;
    let repo = UserRepository::new(pool.clone());

    let user = repo
        .find_by_email(&args.email)
        .await?
        .ok_or_else(|| AppError::not_found(format!("User '{}' not found", args.email)))?;

    let temp_password: String = rand::rngs::OsRng
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    let hash = PasswordHasher::new().hash_password(&temp_password)?;
    repo.update_password(user.id, &hash).await?;

    super::cli_activity(&pool)
        .log(
            &ActorContext::default(),
            actions::USER_PASSWORD_RESET,
            "user",
            Some(user.id.into_uuid()),
            Some(user.email.clone()),
            serde_json::json!({"via": "cli"}),
        )
        .await;

    output::print_success(&format!("Password reset for '{}'", args.email));
    output::print_kv("Temporary password", &temp_password);
    Ok(())
}

/// `disable-mfa <email>`
pub async fn disable_mfa(args: &DisableMfaArgs, env: &str) -> Result<(), AppError> {
    let config = super::load_config(env)?;
    let pool = super::create_db_pool(&config).await?;
    let repo = UserRepository::new(pool.clone());

    let user = repo
        .find_by_email(&args.email)
        .await?
        .ok_or_else(|| AppError::not_found(format!("User '{}' not found", args.email)))?;

    if !user.mfa_enabled {
        output::print_success(&format!("MFA already disabled for '{}'", args.email));
        return Ok(());
    }

    repo.disable_mfa(user.id).await?;

    super::cli_activity(&pool)
        .log(
            &ActorContext::default(),
            actions::USER_MFA_DISABLED,
            "user",
            Some(user.id.into_uuid()),
            Some(user.email.clone()),
            serde_json::json!({"via": "cli"}),
        )
        .await;

    output::print_success(&format!("MFA disabled for '{}'", args.email));
    Ok(())
}
