//! CLI command definitions and dispatch.

pub mod node;
pub mod quota;
pub mod serve;
pub mod storage;
pub mod user;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use backhub_core::config::AppConfig;
use backhub_core::error::AppError;
use backhub_database::repositories::activity::ActivityRepository;
use backhub_service::activity::ActivityLogger;

use crate::output::OutputFormat;

/// BackHub — WordPress Fleet Backup Platform
#[derive(Debug, Parser)]
#[command(name = "backhub", version, about, long_about = None)]
pub struct Cli {
    /// Environment name for configuration overlay
    #[arg(short, long, default_value = "development")]
    pub env: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the master server
    Serve,
    /// Run pending database migrations
    Migrate,
    /// List all users
    ListUsers(user::ListUsersArgs),
    /// Reset a user's password
    ResetPassword(user::ResetPasswordArgs),
    /// Disable MFA for a user
    DisableMfa(user::DisableMfaArgs),
    /// Approve a pending node
    ApproveNode(node::ApproveNodeArgs),
    /// Register a storage provider
    AddStorageProvider(storage::AddProviderArgs),
    /// Set a node or site storage quota
    SetQuota(quota::SetQuotaArgs),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self) -> Result<(), AppError> {
        match &self.command {
            Commands::Serve => serve::execute(&self.env).await,
            Commands::Migrate => serve::migrate(&self.env).await,
            Commands::ListUsers(args) => user::list(args, &self.env, self.format).await,
            Commands::ResetPassword(args) => user::reset_password(args, &self.env).await,
            Commands::DisableMfa(args) => user::disable_mfa(args, &self.env).await,
            Commands::ApproveNode(args) => node::approve(args, &self.env).await,
            Commands::AddStorageProvider(args) => storage::add_provider(args, &self.env).await,
            Commands::SetQuota(args) => quota::set_quota(args, &self.env).await,
        }
    }
}

/// Helper: load configuration.
pub fn load_config(env: &str) -> Result<AppConfig, AppError> {
    AppConfig::load(env)
}

/// Helper: create a database pool from config.
pub async fn create_db_pool(config: &AppConfig) -> Result<sqlx::PgPool, AppError> {
    let pool = backhub_database::DatabasePool::connect(&config.database).await?;
    Ok(pool.into_pool())
}

/// Helper: activity logger for CLI mutations.
pub fn cli_activity(pool: &sqlx::PgPool) -> ActivityLogger {
    ActivityLogger::new(Arc::new(ActivityRepository::new(pool.clone())))
}
