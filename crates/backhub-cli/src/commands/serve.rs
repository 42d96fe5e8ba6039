//! `serve` and `migrate` commands.

use backhub_core::error::AppError;

use super::{create_db_pool, load_config};

/// Start the master server in the foreground.
pub async fn execute(env: &str) -> Result<(), AppError> {
    let config = load_config(env)?;
    let pool = create_db_pool(&config).await?;
    backhub_database::migration::run_migrations(&pool).await?;
    backhub_api::app::run_server(config, pool).await
}

/// Run pending migrations and exit.
pub async fn migrate(env: &str) -> Result<(), AppError> {
    let config = load_config(env)?;
    let pool = create_db_pool(&config).await?;
    backhub_database::migration::run_migrations(&pool).await?;
    crate::output::print_success("Migrations applied");
    Ok(())
}
