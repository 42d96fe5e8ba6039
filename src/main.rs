//! BackHub Master — WordPress Fleet Backup Control Plane
//!
//! Main entry point that wires all crates together and starts the server.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use backhub_core::config::AppConfig;
use backhub_core::error::AppError;

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // The appender guards must outlive the runtime for the file logs to
    // flush on shutdown.
    let _log_guards = init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

/// Load configuration from file and environment
fn load_configuration() -> Result<AppConfig, AppError> {
    let env = std::env::var("BACKHUB_ENV").unwrap_or_else(|_| "development".to_string());
    AppConfig::load(&env)
}

/// Initialize tracing: console plus, when a log directory is configured,
/// a line log, a JSON-lines log, and an error-only log.
fn init_logging(config: &AppConfig) -> Vec<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::Layer;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let console = if config.logging.format == "json" {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().pretty().with_target(true).boxed()
    };

    let mut guards = Vec::new();
    let registry = tracing_subscriber::registry().with(filter).with(console);

    if config.logging.directory.is_empty() {
        registry.init();
        return guards;
    }

    let dir = &config.logging.directory;
    let (line_writer, line_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "backhub.log"));
    let (json_writer, json_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "backhub.json.log"));
    let (error_writer, error_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "backhub.error.log"));
    guards.extend([line_guard, json_guard, error_guard]);

    registry
        .with(fmt::layer().with_ansi(false).with_writer(line_writer))
        .with(fmt::layer().json().with_writer(json_writer))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(error_writer)
                .with_filter(tracing_subscriber::filter::LevelFilter::ERROR),
        )
        .init();
    guards
}

/// Main server run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Connecting to database...");
    let db_pool = backhub_database::DatabasePool::connect(&config.database).await?;

    tracing::info!("Running database migrations...");
    backhub_database::migration::run_migrations(db_pool.pool()).await?;

    backhub_api::app::run_server(config, db_pool.into_pool()).await
}
