//! Storage provider CLI commands.

use clap::Args;

use backhub_auth::seal::CredentialSeal;
use backhub_core::error::AppError;
use backhub_core::types::id::ProviderId;
use backhub_database::repositories::storage::StorageProviderRepository;
use backhub_entity::provider::{ProviderKind, StorageProvider};
use backhub_service::activity::{ActorContext, actions};

use crate::output;

/// Arguments for `add-storage-provider`.
#[derive(Debug, Args)]
pub struct AddProviderArgs {
    /// Provider name
    #[arg(long)]
    pub name: String,
    /// Provider kind
    #[arg(long, default_value = "s3")]
    pub kind: String,
    /// Endpoint URL (S3-compatible) or root path (local)
    #[arg(long, default_value = "")]
    pub endpoint: String,
    /// Region
    #[arg(long, default_value = "us-east-1")]
    pub region: String,
    /// Bucket name
    #[arg(long)]
    pub bucket: String,
    /// Access key (sealed before storage)
    #[arg(long)]
    pub access_key: String,
    /// Secret key (sealed before storage)
    #[arg(long)]
    pub secret_key: String,
    /// Capacity cap in bytes; 0 = unlimited
    #[arg(long, default_value_t = 0)]
    pub limit_bytes: i64,
    /// Make this the default provider
    #[arg(long)]
    pub default: bool,
}

/// `add-storage-provider`
pub async fn add_provider(args: &AddProviderArgs, env: &str) -> Result<(), AppError> {
    let config = super::load_config(env)?;
    let pool = super::create_db_pool(&config).await?;
    let repo = StorageProviderRepository::new(pool.clone());
    let seal = CredentialSeal::new(&config.auth);

    let kind = match args.kind.to_lowercase().as_str() {
        "s3" => ProviderKind::S3,
        "local" => ProviderKind::Local,
        other => {
            return Err(AppError::validation(format!(
                "Unknown provider kind '{other}'; expected s3 or local"
            )));
        }
    };

    let provider = StorageProvider {
        id: ProviderId::new(),
        name: args.name.clone(),
        kind,
        endpoint: args.endpoint.clone(),
        region: args.region.clone(),
        bucket: args.bucket.clone(),
        access_key_sealed: seal.seal(&args.access_key)?,
        secret_key_sealed: seal.seal(&args.secret_key)?,
        storage_limit_bytes: args.limit_bytes,
        storage_used_bytes: 0,
        is_default: args.default,
        is_active: true,
        created_at: chrono::Utc::now(),
    };
    let created = repo.create(&provider).await?;

    super::cli_activity(&pool)
        .log(
            &ActorContext::default(),
            actions::PROVIDER_ADD,
            "provider",
            Some(created.id.into_uuid()),
            Some(created.name.clone()),
            serde_json::json!({"via": "cli", "kind": created.kind, "bucket": created.bucket}),
        )
        .await;

    output::print_success(&format!("Storage provider '{}' registered", created.name));
    output::print_kv("Provider id", &created.id.to_string());
    if created.is_default {
        output::print_kv("Default", "yes");
    }
    Ok(())
}
