//! Quota management CLI commands.

use std::sync::Arc;

use clap::{Args, ValueEnum};

use backhub_core::error::AppError;
use backhub_core::types::id::{NodeId, SiteId};
use backhub_database::repositories::accounting::AccountingRepository;
use backhub_database::repositories::backup::BackupRepository;
use backhub_database::repositories::node::NodeRepository;
use backhub_database::repositories::setting::SettingRepository;
use backhub_database::repositories::site::SiteRepository;
use backhub_database::repositories::storage::StorageProviderRepository;
use backhub_service::activity::{ActorContext, actions};
use backhub_service::quota::QuotaService;
use backhub_service::retention::RetentionService;
use backhub_service::settings::SettingsService;
use backhub_service::storage_access::StorageAccess;

use crate::output;

/// The entity kind a quota applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum QuotaTarget {
    /// A node's fleet-wide cap.
    Node,
    /// One site's cap.
    Site,
}

/// Arguments for `set-quota`.
#[derive(Debug, Args)]
pub struct SetQuotaArgs {
    /// What the quota applies to
    #[arg(value_enum)]
    pub target: QuotaTarget,
    /// Node or site id
    pub id: String,
    /// New quota in bytes
    pub bytes: i64,
}

/// `set-quota (node|site) <id> <bytes>`
pub async fn set_quota(args: &SetQuotaArgs, env: &str) -> Result<(), AppError> {
    if args.bytes <= 0 {
        return Err(AppError::validation("Quota must be positive"));
    }

    let config = super::load_config(env)?;
    let pool = super::create_db_pool(&config).await?;
    let node_repo = Arc::new(NodeRepository::new(pool.clone()));
    let site_repo = Arc::new(SiteRepository::new(pool.clone()));

    match args.target {
        QuotaTarget::Node => {
            let node_id: NodeId = args
                .id
                .parse()
                .map_err(|_| AppError::validation("Invalid node id"))?;
            let node = node_repo
                .find_by_id(node_id)
                .await?
                .ok_or_else(|| AppError::not_found("Node not found"))?;

            let sites_total = site_repo.sum_quota_on_node(node_id, None).await?;
            if args.bytes < sites_total {
                return Err(AppError::validation(format!(
                    "Node quota cannot drop below the {sites_total} bytes already granted to its sites"
                )));
            }
            node_repo.update_quota(node_id, args.bytes).await?;

            super::cli_activity(&pool)
                .log(
                    &ActorContext::default(),
                    actions::NODE_QUOTA_UPDATE,
                    "node",
                    Some(node_id.into_uuid()),
                    Some(node.hostname.clone()),
                    serde_json::json!({"via": "cli", "new_quota": args.bytes}),
                )
                .await;
            output::print_success(&format!(
                "Node '{}' quota set to {} bytes",
                node.hostname, args.bytes
            ));
        }
        QuotaTarget::Site => {
            let site_id: SiteId = args
                .id
                .parse()
                .map_err(|_| AppError::validation("Invalid site id"))?;

            // The full quota service enforces the node-remainder bound.
            let quota = build_quota_service(&config, &pool, &node_repo, &site_repo);
            quota.update_site_quota(site_id, args.bytes).await?;

            let site = site_repo
                .find_by_id(site_id)
                .await?
                .ok_or_else(|| AppError::not_found("Site not found"))?;

            super::cli_activity(&pool)
                .log(
                    &ActorContext::default(),
                    actions::SITE_QUOTA_UPDATE,
                    "site",
                    Some(site_id.into_uuid()),
                    Some(site.name.clone()),
                    serde_json::json!({"via": "cli", "new_quota": args.bytes}),
                )
                .await;
            output::print_success(&format!(
                "Site '{}' quota set to {} bytes",
                site.name, args.bytes
            ));
        }
    }

    Ok(())
}

/// Assemble the quota service with its full dependency chain.
fn build_quota_service(
    config: &backhub_core::config::AppConfig,
    pool: &sqlx::PgPool,
    node_repo: &Arc<NodeRepository>,
    site_repo: &Arc<SiteRepository>,
) -> QuotaService {
    let backup_repo = Arc::new(BackupRepository::new(pool.clone()));
    let provider_repo = Arc::new(StorageProviderRepository::new(pool.clone()));
    let accounting = Arc::new(AccountingRepository::new(pool.clone()));
    let settings = Arc::new(SettingsService::new(
        Arc::new(SettingRepository::new(pool.clone())),
        config.quota.clone(),
    ));
    let seal = Arc::new(backhub_auth::seal::CredentialSeal::new(&config.auth));
    let storage = Arc::new(StorageAccess::new(seal, Arc::clone(&provider_repo)));
    let retention = Arc::new(RetentionService::new(
        Arc::clone(&backup_repo),
        Arc::clone(site_repo),
        provider_repo,
        Arc::clone(&accounting),
        settings,
        storage,
    ));
    QuotaService::new(
        Arc::clone(site_repo),
        Arc::clone(node_repo),
        backup_repo,
        accounting,
        retention,
        config.quota.clone(),
    )
}
