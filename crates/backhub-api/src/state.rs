//! Application state shared across all handlers.

use std::sync::Arc;

use sqlx::PgPool;

use backhub_auth::jwt::TokenCodec;
use backhub_auth::password::PasswordHasher;
use backhub_auth::rbac::RbacEnforcer;
use backhub_auth::seal::CredentialSeal;
use backhub_core::config::AppConfig;
use backhub_progress::ProgressStore;

use backhub_database::repositories::accounting::AccountingRepository;
use backhub_database::repositories::activity::ActivityRepository;
use backhub_database::repositories::assignment::AssignmentRepository;
use backhub_database::repositories::backup::BackupRepository;
use backhub_database::repositories::node::NodeRepository;
use backhub_database::repositories::progress::ProgressRepository;
use backhub_database::repositories::setting::SettingRepository;
use backhub_database::repositories::site::SiteRepository;
use backhub_database::repositories::storage::StorageProviderRepository;
use backhub_database::repositories::user::UserRepository;

use backhub_service::activity::ActivityLogger;
use backhub_service::enrollment::EnrollmentService;
use backhub_service::quota::QuotaService;
use backhub_service::reconcile::ReconciliationService;
use backhub_service::retention::RetentionService;
use backhub_service::settings::SettingsService;
use backhub_service::storage_access::StorageAccess;

use crate::metrics::Metrics;
use crate::node_client::NodeControlClient;

/// Application state containing all shared dependencies.
///
/// Passed to every Axum handler via `State<AppState>`.
/// All fields are `Arc`-wrapped for cheap cloning across tasks.
#[derive(Debug, Clone)]
pub struct AppState {
    // ── Configuration ────────────────────────────────────────
    /// Application configuration
    pub config: Arc<AppConfig>,

    // ── Infrastructure ───────────────────────────────────────
    /// PostgreSQL connection pool
    pub db_pool: PgPool,
    /// Live progress rows + SSE fan-out
    pub progress: Arc<ProgressStore>,
    /// Forwards start/stop/sweep to node control listeners
    pub node_client: Arc<NodeControlClient>,
    /// Process metrics counters
    pub metrics: Arc<Metrics>,

    // ── Auth ─────────────────────────────────────────────────
    /// JWT codec
    pub tokens: Arc<TokenCodec>,
    /// Password hasher (Argon2id)
    pub password_hasher: Arc<PasswordHasher>,
    /// Credential seal
    pub seal: Arc<CredentialSeal>,
    /// Role gate
    pub rbac: Arc<RbacEnforcer>,

    // ── Repositories ─────────────────────────────────────────
    /// User repository
    pub user_repo: Arc<UserRepository>,
    /// Node repository
    pub node_repo: Arc<NodeRepository>,
    /// Site repository
    pub site_repo: Arc<SiteRepository>,
    /// Backup repository
    pub backup_repo: Arc<BackupRepository>,
    /// Storage provider repository
    pub provider_repo: Arc<StorageProviderRepository>,
    /// Activity log repository
    pub activity_repo: Arc<ActivityRepository>,
    /// RBAC assignment repository
    pub assignment_repo: Arc<AssignmentRepository>,
    /// Progress row repository
    pub progress_repo: Arc<ProgressRepository>,
    /// Settings repository
    pub setting_repo: Arc<SettingRepository>,
    /// Accounting repository
    pub accounting_repo: Arc<AccountingRepository>,

    // ── Services ─────────────────────────────────────────────
    /// Quota engine
    pub quota: Arc<QuotaService>,
    /// Retention + deletion sweep
    pub retention: Arc<RetentionService>,
    /// Drift reconciliation
    pub reconcile: Arc<ReconciliationService>,
    /// Enrollment state machine
    pub enrollment: Arc<EnrollmentService>,
    /// Activity logger
    pub activity: Arc<ActivityLogger>,
    /// Tiered settings
    pub settings: Arc<SettingsService>,
    /// Sealed-credential store opener
    pub storage_access: Arc<StorageAccess>,
}

impl AppState {
    /// Wire the full state graph from a configuration and a pool.
    pub fn build(config: AppConfig, db_pool: PgPool) -> Self {
        let user_repo = Arc::new(UserRepository::new(db_pool.clone()));
        let node_repo = Arc::new(NodeRepository::new(db_pool.clone()));
        let site_repo = Arc::new(SiteRepository::new(db_pool.clone()));
        let backup_repo = Arc::new(BackupRepository::new(db_pool.clone()));
        let provider_repo = Arc::new(StorageProviderRepository::new(db_pool.clone()));
        let activity_repo = Arc::new(ActivityRepository::new(db_pool.clone()));
        let assignment_repo = Arc::new(AssignmentRepository::new(db_pool.clone()));
        let progress_repo = Arc::new(ProgressRepository::new(db_pool.clone()));
        let setting_repo = Arc::new(SettingRepository::new(db_pool.clone()));
        let accounting_repo = Arc::new(AccountingRepository::new(db_pool.clone()));

        let tokens = Arc::new(TokenCodec::new(&config.auth));
        let password_hasher = Arc::new(PasswordHasher::new());
        let seal = Arc::new(CredentialSeal::new(&config.auth));
        let rbac = Arc::new(RbacEnforcer::new());

        let settings = Arc::new(SettingsService::new(
            Arc::clone(&setting_repo),
            config.quota.clone(),
        ));
        let storage_access = Arc::new(StorageAccess::new(
            Arc::clone(&seal),
            Arc::clone(&provider_repo),
        ));
        let retention = Arc::new(RetentionService::new(
            Arc::clone(&backup_repo),
            Arc::clone(&site_repo),
            Arc::clone(&provider_repo),
            Arc::clone(&accounting_repo),
            Arc::clone(&settings),
            Arc::clone(&storage_access),
        ));
        let quota = Arc::new(QuotaService::new(
            Arc::clone(&site_repo),
            Arc::clone(&node_repo),
            Arc::clone(&backup_repo),
            Arc::clone(&accounting_repo),
            Arc::clone(&retention),
            config.quota.clone(),
        ));
        let reconcile = Arc::new(ReconciliationService::new(
            Arc::clone(&node_repo),
            Arc::clone(&site_repo),
            Arc::clone(&backup_repo),
            Arc::clone(&provider_repo),
            Arc::clone(&accounting_repo),
            Arc::clone(&settings),
            Arc::clone(&storage_access),
        ));
        let enrollment = Arc::new(EnrollmentService::new(Arc::clone(&node_repo)));
        let activity = Arc::new(ActivityLogger::new(Arc::clone(&activity_repo)));

        let progress = Arc::new(ProgressStore::new(Arc::clone(&progress_repo)));

        Self {
            config: Arc::new(config),
            db_pool,
            progress,
            node_client: Arc::new(NodeControlClient::new()),
            metrics: Arc::new(Metrics::default()),
            tokens,
            password_hasher,
            seal,
            rbac,
            user_repo,
            node_repo,
            site_repo,
            backup_repo,
            provider_repo,
            activity_repo,
            assignment_repo,
            progress_repo,
            setting_repo,
            accounting_repo,
            quota,
            retention,
            reconcile,
            enrollment,
            activity,
            settings,
            storage_access,
        }
    }
}
