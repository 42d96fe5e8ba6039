//! Shared test helpers for integration tests.

use axum::Router;
use axum::body::Body;
use http::{Request, StatusCode};
use serde_json::Value;
use sqlx::PgPool;
use tower::ServiceExt;
use uuid::Uuid;

use backhub_api::state::AppState;
use backhub_auth::jwt::TokenScope;
use backhub_core::config::{
    AppConfig, AuthConfig, DatabaseConfig, LoggingConfig, QuotaConfig, ServerConfig, WorkerConfig,
};
use backhub_core::types::id::{NodeId, ProviderId, SiteId, UserId};
use backhub_entity::user::UserRole;

/// Test application context
pub struct TestApp {
    /// The Axum router for making test requests
    pub router: Router,
    /// Database pool for direct queries
    pub db_pool: PgPool,
    /// The full application state for direct service access
    pub state: AppState,
}

impl TestApp {
    /// Create a test application, or `None` when no test database is
    /// configured.
    pub async fn new() -> Option<Self> {
        let url = std::env::var("BACKHUB_TEST_DATABASE_URL").ok()?;
        let config = test_config(&url);

        let db_pool = backhub_database::DatabasePool::connect(&config.database)
            .await
            .expect("Failed to connect to test database")
            .into_pool();

        backhub_database::migration::run_migrations(&db_pool)
            .await
            .expect("Failed to run migrations");

        Self::clean_database(&db_pool).await;

        let state = AppState::build(config, db_pool.clone());
        let router = backhub_api::router::build_router(state.clone());

        Some(Self {
            router,
            db_pool,
            state,
        })
    }

    /// Clean all test data from the database
    async fn clean_database(pool: &PgPool) {
        let tables = [
            "activity_log",
            "settings",
            "backup_status",
            "backups",
            "user_sites",
            "user_nodes",
            "sites",
            "nodes",
            "storage_providers",
            "users",
        ];
        for table in &tables {
            let query = format!("DELETE FROM {}", table);
            let _ = sqlx::query(&query).execute(pool).await;
        }
    }

    /// Create a user and return a full-scope bearer token for them.
    pub async fn login_as(&self, email: &str, role: UserRole) -> String {
        let hash = self
            .state
            .password_hasher
            .hash_password("Testpass1!")
            .expect("hash");
        let id = UserId::new();
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, role, is_active) \
             VALUES ($1, $2, $3, $4, TRUE)",
        )
        .bind(id)
        .bind(email)
        .bind(&hash)
        .bind(role)
        .execute(&self.db_pool)
        .await
        .expect("Failed to create test user");

        self.state
            .tokens
            .issue(id, role, TokenScope::Full)
            .expect("token")
    }

    /// Insert an active node and return (id, plaintext API key).
    pub async fn create_active_node(&self, hostname: &str, quota_bytes: i64) -> (NodeId, String) {
        let key = backhub_auth::apikey::generate_api_key();
        let id = NodeId::new();
        sqlx::query(
            "INSERT INTO nodes (id, hostname, address, status, api_key_hash, storage_quota_bytes) \
             VALUES ($1, $2, '127.0.0.1:1', 'active', $3, $4)",
        )
        .bind(id)
        .bind(hostname)
        .bind(&key.hash)
        .bind(quota_bytes)
        .execute(&self.db_pool)
        .await
        .expect("Failed to create node");
        (id, key.plaintext)
    }

    /// Insert a site on a node.
    pub async fn create_site(&self, node_id: NodeId, name: &str, quota_bytes: i64) -> SiteId {
        let id = SiteId::new();
        sqlx::query(
            "INSERT INTO sites \
             (id, node_id, name, wp_config_path, wp_content_path, storage_quota_bytes) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(id)
        .bind(node_id)
        .bind(name)
        .bind(format!("/var/www/{name}/wp-config.php"))
        .bind(format!("/var/www/{name}/wp-content"))
        .bind(quota_bytes)
        .execute(&self.db_pool)
        .await
        .expect("Failed to create site");
        id
    }

    /// Insert a local-filesystem default provider rooted at `root`.
    pub async fn create_local_provider(&self, root: &str) -> ProviderId {
        let id = ProviderId::new();
        let access = self.state.seal.seal("test-access").expect("seal");
        let secret = self.state.seal.seal("test-secret").expect("seal");
        sqlx::query(
            "INSERT INTO storage_providers \
             (id, name, kind, endpoint, region, bucket, access_key_sealed, secret_key_sealed, \
              is_default, is_active) \
             VALUES ($1, 'test-local', 'local', $2, '', 'backups', $3, $4, TRUE, TRUE)",
        )
        .bind(id)
        .bind(root)
        .bind(access)
        .bind(secret)
        .execute(&self.db_pool)
        .await
        .expect("Failed to create provider");
        id
    }

    /// Set a site's used bytes directly.
    pub async fn set_site_usage(&self, site_id: SiteId, used: i64) {
        sqlx::query("UPDATE sites SET storage_used_bytes = $2 WHERE id = $1")
            .bind(site_id)
            .bind(used)
            .execute(&self.db_pool)
            .await
            .expect("Failed to set site usage");
    }

    /// Set a node's used bytes directly.
    pub async fn set_node_usage(&self, node_id: NodeId, used: i64) {
        sqlx::query("UPDATE nodes SET storage_used_bytes = $2 WHERE id = $1")
            .bind(node_id)
            .bind(used)
            .execute(&self.db_pool)
            .await
            .expect("Failed to set node usage");
    }

    /// Make an HTTP request to the test app
    pub async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> TestResponse {
        self.request_with_headers(method, path, body, token, &[]).await
    }

    /// Make a request with a node API key.
    pub async fn node_request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
        api_key: &str,
    ) -> TestResponse {
        self.request_with_headers(method, path, body, None, &[("x-api-key", api_key)])
            .await
    }

    async fn request_with_headers(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
        token: Option<&str>,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let body_str = body
            .map(|b| serde_json::to_string(&b).expect("Failed to serialize body"))
            .unwrap_or_default();

        let mut req = Request::builder()
            .method(method)
            .uri(path)
            .header("Content-Type", "application/json");

        if let Some(token) = token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }
        for (name, value) in headers {
            req = req.header(*name, *value);
        }

        let req = req
            .body(Body::from(body_str))
            .expect("Failed to build request");

        let response = self
            .router
            .clone()
            .oneshot(req)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("Failed to read body");

        let body: Value = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);

        TestResponse { status, body }
    }
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    /// HTTP status code
    pub status: StatusCode,
    /// Parsed JSON body
    pub body: Value,
}

impl TestResponse {
    /// Extract a UUID field from the body.
    pub fn uuid(&self, field: &str) -> Uuid {
        self.body
            .get(field)
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(|| panic!("No UUID field '{field}' in {:?}", self.body))
    }
}

/// Build a self-contained test configuration.
fn test_config(database_url: &str) -> AppConfig {
    AppConfig {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            shutdown_grace_seconds: 1,
            public_url: String::new(),
        },
        database: DatabaseConfig {
            url: database_url.to_string(),
            max_connections: 4,
            min_connections: 1,
            connect_timeout_seconds: 5,
            idle_timeout_seconds: 60,
        },
        auth: AuthConfig {
            secret_key: "integration-test-secret".to_string(),
            previous_secret_keys: vec![],
            access_token_minutes: 60,
            mfa_token_minutes: 5,
            mfa_issuer: "BackHub".to_string(),
        },
        quota: QuotaConfig::default(),
        worker: WorkerConfig::default(),
        logging: LoggingConfig::default(),
    }
}
