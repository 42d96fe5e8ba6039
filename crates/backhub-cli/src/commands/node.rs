//! Node management CLI commands.

use std::sync::Arc;

use clap::Args;

use backhub_core::error::AppError;
use backhub_core::types::id::NodeId;
use backhub_database::repositories::node::NodeRepository;
use backhub_service::activity::{ActorContext, actions};
use backhub_service::enrollment::EnrollmentService;

use crate::output;

/// Arguments for `approve-node`.
#[derive(Debug, Args)]
pub struct ApproveNodeArgs {
    /// Node id or its 5-character registration code
    pub node: String,
}

/// `approve-node <id|code>`
pub async fn approve(args: &ApproveNodeArgs, env: &str) -> Result<(), AppError> {
    let config = super::load_config(env)?;
    let pool = super::create_db_pool(&config).await?;
    let enrollment = EnrollmentService::new(Arc::new(NodeRepository::new(pool.clone())));

    let node = match args.node.parse::<NodeId>() {
        Ok(node_id) => enrollment.approve(node_id, None).await?,
        Err(_) => enrollment.register_by_code(&args.node, None).await?,
    };

    super::cli_activity(&pool)
        .log(
            &ActorContext::default(),
            actions::NODE_APPROVE,
            "node",
            Some(node.id.into_uuid()),
            Some(node.hostname.clone()),
            serde_json::json!({"via": "cli"}),
        )
        .await;

    output::print_success(&format!("Node '{}' approved", node.hostname));
    output::print_kv("Node id", &node.id.to_string());
    output::print_kv(
        "Key delivery",
        "the daemon receives its API key on its next status poll",
    );
    Ok(())
}
