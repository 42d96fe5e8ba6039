//! Enrollment bootstrap.
//!
//! On first start the daemon has no API key: it generates a 5-character
//! registration code, submits a join request, prints the code for the
//! operator, and polls until an admin approves it. The key is the only
//! durable node secret; it lands in the key file with owner-only
//! permissions.

use std::path::Path;
use std::time::Duration;

use tokio::fs;
use tracing::{info, warn};

use backhub_core::error::AppError;
use backhub_core::result::AppResult;
use backhub_entity::node::JoinRequest;

use crate::client::MasterClient;

/// Seconds between status polls.
const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Generate a registration code using the shared base-32 alphabet.
///
/// Mirrors the master's generator so codes look identical on both ends.
/// Crockford-style: no I, L, O or U.
fn generate_code() -> String {
    use rand::Rng;
    const ALPHABET: &[u8] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
    let mut rng = rand::rngs::OsRng;
    (0..5)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Load the stored API key, if the daemon is already enrolled.
pub async fn load_api_key(path: &str) -> Option<String> {
    match fs::read_to_string(path).await {
        Ok(key) => {
            let key = key.trim().to_string();
            (!key.is_empty()).then_some(key)
        }
        Err(_) => None,
    }
}

/// Store the API key with owner-only permissions.
async fn store_api_key(path: &str, key: &str) -> AppResult<()> {
    if let Some(parent) = Path::new(path).parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, key).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(())
}

/// Run the enrollment flow until the node is approved.
///
/// Returns the plaintext API key.
pub async fn enroll(client: &MasterClient, hostname: &str, control_bind: &str, key_file: &str) -> AppResult<String> {
    let code = generate_code();
    let request = JoinRequest {
        hostname: hostname.to_string(),
        address: control_bind.to_string(),
        code: code.clone(),
    };

    let response = client.join_request(&request).await?;
    info!(request_id = %response.get("request_id").cloned().unwrap_or_default(), "Join request submitted");

    // A re-join of a still-pending hostname keeps its original code;
    // poll with whatever the master recorded.
    let code = response
        .get("code")
        .and_then(|c| c.as_str())
        .map(String::from)
        .unwrap_or(code);

    // The operator reads this code into the approval dialog.
    println!("==============================================");
    println!("  BackHub node registration code: {code}");
    println!("  Approve this node on the master to continue.");
    println!("==============================================");

    loop {
        tokio::time::sleep(POLL_INTERVAL).await;

        let poll = match client.poll_status(&code).await {
            Ok(poll) => poll,
            Err(e) => {
                warn!(error = %e, "Status poll failed; retrying");
                continue;
            }
        };

        match poll.status.as_str() {
            "active" => {
                let key = poll.api_key.ok_or_else(|| {
                    AppError::config(
                        "Node is active but the key was already consumed; re-enroll the node",
                    )
                })?;
                store_api_key(key_file, &key).await?;
                info!("Enrollment complete; API key stored");
                return Ok(key);
            }
            "blocked" => {
                return Err(AppError::authorization("This node has been blocked"));
            }
            other => {
                info!(status = other, "Waiting for approval");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_shape() {
        let code = generate_code();
        assert_eq!(code.len(), 5);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
