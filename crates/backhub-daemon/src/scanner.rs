//! WordPress site discovery.
//!
//! Walks the configured web root one level deep looking for
//! `wp-config.php`, and parses the database constants out of it.

use std::path::Path;

use regex::Regex;
use tokio::fs;
use tracing::{debug, info};

use backhub_core::result::AppResult;
use backhub_entity::site::DiscoveredSite;

/// Database credentials parsed from a wp-config.php.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WpConfig {
    /// DB_NAME.
    pub db_name: Option<String>,
    /// DB_USER.
    pub db_user: Option<String>,
    /// DB_PASSWORD.
    pub db_password: Option<String>,
    /// DB_HOST.
    pub db_host: Option<String>,
}

/// Extract a `define('KEY', 'value')` constant.
fn parse_define(contents: &str, key: &str) -> Option<String> {
    // Tolerates both quote styles and loose spacing.
    let pattern = format!(
        r#"define\s*\(\s*['"]{key}['"]\s*,\s*['"]([^'"]*)['"]\s*\)"#
    );
    Regex::new(&pattern)
        .ok()?
        .captures(contents)?
        .get(1)
        .map(|m| m.as_str().to_string())
}

/// Parse the database constants out of a wp-config.php body.
pub fn parse_wp_config(contents: &str) -> WpConfig {
    WpConfig {
        db_name: parse_define(contents, "DB_NAME"),
        db_user: parse_define(contents, "DB_USER"),
        db_password: parse_define(contents, "DB_PASSWORD"),
        db_host: parse_define(contents, "DB_HOST"),
    }
}

/// Read and parse a wp-config.php file.
pub async fn read_wp_config(path: &Path) -> AppResult<WpConfig> {
    let contents = fs::read_to_string(path).await?;
    Ok(parse_wp_config(&contents))
}

/// Scan the web root for WordPress installations.
///
/// Each immediate subdirectory holding a `wp-config.php` and a
/// `wp-content` directory is reported as a site.
pub async fn scan_web_root(web_root: &str) -> AppResult<Vec<DiscoveredSite>> {
    let mut discovered = Vec::new();
    let root = Path::new(web_root);
    if !root.is_dir() {
        info!(web_root, "Web root does not exist; nothing to scan");
        return Ok(discovered);
    }

    let mut entries = fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }

        let wp_config = dir.join("wp-config.php");
        let wp_content = dir.join("wp-content");
        if !wp_config.is_file() || !wp_content.is_dir() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().to_string();
        let parsed = read_wp_config(&wp_config).await.unwrap_or_default();
        debug!(site = %name, "Discovered WordPress installation");

        discovered.push(DiscoveredSite {
            name,
            wp_config_path: wp_config.display().to_string(),
            wp_content_path: wp_content.display().to_string(),
            db_name: parsed.db_name,
        });
    }

    info!(web_root, count = discovered.len(), "Site scan finished");
    Ok(discovered)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
<?php
define( 'DB_NAME', 'wp_shop' );
define( 'DB_USER', 'shop_user' );
define( 'DB_PASSWORD', 'p4ss!word' );
define( 'DB_HOST', 'localhost' );
define( 'DB_CHARSET', 'utf8mb4' );
$table_prefix = 'wp_';
"#;

    #[test]
    fn parses_standard_config() {
        let config = parse_wp_config(SAMPLE);
        assert_eq!(config.db_name.as_deref(), Some("wp_shop"));
        assert_eq!(config.db_user.as_deref(), Some("shop_user"));
        assert_eq!(config.db_password.as_deref(), Some("p4ss!word"));
        assert_eq!(config.db_host.as_deref(), Some("localhost"));
    }

    #[test]
    fn parses_double_quotes_and_tight_spacing() {
        let config = parse_wp_config(r#"define("DB_NAME","tight");"#);
        assert_eq!(config.db_name.as_deref(), Some("tight"));
    }

    #[test]
    fn missing_constants_are_none() {
        let config = parse_wp_config("<?php // empty");
        assert_eq!(config, WpConfig::default());
    }

    #[tokio::test]
    async fn scans_only_wordpress_directories() {
        let root = tempfile::tempdir().unwrap();

        // A real site.
        let site = root.path().join("blog");
        tokio::fs::create_dir_all(site.join("wp-content")).await.unwrap();
        tokio::fs::write(site.join("wp-config.php"), SAMPLE).await.unwrap();

        // A directory without wp-config.
        tokio::fs::create_dir_all(root.path().join("static-site"))
            .await
            .unwrap();

        let found = scan_web_root(root.path().to_str().unwrap()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "blog");
        assert_eq!(found[0].db_name.as_deref(), Some("wp_shop"));
    }
}
