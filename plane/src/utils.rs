//! Utility functions

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Version information for the control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Backoff options for retried operations (registry conflicts, remote retries)
#[derive(Debug, Clone)]
pub struct CooldownOptions {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for CooldownOptions {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

/// Calculate exponential backoff delay
pub fn calc_exp_backoff(options: &CooldownOptions, attempt: u32) -> Duration {
    let delay_secs = options.base_delay.as_secs_f64() * options.multiplier.powi(attempt as i32);
    let capped_delay = delay_secs.min(options.max_delay.as_secs_f64());
    Duration::from_secs_f64(capped_delay)
}

/// Generate a random UUID v4
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Hex-encoded SHA-256 of `data`
pub fn sha256_hash(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Validate a project or environment name.
///
/// Names end up in container names, file paths and route hostnames, so only
/// lowercase ASCII letters, digits and inner dashes are accepted.
pub fn validate_name(field: &str, value: &str) -> Result<(), String> {
    if value.is_empty() || value.len() > 63 {
        return Err(format!("{} must be 1-63 characters", field));
    }
    let valid_chars = value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid_chars || value.starts_with('-') || value.ends_with('-') {
        return Err(format!(
            "{} may only contain lowercase letters, digits and inner dashes: {:?}",
            field, value
        ));
    }
    Ok(())
}

/// Validate an image reference such as `ghcr.io/acme/app:v1.2.3`
pub fn validate_image(value: &str) -> Result<(), String> {
    if value.is_empty() || value.len() > 255 {
        return Err("image must be 1-255 characters".to_string());
    }
    let valid_chars = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '/' | ':' | '@'));
    if !valid_chars || value.starts_with('-') {
        return Err(format!("invalid image reference: {:?}", value));
    }
    Ok(())
}
