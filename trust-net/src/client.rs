//! HTTP client construction
//!
//! One client is built per pipeline and shared by every collector.

use reqwest::{redirect, Client};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Identifying user agent for trust collectors
pub const TRUSTBOT_USER_AGENT: &str = "TrustMesh TrustBot/3.0 (+https://github.com/copyleftdev/trustmesh)";

/// HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    /// Whole-request timeout in seconds
    pub timeout_secs: u64,
    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Maximum redirects followed
    pub max_redirects: usize,
    /// Use a browser user agent instead of the bot identifier
    pub browser_user_agent: bool,
    /// DNS query timeout in seconds
    pub dns_timeout_secs: u64,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 12,
            connect_timeout_secs: 5,
            max_redirects: 5,
            browser_user_agent: false,
            dns_timeout_secs: 5,
        }
    }
}

/// Errors from the networking layer
#[derive(Debug, Error)]
pub enum NetError {
    #[error("Failed to build client: {0}")]
    ClientBuild(String),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unexpected status {0}")]
    Status(u16),

    #[error("DNS lookup failed: {0}")]
    Dns(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Invalid name: {0}")]
    InvalidName(String),
}

/// User agents for rotation
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:137.0) Gecko/20100101 Firefox/137.0",
];

/// Get a random browser user agent
pub fn random_user_agent() -> &'static str {
    use rand::Rng;
    let idx = rand::thread_rng().gen_range(0..USER_AGENTS.len());
    USER_AGENTS[idx]
}

/// Create the shared collector HTTP client
pub fn create_client(config: &NetConfig) -> Result<Client, NetError> {
    let user_agent = if config.browser_user_agent {
        random_user_agent()
    } else {
        TRUSTBOT_USER_AGENT
    };

    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .redirect(redirect::Policy::limited(config.max_redirects))
        .user_agent(user_agent)
        .build()
        .map_err(|e| NetError::ClientBuild(e.to_string()))
}

/// HEAD a URL and report whether it answered 200 after redirects
pub async fn url_exists(client: &Client, url: &str) -> Result<bool, NetError> {
    let response = client.head(url).send().await?;
    Ok(response.status().as_u16() == 200)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NetConfig::default();
        assert_eq!(config.timeout_secs, 12);
        assert!(!config.browser_user_agent);
    }

    #[test]
    fn test_random_user_agent() {
        let ua = random_user_agent();
        assert!(ua.contains("Mozilla"));
    }

    #[test]
    fn test_create_client() {
        assert!(create_client(&NetConfig::default()).is_ok());
        let browser = NetConfig {
            browser_user_agent: true,
            ..Default::default()
        };
        assert!(create_client(&browser).is_ok());
    }
}
