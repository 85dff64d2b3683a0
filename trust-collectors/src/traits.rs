//! Common collector interface and configuration

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use trust_core::{Source, SourceSignals, TargetIdentity};
use trust_net::NetError;

/// Errors from collector operations
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unexpected status {0}")]
    Status(u16),

    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("Target has no domain")]
    MissingDomain,

    #[error("No data: {0}")]
    NoData(String),
}

impl From<NetError> for CollectorError {
    fn from(e: NetError) -> Self {
        match e {
            NetError::Status(code) => Self::Status(code),
            other => Self::Network(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for CollectorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Parse(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

/// One independent evidence source
#[async_trait]
pub trait Collector: Send + Sync {
    /// Sensor identifier, also the breaker and ledger key
    fn sensor_id(&self) -> &str;

    /// Whether this source can say anything about the target
    ///
    /// Built-in sources follow [`Source::requires_domain`]; unknown sensors
    /// need a domain.
    fn applies_to(&self, target: &TargetIdentity) -> bool {
        let needs_domain = Source::from_sensor_id(self.sensor_id()).map_or(true, |s| s.requires_domain());
        !needs_domain || target.domain.is_some()
    }

    /// Query the source. Failures stay local to this collector.
    async fn collect(&self, target: &TargetIdentity) -> Result<SourceSignals, CollectorError>;
}

/// Domain of a target or a `MissingDomain` error
pub(crate) fn require_domain(target: &TargetIdentity) -> Result<&str, CollectorError> {
    target.domain.as_deref().ok_or(CollectorError::MissingDomain)
}

/// URL templates for the sites a collector visits
///
/// Placeholders: `{domain}`, `{label}` (first domain label), `{slug}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub crtsh: String,
    pub virustotal: String,
    pub safe_browsing: String,
    pub urlhaus: String,
    pub rdap: String,
    pub wikipedia: String,
    pub wikidata: String,
    pub crunchbase: String,
    pub site: String,
    pub status_pages: Vec<String>,
    pub social: SocialProfiles,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            crtsh: "https://crt.sh".to_string(),
            virustotal: "https://www.virustotal.com".to_string(),
            safe_browsing: "https://safebrowsing.googleapis.com".to_string(),
            urlhaus: "https://urlhaus-api.abuse.ch".to_string(),
            rdap: "https://rdap.org".to_string(),
            wikipedia: "https://en.wikipedia.org".to_string(),
            wikidata: "https://www.wikidata.org".to_string(),
            crunchbase: "https://www.crunchbase.com".to_string(),
            site: "https://{domain}".to_string(),
            status_pages: vec![
                "https://status.{domain}".to_string(),
                "https://{label}.statuspage.io".to_string(),
            ],
            social: SocialProfiles::default(),
        }
    }
}

/// Profile URL template per social network
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SocialProfiles {
    pub twitter: String,
    pub linkedin: String,
    pub github: String,
    pub facebook: String,
    pub youtube: String,
    pub instagram: String,
}

impl Default for SocialProfiles {
    fn default() -> Self {
        Self {
            twitter: "https://x.com/{slug}".to_string(),
            linkedin: "https://www.linkedin.com/company/{slug}".to_string(),
            github: "https://github.com/{slug}".to_string(),
            facebook: "https://www.facebook.com/{slug}".to_string(),
            youtube: "https://www.youtube.com/@{slug}".to_string(),
            instagram: "https://www.instagram.com/{slug}".to_string(),
        }
    }
}

/// Fill `{domain}`, `{label}` and `{slug}` in a URL template
pub fn fill_template(template: &str, target: &TargetIdentity) -> String {
    let domain = target.domain.as_deref().unwrap_or_default();
    let label = domain.split('.').next().unwrap_or_default();
    template
        .replace("{domain}", domain)
        .replace("{label}", label)
        .replace("{slug}", &target.slug())
}

/// Collector configuration: credentials, local lists and endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Malware-vendor API key (optional, vendor lookup skipped without it)
    pub virustotal_api_key: Option<String>,
    /// Safe Browsing API key (optional)
    pub safe_browsing_key: Option<String>,
    /// URLhaus auth key (optional)
    pub urlhaus_auth_key: Option<String>,
    /// Locally maintained sanctions list: domains or entity names
    pub sanctions: Vec<String>,
    /// DNS blocklist zones queried as `{domain}.{zone}`
    pub dnsbl_zones: Vec<String>,
    /// DKIM selectors probed under `_domainkey`
    pub dkim_selectors: Vec<String>,
    pub endpoints: Endpoints,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            virustotal_api_key: None,
            safe_browsing_key: None,
            urlhaus_auth_key: None,
            sanctions: Vec::new(),
            dnsbl_zones: vec![
                "dbl.spamhaus.org".to_string(),
                "multi.surbl.org".to_string(),
                "black.uribl.com".to_string(),
            ],
            dkim_selectors: ["google", "default", "selector1", "mail", "k1"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            endpoints: Endpoints::default(),
        }
    }
}
