//! Reputation: malware vendors, Safe Browsing, abuse feeds, DNS blocklists
//! and the local sanctions list, folded into one source.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use trust_core::{ReputationSignals, Source, SourceSignals, TargetIdentity};
use trust_net::{DnsLookup, RecordKind};

use crate::{require_domain, Collector, CollectorConfig, CollectorError};

pub struct ReputationCollector {
    client: Client,
    dns: Arc<dyn DnsLookup>,
    config: CollectorConfig,
}

/// Outcome of one sub-lookup
struct Lookup {
    attempted: u32,
    failed: Vec<String>,
}

impl Lookup {
    fn new() -> Self {
        Self {
            attempted: 0,
            failed: Vec::new(),
        }
    }

    fn record<T>(&mut self, name: &str, result: Result<T, CollectorError>) -> Option<T> {
        self.attempted += 1;
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("{} lookup failed: {}", name, e);
                self.failed.push(format!("{}: {}", name, e));
                None
            }
        }
    }

    fn all_failed(&self) -> bool {
        self.attempted > 0 && self.failed.len() as u32 == self.attempted
    }
}

impl ReputationCollector {
    pub fn new(client: Client, dns: Arc<dyn DnsLookup>, config: CollectorConfig) -> Self {
        Self { client, dns, config }
    }

    /// Match the domain or display name against the local sanctions list
    pub fn is_sanctioned(&self, target: &TargetIdentity) -> bool {
        let name = target.display_name.to_lowercase();
        let domain = target.domain.as_deref().unwrap_or_default();
        self.config.sanctions.iter().any(|entry| {
            let entry = entry.trim().to_lowercase();
            !entry.is_empty() && (entry == domain || entry == name)
        })
    }

    async fn virustotal(&self, key: &str, domain: &str, out: &mut ReputationSignals) -> Result<(), CollectorError> {
        let url = format!(
            "{}/api/v3/domains/{}",
            self.config.endpoints.virustotal.trim_end_matches('/'),
            domain
        );
        let response = self.client.get(&url).header("x-apikey", key).send().await?;
        let status = response.status();
        // Unknown to the vendor: no verdict either way
        if status.as_u16() == 404 {
            debug!("VirusTotal has no record of {}", domain);
            return Ok(());
        }
        if !status.is_success() {
            return Err(CollectorError::Status(status.as_u16()));
        }

        let body: Value = response.json().await?;
        let attributes = &body["data"]["attributes"];
        let stats = &attributes["last_analysis_stats"];
        if !stats.is_object() {
            return Err(CollectorError::Parse("missing last_analysis_stats".into()));
        }
        out.vt_queried = true;
        let count = |key: &str| stats[key].as_u64().unwrap_or(0);
        out.vt_malicious_count = count("malicious");
        out.vt_suspicious_count = count("suspicious");
        out.vt_clean_count = count("harmless") + count("undetected");

        let votes = &attributes["total_votes"];
        out.vt_community_score =
            votes["harmless"].as_i64().unwrap_or(0) - votes["malicious"].as_i64().unwrap_or(0);

        if let Some(categories) = attributes["categories"].as_object() {
            let mut values: Vec<String> = categories
                .values()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_lowercase())
                .collect();
            values.sort();
            values.dedup();
            out.vt_categories = values;
        }
        Ok(())
    }

    async fn safe_browsing(&self, key: &str, domain: &str, out: &mut ReputationSignals) -> Result<(), CollectorError> {
        let url = format!(
            "{}/v4/threatMatches:find",
            self.config.endpoints.safe_browsing.trim_end_matches('/')
        );
        let body = json!({
            "client": {"clientId": "trustmesh", "clientVersion": "3.0.0"},
            "threatInfo": {
                "threatTypes": ["MALWARE", "SOCIAL_ENGINEERING", "UNWANTED_SOFTWARE", "POTENTIALLY_HARMFUL_APPLICATION"],
                "platformTypes": ["ANY_PLATFORM"],
                "threatEntryTypes": ["URL"],
                "threatEntries": [
                    {"url": format!("https://{}", domain)},
                    {"url": format!("http://{}", domain)}
                ]
            }
        });
        let response = self
            .client
            .post(&url)
            .query(&[("key", key)])
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(CollectorError::Status(response.status().as_u16()));
        }
        out.gsb_queried = true;
        let result: Value = response.json().await?;
        out.gsb_flagged = result["matches"].as_array().is_some_and(|m| !m.is_empty());
        Ok(())
    }

    async fn urlhaus(&self, domain: &str, out: &mut ReputationSignals) -> Result<(), CollectorError> {
        let url = format!("{}/v1/host/", self.config.endpoints.urlhaus.trim_end_matches('/'));
        let mut request = self.client.post(&url).form(&[("host", domain)]);
        if let Some(key) = &self.config.urlhaus_auth_key {
            request = request.header("Auth-Key", key);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(CollectorError::Status(response.status().as_u16()));
        }
        let result: Value = response.json().await?;
        let listed = result["query_status"].as_str() == Some("ok")
            && url_count(&result["url_count"]) > 0;
        out.on_fraud_blocklist |= listed;
        Ok(())
    }

    async fn dnsbl(&self, domain: &str, out: &mut ReputationSignals) -> Result<(), CollectorError> {
        let mut answered = false;
        let mut last_error = None;
        for zone in &self.config.dnsbl_zones {
            match self.dns.has_records(&format!("{}.{}", domain, zone), RecordKind::A).await {
                Ok(listed) => {
                    answered = true;
                    if listed {
                        debug!("{} listed on {}", domain, zone);
                        out.on_spam_blocklist = true;
                        break;
                    }
                }
                Err(e) => last_error = Some(e),
            }
        }
        match (answered, last_error) {
            (false, Some(e)) => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// URLhaus reports `url_count` as either a number or a numeric string
fn url_count(value: &Value) -> u64 {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
        .unwrap_or(0)
}

#[async_trait]
impl Collector for ReputationCollector {
    fn sensor_id(&self) -> &str {
        Source::Reputation.sensor_id()
    }

    async fn collect(&self, target: &TargetIdentity) -> Result<SourceSignals, CollectorError> {
        let domain = require_domain(target)?;
        let mut signals = ReputationSignals {
            on_sanctions_list: self.is_sanctioned(target),
            ..Default::default()
        };
        let mut lookups = Lookup::new();

        if let Some(key) = &self.config.virustotal_api_key {
            let result = self.virustotal(key, domain, &mut signals).await;
            lookups.record("virustotal", result);
        }
        if let Some(key) = &self.config.safe_browsing_key {
            let result = self.safe_browsing(key, domain, &mut signals).await;
            lookups.record("safe_browsing", result);
        }
        let result = self.urlhaus(domain, &mut signals).await;
        lookups.record("urlhaus", result);
        if !self.config.dnsbl_zones.is_empty() {
            let result = self.dnsbl(domain, &mut signals).await;
            lookups.record("dnsbl", result);
        }

        if lookups.all_failed() {
            return Err(CollectorError::Network(lookups.failed.join("; ")));
        }
        if !lookups.failed.is_empty() {
            warn!("Partial reputation data for {}: {}", domain, lookups.failed.join("; "));
        }
        Ok(SourceSignals::Reputation(signals))
    }
}
