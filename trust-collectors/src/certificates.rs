//! Certificate transparency lookups via crt.sh

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use trust_core::{CertType, CertificateSignals, Source, SourceSignals, TargetIdentity};

use crate::{require_domain, Collector, CollectorError};

#[derive(Debug, Deserialize)]
struct CtEntry {
    #[serde(default)]
    issuer_name: Option<String>,
    #[serde(default)]
    entry_timestamp: Option<String>,
}

pub struct CrtshCollector {
    client: Client,
    base_url: String,
}

impl CrtshCollector {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

fn parse_ct_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .ok()
}

/// Classify validation level from the issuing CA's name
pub fn classify_issuer(issuer: &str) -> CertType {
    let il = issuer.to_lowercase();
    if il.contains("extended validation") || il.contains(" ev ") {
        CertType::Ev
    } else if il.contains("organization") || il.contains(" ov ") {
        CertType::Ov
    } else {
        CertType::Dv
    }
}

#[async_trait]
impl Collector for CrtshCollector {
    fn sensor_id(&self) -> &str {
        Source::Crtsh.sensor_id()
    }

    async fn collect(&self, target: &TargetIdentity) -> Result<SourceSignals, CollectorError> {
        let domain = require_domain(target)?;
        let response = self
            .client
            .get(format!("{}/", self.base_url))
            .query(&[("q", domain), ("output", "json")])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(CollectorError::Status(response.status().as_u16()));
        }
        let entries: Vec<CtEntry> = response.json().await?;
        debug!("crt.sh returned {} entries for {}", entries.len(), domain);

        let mut signals = CertificateSignals {
            total_certs_issued: entries.len() as u64,
            ssl_valid: !entries.is_empty(),
            ..Default::default()
        };

        let mut earliest: Option<NaiveDateTime> = None;
        let mut latest: Option<(NaiveDateTime, &str)> = None;
        for entry in &entries {
            let Some(ts) = entry.entry_timestamp.as_deref().and_then(parse_ct_timestamp) else {
                continue;
            };
            if earliest.map_or(true, |e| ts < e) {
                earliest = Some(ts);
            }
            if let Some(issuer) = entry.issuer_name.as_deref().filter(|i| !i.is_empty()) {
                if latest.map_or(true, |(t, _)| ts > t) {
                    latest = Some((ts, issuer));
                }
            }
        }

        if let Some(first) = earliest {
            signals.first_cert_days_ago = Some((Utc::now().naive_utc() - first).num_days().max(0));
        }
        if let Some((_, issuer)) = latest {
            signals.ssl_cert_type = Some(classify_issuer(issuer));
            signals.cert_issuer = Some(issuer.to_string());
        }

        Ok(SourceSignals::Certificates(signals))
    }
}
