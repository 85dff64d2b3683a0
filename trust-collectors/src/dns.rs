//! Email authentication and DNSSEC posture

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use trust_core::{DnsSignals, Source, SourceSignals, TargetIdentity};
use trust_net::{DnsLookup, NetError, RecordKind};

use crate::{require_domain, Collector, CollectorError};

pub struct DnsCollector {
    resolver: Arc<dyn DnsLookup>,
    dkim_selectors: Vec<String>,
}

impl DnsCollector {
    pub fn new(resolver: Arc<dyn DnsLookup>, dkim_selectors: Vec<String>) -> Self {
        Self {
            resolver,
            dkim_selectors,
        }
    }

    async fn txt_contains(&self, name: &str, marker: &str) -> Result<bool, NetError> {
        let records = self.resolver.txt(name).await?;
        Ok(records.iter().any(|r| r.to_lowercase().contains(marker)))
    }

    async fn has_dkim(&self, domain: &str) -> Result<bool, NetError> {
        let mut answered = false;
        let mut last_error = None;
        for selector in &self.dkim_selectors {
            match self.resolver.txt(&format!("{}._domainkey.{}", selector, domain)).await {
                Ok(records) if records.iter().any(|r| r.contains("p=")) => return Ok(true),
                Ok(_) => answered = true,
                Err(e) => last_error = Some(e),
            }
        }
        match last_error {
            Some(e) if !answered => Err(e),
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl Collector for DnsCollector {
    fn sensor_id(&self) -> &str {
        Source::Dns.sensor_id()
    }

    async fn collect(&self, target: &TargetIdentity) -> Result<SourceSignals, CollectorError> {
        let domain = require_domain(target)?;
        let dmarc_name = format!("_dmarc.{}", domain);

        let (spf, dmarc, mx, dkim, dnssec) = tokio::join!(
            self.txt_contains(domain, "v=spf1"),
            self.txt_contains(&dmarc_name, "v=dmarc1"),
            self.resolver.has_records(domain, RecordKind::Mx),
            self.has_dkim(domain),
            self.resolver.has_records(domain, RecordKind::Dnskey),
        );

        let results = [&spf, &dmarc, &mx, &dkim, &dnssec];
        if results.iter().all(|r| r.is_err()) {
            let reason = spf.err().map(|e| e.to_string()).unwrap_or_default();
            return Err(CollectorError::Network(reason));
        }

        let signals = DnsSignals {
            dns_has_spf: spf.unwrap_or(false),
            dns_has_dmarc: dmarc.unwrap_or(false),
            dns_has_dkim: dkim.unwrap_or(false),
            dns_has_dnssec: dnssec.unwrap_or(false),
            dns_has_mx: mx.unwrap_or(false),
        };
        debug!("DNS posture for {}: {:?}", domain, signals);
        Ok(SourceSignals::Dns(signals))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeZone {
        txt: HashMap<String, Vec<String>>,
        records: Vec<(String, RecordKind)>,
        broken: bool,
    }

    #[async_trait]
    impl DnsLookup for FakeZone {
        async fn txt(&self, name: &str) -> Result<Vec<String>, NetError> {
            if self.broken {
                return Err(NetError::Timeout(5));
            }
            Ok(self.txt.get(name).cloned().unwrap_or_default())
        }

        async fn has_records(&self, name: &str, kind: RecordKind) -> Result<bool, NetError> {
            if self.broken {
                return Err(NetError::Timeout(5));
            }
            Ok(self.records.iter().any(|(n, k)| n == name && *k == kind))
        }
    }

    fn selectors() -> Vec<String> {
        vec!["google".into(), "selector1".into()]
    }

    #[tokio::test]
    async fn test_full_posture() {
        let mut zone = FakeZone::default();
        zone.txt.insert("example.com".into(), vec!["v=spf1 include:_spf.google.com ~all".into()]);
        zone.txt.insert("_dmarc.example.com".into(), vec!["v=DMARC1; p=reject".into()]);
        zone.txt.insert("selector1._domainkey.example.com".into(), vec!["v=DKIM1; k=rsa; p=MIIB".into()]);
        zone.records.push(("example.com".into(), RecordKind::Mx));
        zone.records.push(("example.com".into(), RecordKind::Dnskey));

        let collector = DnsCollector::new(Arc::new(zone), selectors());
        let target = TargetIdentity::parse("example.com").unwrap();
        let signals = collector.collect(&target).await.unwrap();
        assert_eq!(
            signals,
            SourceSignals::Dns(DnsSignals {
                dns_has_spf: true,
                dns_has_dmarc: true,
                dns_has_dkim: true,
                dns_has_dnssec: true,
                dns_has_mx: true,
            })
        );
    }

    #[tokio::test]
    async fn test_empty_zone_is_all_false() {
        let collector = DnsCollector::new(Arc::new(FakeZone::default()), selectors());
        let target = TargetIdentity::parse("example.com").unwrap();
        assert_eq!(
            collector.collect(&target).await.unwrap(),
            SourceSignals::Dns(DnsSignals::default())
        );
    }

    #[tokio::test]
    async fn test_resolver_down_is_an_error() {
        let zone = FakeZone {
            broken: true,
            ..Default::default()
        };
        let collector = DnsCollector::new(Arc::new(zone), selectors());
        let target = TargetIdentity::parse("example.com").unwrap();
        assert!(collector.collect(&target).await.is_err());
    }
}
