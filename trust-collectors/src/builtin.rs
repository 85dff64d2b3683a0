//! The nine built-in collectors wired from one configuration

use reqwest::Client;
use std::sync::Arc;

use trust_net::DnsLookup;

use crate::{
    Collector, CollectorConfig, CrtshCollector, DnsCollector, HttpHeadersCollector, KnowledgeGraphCollector,
    RankIndex, ReputationCollector, SocialCollector, TrancoCollector, WebPresenceCollector, WhoisCollector,
};

/// Build every built-in collector, in canonical source order
pub fn default_collectors(
    config: &CollectorConfig,
    client: Client,
    dns: Arc<dyn DnsLookup>,
    ranks: Arc<RankIndex>,
) -> Vec<Arc<dyn Collector>> {
    let endpoints = &config.endpoints;
    vec![
        Arc::new(TrancoCollector::new(ranks)),
        Arc::new(CrtshCollector::new(client.clone(), &endpoints.crtsh)),
        Arc::new(ReputationCollector::new(client.clone(), dns.clone(), config.clone())),
        Arc::new(DnsCollector::new(dns, config.dkim_selectors.clone())),
        Arc::new(HttpHeadersCollector::new(client.clone(), &endpoints.site)),
        Arc::new(WhoisCollector::new(client.clone(), &endpoints.rdap)),
        Arc::new(KnowledgeGraphCollector::new(client.clone(), endpoints)),
        Arc::new(WebPresenceCollector::new(
            client.clone(),
            &endpoints.site,
            endpoints.status_pages.clone(),
        )),
        Arc::new(SocialCollector::new(client, endpoints.social.clone())),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use trust_core::Source;
    use trust_net::{NetConfig, SystemResolver};

    #[tokio::test]
    async fn test_default_collectors_follow_source_order() {
        let config = CollectorConfig::default();
        let dns: Arc<dyn DnsLookup> = Arc::new(SystemResolver::new(&NetConfig::default()));
        let collectors = default_collectors(&config, Client::new(), dns, Arc::new(RankIndex::new()));
        let ids: Vec<&str> = collectors.iter().map(|c| c.sensor_id()).collect();
        let expected: Vec<&str> = Source::ALL.iter().map(|s| s.sensor_id()).collect();
        assert_eq!(ids, expected);
    }
}
