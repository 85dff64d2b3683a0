//! Web presence: structured data, developer docs, status pages

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use scraper::{Html, Selector};
use std::sync::LazyLock;
use tracing::debug;

use trust_core::{Source, SourceSignals, TargetIdentity, WebPresenceSignals};
use trust_net::url_exists;

use crate::{fill_template, require_domain, Collector, CollectorError};

static LD_JSON_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).unwrap());

static LINK_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

const API_DOC_PREFIXES: &[&str] = &["/docs", "/api", "/developer"];
const ORG_SCHEMA_TYPES: &[&str] = &["\"organization\"", "\"corporation\""];

pub struct WebPresenceCollector {
    client: Client,
    site_template: String,
    status_templates: Vec<String>,
}

impl WebPresenceCollector {
    pub fn new(client: Client, site_template: &str, status_templates: Vec<String>) -> Self {
        Self {
            client,
            site_template: site_template.trim_end_matches('/').to_string(),
            status_templates,
        }
    }

    async fn has_status_page(&self, target: &TargetIdentity) -> bool {
        let checks = self
            .status_templates
            .iter()
            .map(|template| fill_template(template, target))
            .map(|url| async move { url_exists(&self.client, &url).await.unwrap_or(false) });
        join_all(checks).await.into_iter().any(|found| found)
    }
}

/// Scan a home page for structured data and developer links
pub fn scan_homepage(html: &str) -> WebPresenceSignals {
    let document = Html::parse_document(html);
    let mut signals = WebPresenceSignals::default();

    for script in document.select(&LD_JSON_SELECTOR) {
        signals.has_structured_data = true;
        let body = script.text().collect::<String>().to_lowercase();
        if ORG_SCHEMA_TYPES.iter().any(|t| body.contains(t)) {
            signals.has_org_schema = true;
        }
    }

    for link in document.select(&LINK_SELECTOR) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let href = href.to_lowercase();
        let path = href
            .split_once("://")
            .and_then(|(_, rest)| rest.find('/').map(|i| rest[i..].to_string()))
            .unwrap_or(href);
        if API_DOC_PREFIXES.iter().any(|p| path.starts_with(p)) {
            signals.has_api_docs = true;
        }
        if path.starts_with("/changelog") {
            signals.has_changelog = true;
        }
    }
    signals
}

#[async_trait]
impl Collector for WebPresenceCollector {
    fn sensor_id(&self) -> &str {
        Source::WebPresence.sensor_id()
    }

    async fn collect(&self, target: &TargetIdentity) -> Result<SourceSignals, CollectorError> {
        let domain = require_domain(target)?;
        let url = fill_template(&self.site_template, target);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(CollectorError::Status(response.status().as_u16()));
        }
        let body = response.text().await?;
        let mut signals = scan_homepage(&body);
        signals.has_status_page = self.has_status_page(target).await;

        debug!("Web presence for {}: {:?}", domain, signals);
        Ok(SourceSignals::WebPresence(signals))
    }
}
