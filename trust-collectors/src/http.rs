//! Security headers and well-known files on the target's site

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Client;
use tracing::debug;

use trust_core::{HttpSignals, Source, SourceSignals, TargetIdentity};

use crate::{fill_template, require_domain, Collector, CollectorError};

pub struct HttpHeadersCollector {
    client: Client,
    site_template: String,
}

impl HttpHeadersCollector {
    pub fn new(client: Client, site_template: &str) -> Self {
        Self {
            client,
            site_template: site_template.trim_end_matches('/').to_string(),
        }
    }

    /// Body of a well-known file, if it answered 200
    async fn fetch_text(&self, url: &str) -> Option<String> {
        let response = self.client.get(url).send().await.ok()?;
        if response.status().as_u16() != 200 {
            return None;
        }
        response.text().await.ok()
    }
}

fn header_signals(status: u16, headers: &HeaderMap) -> HttpSignals {
    let has = |name: &str| headers.contains_key(name);
    HttpSignals {
        http_status: status,
        http_has_hsts: has("strict-transport-security"),
        http_has_csp: has("content-security-policy"),
        http_has_xframe: has("x-frame-options"),
        http_has_xcontent_type: has("x-content-type-options"),
        http_has_referrer_policy: has("referrer-policy"),
        http_has_permissions_policy: has("permissions-policy"),
        ..Default::default()
    }
}

#[async_trait]
impl Collector for HttpHeadersCollector {
    fn sensor_id(&self) -> &str {
        Source::HttpHeaders.sensor_id()
    }

    async fn collect(&self, target: &TargetIdentity) -> Result<SourceSignals, CollectorError> {
        let domain = require_domain(target)?;
        let base = fill_template(&self.site_template, target);

        let response = self.client.get(&base).send().await?;
        let mut signals = header_signals(response.status().as_u16(), response.headers());
        debug!("{} answered {}", domain, signals.http_status);

        let security_url = format!("{}/.well-known/security.txt", base);
        let robots_url = format!("{}/robots.txt", base);
        let (security, robots) = tokio::join!(self.fetch_text(&security_url), self.fetch_text(&robots_url));
        signals.has_security_txt = security.is_some_and(|body| body.to_lowercase().contains("contact"));
        signals.has_robots_txt = robots.is_some_and(|body| body.len() > 10);

        Ok(SourceSignals::Http(signals))
    }
}
