//! Domain registration data over RDAP

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use trust_core::{RegistrationSignals, Source, SourceSignals, TargetIdentity};

use crate::{require_domain, Collector, CollectorError};

#[derive(Debug, Default, Deserialize)]
struct RdapDomain {
    #[serde(default)]
    events: Vec<RdapEvent>,
    #[serde(default)]
    entities: Vec<RdapEntity>,
}

#[derive(Debug, Deserialize)]
struct RdapEvent {
    #[serde(rename = "eventAction")]
    action: String,
    #[serde(rename = "eventDate")]
    date: String,
}

#[derive(Debug, Deserialize)]
struct RdapEntity {
    #[serde(default)]
    roles: Vec<String>,
    #[serde(rename = "vcardArray", default)]
    vcard: Option<Value>,
}

impl RdapEntity {
    fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// First text value of a vCard property (`fn`, `org`)
    fn vcard_text(&self, property: &str) -> Option<String> {
        let properties = self.vcard.as_ref()?.get(1)?.as_array()?;
        properties.iter().find_map(|p| {
            let p = p.as_array()?;
            if p.first()?.as_str()? != property {
                return None;
            }
            let value = p.get(3)?;
            let text = value
                .as_str()
                .map(str::to_string)
                .or_else(|| value.as_array()?.first()?.as_str().map(str::to_string))?;
            let text = text.trim().to_string();
            (!text.is_empty() && !text.to_lowercase().contains("redacted")).then_some(text)
        })
    }
}

/// Registration (WHOIS) collector backed by an RDAP bootstrap service
pub struct WhoisCollector {
    client: Client,
    base_url: String,
}

impl WhoisCollector {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

fn parse_event_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw).ok().map(|d| d.with_timezone(&Utc))
}

fn extract(domain: &RdapDomain, now: DateTime<Utc>) -> RegistrationSignals {
    let mut signals = RegistrationSignals::default();
    for event in &domain.events {
        let Some(date) = parse_event_date(&event.date) else {
            continue;
        };
        match event.action.as_str() {
            "registration" => {
                signals.domain_age_days = Some((now - date).num_days().max(0));
            }
            "expiration" => {
                let years = (date - now).num_days() as f64 / 365.25;
                signals.domain_expiry_years_ahead = Some(((years * 10.0).round() / 10.0).max(0.0));
            }
            _ => {}
        }
    }

    signals.whois_registrar = domain
        .entities
        .iter()
        .filter(|e| e.has_role("registrar"))
        .find_map(|e| e.vcard_text("fn"));
    signals.whois_org = domain
        .entities
        .iter()
        .filter(|e| e.has_role("registrant"))
        .find_map(|e| e.vcard_text("org").or_else(|| e.vcard_text("fn")));
    signals
}

#[async_trait]
impl Collector for WhoisCollector {
    fn sensor_id(&self) -> &str {
        Source::Whois.sensor_id()
    }

    async fn collect(&self, target: &TargetIdentity) -> Result<SourceSignals, CollectorError> {
        let domain = require_domain(target)?;
        let response = self
            .client
            .get(format!("{}/domain/{}", self.base_url, domain))
            .header("Accept", "application/rdap+json")
            .send()
            .await?;
        match response.status().as_u16() {
            404 => return Err(CollectorError::NoData(format!("no registration record for {}", domain))),
            code if !(200..300).contains(&code) => return Err(CollectorError::Status(code)),
            _ => {}
        }
        let record: RdapDomain = response.json().await?;
        let signals = extract(&record, Utc::now());
        debug!("Registration for {}: age {:?} days", domain, signals.domain_age_days);
        Ok(SourceSignals::Registration(signals))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rdap_body() -> Value {
        json!({
            "events": [
                {"eventAction": "registration", "eventDate": "1995-08-14T04:00:00Z"},
                {"eventAction": "expiration", "eventDate": "2099-08-13T04:00:00Z"},
                {"eventAction": "last changed", "eventDate": "2024-08-14T07:01:44Z"}
            ],
            "entities": [
                {"roles": ["registrar"], "vcardArray": ["vcard", [
                    ["version", {}, "text", "4.0"],
                    ["fn", {}, "text", "Example Registrar, Inc."]
                ]]},
                {"roles": ["registrant"], "vcardArray": ["vcard", [
                    ["fn", {}, "text", "REDACTED FOR PRIVACY"],
                    ["org", {}, "text", "Example Corp"]
                ]]}
            ]
        })
    }

    #[test]
    fn test_extract_events_and_entities() {
        let record: RdapDomain = serde_json::from_value(rdap_body()).unwrap();
        let signals = extract(&record, Utc::now());
        assert!(signals.domain_age_days.unwrap() > 10_000);
        assert!(signals.domain_expiry_years_ahead.unwrap() > 50.0);
        assert_eq!(signals.whois_registrar.as_deref(), Some("Example Registrar, Inc."));
        assert_eq!(signals.whois_org.as_deref(), Some("Example Corp"));
    }

    #[test]
    fn test_redacted_registrant_is_skipped() {
        let record: RdapDomain = serde_json::from_value(json!({
            "entities": [{"roles": ["registrant"], "vcardArray": ["vcard", [["fn", {}, "text", "Redacted"]]]}]
        }))
        .unwrap();
        assert_eq!(extract(&record, Utc::now()).whois_org, None);
    }

    #[test]
    fn test_past_expiry_clamps_to_zero() {
        let record: RdapDomain = serde_json::from_value(json!({
            "events": [{"eventAction": "expiration", "eventDate": "2001-01-01T00:00:00Z"}]
        }))
        .unwrap();
        assert_eq!(extract(&record, Utc::now()).domain_expiry_years_ahead, Some(0.0));
    }

    #[tokio::test]
    async fn test_collect_and_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/domain/example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(rdap_body()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/domain/unknown.example"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let collector = WhoisCollector::new(Client::new(), &server.uri());
        let found = collector.collect(&TargetIdentity::parse("example.com").unwrap()).await;
        assert!(matches!(found, Ok(SourceSignals::Registration(_))));

        let missing = collector.collect(&TargetIdentity::parse("unknown.example").unwrap()).await;
        assert!(matches!(missing, Err(CollectorError::NoData(_))));
    }
}
