//! Typed raw signal schema
//!
//! Each source writes exactly one slot of [`RawSignals`]. A slot that is
//! `None` means the source did not respond: scoring treats that as
//! unknown, never as a negative answer. Field names inside each slot are
//! the flat signal names recorded in ledger payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::TargetIdentity;

/// Version of the signal schema, bumped when a slot changes shape
pub const SIGNAL_SCHEMA_VERSION: u32 = 3;

/// The nine built-in evidence sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Tranco,
    Crtsh,
    Reputation,
    Dns,
    HttpHeaders,
    Whois,
    KnowledgeGraph,
    WebPresence,
    Social,
}

impl Source {
    /// Fixed merge and ledger ordering
    pub const ALL: [Source; 9] = [
        Source::Tranco,
        Source::Crtsh,
        Source::Reputation,
        Source::Dns,
        Source::HttpHeaders,
        Source::Whois,
        Source::KnowledgeGraph,
        Source::WebPresence,
        Source::Social,
    ];

    /// Sensor identifier used in metadata and ledger blocks
    pub fn sensor_id(&self) -> &'static str {
        match self {
            Self::Tranco => "tranco",
            Self::Crtsh => "crtsh",
            Self::Reputation => "reputation",
            Self::Dns => "dns",
            Self::HttpHeaders => "http_headers",
            Self::Whois => "whois",
            Self::KnowledgeGraph => "knowledge_graph",
            Self::WebPresence => "web_presence",
            Self::Social => "social",
        }
    }

    pub fn from_sensor_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.sensor_id() == id)
    }

    /// Sources that can only run against a resolved domain
    pub fn requires_domain(&self) -> bool {
        !matches!(self, Self::KnowledgeGraph | Self::Social)
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.sensor_id())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankSignals {
    /// Position in the popularity list, `None` when not listed
    pub tranco_rank: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CertType {
    Ev,
    Ov,
    Dv,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CertificateSignals {
    pub ssl_valid: bool,
    pub ssl_cert_type: Option<CertType>,
    pub ssl_org: Option<String>,
    pub first_cert_days_ago: Option<i64>,
    pub total_certs_issued: u64,
    pub cert_issuer: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReputationSignals {
    /// True when the malware-vendor API actually answered
    pub vt_queried: bool,
    pub vt_malicious_count: u64,
    pub vt_suspicious_count: u64,
    pub vt_clean_count: u64,
    pub vt_community_score: i64,
    pub vt_categories: Vec<String>,
    pub gsb_queried: bool,
    pub gsb_flagged: bool,
    pub on_spam_blocklist: bool,
    pub on_fraud_blocklist: bool,
    pub on_sanctions_list: bool,
}

impl ReputationSignals {
    pub fn vendor_flags(&self) -> u64 {
        self.vt_malicious_count + self.vt_suspicious_count
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DnsSignals {
    pub dns_has_spf: bool,
    pub dns_has_dmarc: bool,
    pub dns_has_dkim: bool,
    pub dns_has_dnssec: bool,
    pub dns_has_mx: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpSignals {
    pub http_status: u16,
    pub http_has_hsts: bool,
    pub http_has_csp: bool,
    pub http_has_xframe: bool,
    pub http_has_xcontent_type: bool,
    pub http_has_referrer_policy: bool,
    pub http_has_permissions_policy: bool,
    pub has_security_txt: bool,
    pub has_robots_txt: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationSignals {
    pub domain_age_days: Option<i64>,
    pub whois_org: Option<String>,
    pub whois_registrar: Option<String>,
    pub domain_expiry_years_ahead: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSignals {
    pub has_wikipedia: bool,
    pub has_wikidata: bool,
    pub has_crunchbase: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebPresenceSignals {
    pub has_structured_data: bool,
    pub has_org_schema: bool,
    pub has_status_page: bool,
    pub has_api_docs: bool,
    pub has_changelog: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SocialSignals {
    pub social_twitter: bool,
    pub social_linkedin: bool,
    pub social_github: bool,
    pub social_facebook: bool,
    pub social_youtube: bool,
    pub social_instagram: bool,
    pub social_count: u32,
}

/// Output of one collector invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceSignals {
    Rank(RankSignals),
    Certificates(CertificateSignals),
    Reputation(ReputationSignals),
    Dns(DnsSignals),
    Http(HttpSignals),
    Registration(RegistrationSignals),
    Knowledge(KnowledgeSignals),
    WebPresence(WebPresenceSignals),
    Social(SocialSignals),
    /// Forward-compatible passthrough for sensors this schema does not know
    Other { sensor: String, signals: Map<String, Value> },
}

impl SourceSignals {
    /// Sensor that produced this payload
    pub fn sensor_id(&self) -> &str {
        match self {
            Self::Rank(_) => Source::Tranco.sensor_id(),
            Self::Certificates(_) => Source::Crtsh.sensor_id(),
            Self::Reputation(_) => Source::Reputation.sensor_id(),
            Self::Dns(_) => Source::Dns.sensor_id(),
            Self::Http(_) => Source::HttpHeaders.sensor_id(),
            Self::Registration(_) => Source::Whois.sensor_id(),
            Self::Knowledge(_) => Source::KnowledgeGraph.sensor_id(),
            Self::WebPresence(_) => Source::WebPresence.sensor_id(),
            Self::Social(_) => Source::Social.sensor_id(),
            Self::Other { sensor, .. } => sensor,
        }
    }

    /// Flat key/value payload as recorded in the ledger
    pub fn to_payload(&self) -> Map<String, Value> {
        let value = match self {
            Self::Rank(s) => serde_json::to_value(s),
            Self::Certificates(s) => serde_json::to_value(s),
            Self::Reputation(s) => serde_json::to_value(s),
            Self::Dns(s) => serde_json::to_value(s),
            Self::Http(s) => serde_json::to_value(s),
            Self::Registration(s) => serde_json::to_value(s),
            Self::Knowledge(s) => serde_json::to_value(s),
            Self::WebPresence(s) => serde_json::to_value(s),
            Self::Social(s) => serde_json::to_value(s),
            Self::Other { signals, .. } => return signals.clone(),
        };
        match value {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Which sources were asked, which answered, and why the rest did not
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Coverage {
    /// Every source applicable to the target, including skipped ones
    pub queried: Vec<String>,
    pub responded: Vec<String>,
    /// Sources not attempted because their circuit breaker was open
    pub skipped: Vec<String>,
    /// Per-source failure message
    pub errors: BTreeMap<String, String>,
    pub elapsed_ms: u64,
}

impl Coverage {
    /// responded / queried, zero when nothing was queried
    pub fn confidence(&self) -> f64 {
        if self.queried.is_empty() {
            return 0.0;
        }
        (self.responded.len() as f64 / self.queried.len() as f64).clamp(0.0, 1.0)
    }
}

/// Merged evidence for one target in one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSignals {
    pub schema_version: u32,
    pub target: TargetIdentity,
    pub rank: Option<RankSignals>,
    pub certificates: Option<CertificateSignals>,
    pub reputation: Option<ReputationSignals>,
    pub dns: Option<DnsSignals>,
    pub http: Option<HttpSignals>,
    pub registration: Option<RegistrationSignals>,
    pub knowledge: Option<KnowledgeSignals>,
    pub web: Option<WebPresenceSignals>,
    pub social: Option<SocialSignals>,
    /// Payloads from sensors outside the typed schema
    pub extra: BTreeMap<String, Map<String, Value>>,
    pub coverage: Coverage,
}

impl RawSignals {
    pub fn new(target: TargetIdentity) -> Self {
        Self {
            schema_version: SIGNAL_SCHEMA_VERSION,
            target,
            rank: None,
            certificates: None,
            reputation: None,
            dns: None,
            http: None,
            registration: None,
            knowledge: None,
            web: None,
            social: None,
            extra: BTreeMap::new(),
            coverage: Coverage::default(),
        }
    }

    /// Place a collector result into its slot
    pub fn merge(&mut self, signals: SourceSignals) {
        match signals {
            SourceSignals::Rank(s) => self.rank = Some(s),
            SourceSignals::Certificates(s) => self.certificates = Some(s),
            SourceSignals::Reputation(s) => self.reputation = Some(s),
            SourceSignals::Dns(s) => self.dns = Some(s),
            SourceSignals::Http(s) => self.http = Some(s),
            SourceSignals::Registration(s) => self.registration = Some(s),
            SourceSignals::Knowledge(s) => self.knowledge = Some(s),
            SourceSignals::WebPresence(s) => self.web = Some(s),
            SourceSignals::Social(s) => self.social = Some(s),
            SourceSignals::Other { sensor, signals } => {
                self.extra.insert(sensor, signals);
            }
        }
    }

    pub fn tranco_rank(&self) -> Option<u64> {
        self.rank.as_ref().and_then(|r| r.tranco_rank).filter(|r| *r > 0)
    }

    pub fn domain_age_days(&self) -> Option<i64> {
        self.registration.as_ref().and_then(|r| r.domain_age_days)
    }

    pub fn is_young_domain(&self) -> bool {
        matches!(self.domain_age_days(), Some(age) if age > 0 && age < 30)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> TargetIdentity {
        TargetIdentity::parse("example.com").unwrap()
    }

    #[test]
    fn test_sensor_ids_round_trip() {
        for source in Source::ALL {
            assert_eq!(Source::from_sensor_id(source.sensor_id()), Some(source));
        }
        assert_eq!(Source::from_sensor_id("score_computed"), None);
    }

    #[test]
    fn test_merge_fills_slot() {
        let mut raw = RawSignals::new(target());
        raw.merge(SourceSignals::Dns(DnsSignals {
            dns_has_spf: true,
            ..Default::default()
        }));
        assert!(raw.dns.as_ref().unwrap().dns_has_spf);
        assert!(raw.http.is_none());
    }

    #[test]
    fn test_merge_unknown_sensor_goes_to_extra() {
        let mut raw = RawSignals::new(target());
        let mut signals = Map::new();
        signals.insert("listed".into(), Value::Bool(true));
        raw.merge(SourceSignals::Other {
            sensor: "abuse_feed".into(),
            signals,
        });
        assert_eq!(raw.extra["abuse_feed"]["listed"], Value::Bool(true));
    }

    #[test]
    fn test_payload_is_flat() {
        let payload = SourceSignals::Rank(RankSignals { tranco_rank: Some(42) }).to_payload();
        assert_eq!(payload["tranco_rank"], Value::from(42));
    }

    #[test]
    fn test_confidence() {
        let mut coverage = Coverage::default();
        assert_eq!(coverage.confidence(), 0.0);

        coverage.queried = vec!["a".into(), "b".into(), "c".into(), "d".into()];
        coverage.responded = vec!["a".into(), "c".into(), "d".into()];
        assert!((coverage.confidence() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unranked_is_not_ranked() {
        let mut raw = RawSignals::new(target());
        raw.rank = Some(RankSignals { tranco_rank: Some(0) });
        assert_eq!(raw.tranco_rank(), None);
    }
}
