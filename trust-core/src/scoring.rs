//! Evidence-accumulation scoring engine
//!
//! Four independently capped categories, each a sum of fixed point values
//! for the signals that are present. Absent sources contribute nothing.
//! Hard caps are evaluated afterwards and may only lower the total.

use chrono::Utc;
use std::collections::BTreeMap;

use crate::{
    Breakdown, CategoryScores, ConfidenceLabel, CertType, Freshness, Grade, HardCap, RawSignals,
    Recommendation, TrustScoreResult, ENGINE_VERSION, VERIFIED_THRESHOLD,
};

pub const EXISTENCE_AGE_CAP: i32 = 300;
pub const SECURITY_INTEGRITY_CAP: i32 = 300;
pub const REPUTATION_SCALE_CAP: i32 = 250;
pub const OPERATIONAL_MATURITY_CAP: i32 = 150;

/// Vendor flag count at which the high-flags cap engages
pub const HIGH_VENDOR_FLAGS: u64 = 6;

type Points = BTreeMap<String, i32>;

fn add(points: &mut Points, key: &str, value: i32) {
    points.insert(key.to_string(), value);
}

fn clamp(points: &Points, cap: i32) -> u32 {
    points.values().sum::<i32>().clamp(0, cap) as u32
}

/// Are you real and established?
pub fn score_existence_age(s: &RawSignals) -> (u32, Points) {
    let mut points = Points::new();

    if let Some(age) = s.domain_age_days() {
        match age {
            a if a > 3650 => add(&mut points, "domain_age", 80),
            a if a > 1825 => add(&mut points, "domain_age", 60),
            a if a > 730 => add(&mut points, "domain_age", 40),
            a if a > 365 => add(&mut points, "domain_age", 25),
            a if a > 90 => add(&mut points, "domain_age", 10),
            a if a > 0 && a < 30 => add(&mut points, "domain_age_penalty", -50),
            _ => {}
        }
    }

    if let Some(certs) = &s.certificates {
        if certs.ssl_valid {
            add(&mut points, "ssl_exists", 15);
        }
        match certs.first_cert_days_ago.unwrap_or(0) {
            d if d > 1825 => add(&mut points, "first_cert_age", 30),
            d if d > 730 => add(&mut points, "first_cert_age", 20),
            d if d > 365 => add(&mut points, "first_cert_age", 10),
            _ => {}
        }
        match certs.ssl_cert_type {
            Some(CertType::Ev) => add(&mut points, "cert_type", 25),
            Some(CertType::Ov) => add(&mut points, "cert_type", 10),
            _ => {}
        }
    }

    if let Some(kg) = &s.knowledge {
        if kg.has_wikipedia {
            add(&mut points, "wikipedia", 50);
        }
        if kg.has_wikidata {
            add(&mut points, "wikidata", 30);
        }
        if kg.has_crunchbase {
            add(&mut points, "crunchbase", 20);
        }
    }

    let whois_org = s.registration.as_ref().and_then(|r| r.whois_org.as_deref());
    let ssl_org = s.certificates.as_ref().and_then(|c| c.ssl_org.as_deref());
    if let (Some(a), Some(b)) = (whois_org, ssl_org) {
        if org_prefix(a) == org_prefix(b) && !org_prefix(a).is_empty() {
            add(&mut points, "org_consistency", 20);
        }
    }

    if let Some(years) = s.registration.as_ref().and_then(|r| r.domain_expiry_years_ahead) {
        if years >= 3.0 {
            add(&mut points, "domain_commitment", 15);
        } else if years >= 1.0 {
            add(&mut points, "domain_commitment", 5);
        }
    }

    (clamp(&points, EXISTENCE_AGE_CAP), points)
}

fn org_prefix(org: &str) -> String {
    org.trim().to_lowercase().chars().take(8).collect()
}

/// Do you take trust seriously?
pub fn score_security_integrity(s: &RawSignals) -> (u32, Points) {
    let mut points = Points::new();

    if let Some(rep) = &s.reputation {
        if rep.vt_queried {
            match rep.vendor_flags() {
                0 => add(&mut points, "vt_clean", 100),
                1..=2 => add(&mut points, "vt_mostly_clean", 40),
                3..=5 => add(&mut points, "vt_suspicious_penalty", -50),
                _ => add(&mut points, "vt_dangerous_penalty", -200),
            }
        }
        if rep.gsb_queried {
            if rep.gsb_flagged {
                add(&mut points, "gsb_flagged_penalty", -200);
            } else {
                add(&mut points, "gsb_clean", 30);
            }
        }
    }

    if let Some(dns) = &s.dns {
        for (present, key, value) in [
            (dns.dns_has_spf, "spf", 25),
            (dns.dns_has_dmarc, "dmarc", 30),
            (dns.dns_has_dkim, "dkim", 15),
            (dns.dns_has_dnssec, "dnssec", 20),
        ] {
            if present {
                add(&mut points, key, value);
            }
        }
    }

    if let Some(http) = &s.http {
        for (present, key, value) in [
            (http.http_has_hsts, "hsts", 20),
            (http.http_has_csp, "csp", 20),
            (http.http_has_xframe, "xframe", 10),
            (http.http_has_xcontent_type, "xcontent", 10),
            (http.http_has_referrer_policy, "referrer_policy", 10),
            (http.http_has_permissions_policy, "permissions_policy", 10),
        ] {
            if present {
                add(&mut points, key, value);
            }
        }
    }

    (clamp(&points, SECURITY_INTEGRITY_CAP), points)
}

/// Does the world know and trust you?
pub fn score_reputation_scale(s: &RawSignals) -> (u32, Points) {
    let mut points = Points::new();

    if let Some(rank) = s.tranco_rank() {
        let value = match rank {
            0..=100 => 100,
            101..=1_000 => 80,
            1_001..=10_000 => 60,
            10_001..=100_000 => 40,
            100_001..=500_000 => 20,
            _ => 10,
        };
        add(&mut points, "tranco", value);
    }

    if let Some(rep) = &s.reputation {
        if rep.vt_community_score > 0 {
            let value = (rep.vt_community_score.saturating_mul(3)).min(30) as i32;
            add(&mut points, "vt_community", value);
        }
    }

    if let Some(social) = &s.social {
        if social.social_twitter {
            add(&mut points, "twitter", 10);
        }
        if social.social_linkedin {
            add(&mut points, "linkedin", 15);
        }
        if social.social_github {
            add(&mut points, "github", 15);
        }
        if social.social_count >= 4 {
            add(&mut points, "social_breadth", 20);
        }
    }

    (clamp(&points, REPUTATION_SCALE_CAP), points)
}

/// Do you operate like a real business?
pub fn score_operational_maturity(s: &RawSignals) -> (u32, Points) {
    let mut points = Points::new();

    if let Some(web) = &s.web {
        for (present, key, value) in [
            (web.has_structured_data, "structured_data", 15),
            (web.has_org_schema, "org_schema", 15),
            (web.has_status_page, "status_page", 25),
            (web.has_api_docs, "api_docs", 20),
            (web.has_changelog, "changelog", 15),
        ] {
            if present {
                add(&mut points, key, value);
            }
        }
    }
    if let Some(http) = &s.http {
        if http.has_security_txt {
            add(&mut points, "security_txt", 15);
        }
        if http.has_robots_txt {
            add(&mut points, "robots_txt", 15);
        }
    }
    if s.certificates.as_ref().is_some_and(|c| c.total_certs_issued > 5) {
        add(&mut points, "cert_renewals", 15);
    }
    if s.dns.as_ref().is_some_and(|d| d.dns_has_mx) {
        add(&mut points, "mx_records", 15);
    }

    (clamp(&points, OPERATIONAL_MATURITY_CAP), points)
}

/// Whether a disqualifying condition holds for these signals
pub fn cap_applies(cap: HardCap, s: &RawSignals) -> bool {
    let rep = s.reputation.as_ref();
    match cap {
        HardCap::Sanctioned => rep.is_some_and(|r| r.on_sanctions_list),
        HardCap::FraudBlocklisted => rep.is_some_and(|r| r.on_fraud_blocklist),
        HardCap::GoogleSafeBrowsingFlagged => rep.is_some_and(|r| r.gsb_queried && r.gsb_flagged),
        HardCap::VirustotalHighFlags => {
            rep.is_some_and(|r| r.vt_queried && r.vendor_flags() >= HIGH_VENDOR_FLAGS)
        }
        HardCap::NewDomainNoReputation => s.is_young_domain() && s.tranco_rank().is_none(),
    }
}

/// Pick the binding cap among all applicable ones and apply it.
///
/// The lowest ceiling wins, ties go to declaration order. The returned
/// score is never higher than the input.
pub fn apply_hard_caps(score: u32, s: &RawSignals) -> (u32, Option<HardCap>) {
    let binding = HardCap::ALL
        .into_iter()
        .filter(|cap| cap_applies(*cap, s))
        .min_by_key(|cap| (cap.ceiling(), *cap));

    match binding {
        Some(cap) => (score.min(cap.ceiling()), Some(cap)),
        None => (score, None),
    }
}

/// Score a merged signal set.
///
/// Entity identity defaults to the open (unregistered) id of the target;
/// the pipeline overwrites it when the registry knows the entity.
pub fn compute_score(signals: &RawSignals) -> TrustScoreResult {
    let (existence_age, ea) = score_existence_age(signals);
    let (security_integrity, si) = score_security_integrity(signals);
    let (reputation_scale, rs) = score_reputation_scale(signals);
    let (operational_maturity, om) = score_operational_maturity(signals);

    let categories = CategoryScores {
        existence_age,
        security_integrity,
        reputation_scale,
        operational_maturity,
    };
    let raw_score = categories.total();
    let (score, cap_applied) = apply_hard_caps(raw_score, signals);

    let coverage = &signals.coverage;
    let confidence = coverage.confidence();
    let target = &signals.target;

    TrustScoreResult {
        entity_id: target.open_entity_id(),
        entity_name: target.display_name.clone(),
        entity_type: target.kind,
        target: target.raw.clone(),
        domain: target.domain.clone(),
        score,
        raw_score,
        grade: Grade::from_score(score),
        recommendation: Recommendation::from_score(score),
        categories,
        breakdown: Breakdown {
            existence_age: ea,
            security_integrity: si,
            reputation_scale: rs,
            operational_maturity: om,
        },
        cap_applied,
        confidence,
        confidence_label: ConfidenceLabel::from_confidence(confidence),
        sources_queried: coverage.queried.clone(),
        sources_responded: coverage.responded.clone(),
        sources_skipped: coverage.skipped.clone(),
        collection_errors: coverage.errors.clone(),
        collection_time_ms: coverage.elapsed_ms,
        is_registered: false,
        is_verified: score >= VERIFIED_THRESHOLD,
        data_freshness: Freshness::Live,
        computed_at: Utc::now(),
        engine_version: ENGINE_VERSION.to_string(),
        error: None,
    }
}
