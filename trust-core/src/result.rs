//! Trust score result types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{TargetIdentity, TargetKind, ENGINE_VERSION, VERIFIED_THRESHOLD};

/// Letter grade, top tier first
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    AAA,
    AA,
    A,
    BBB,
    BB,
    B,
    CCC,
    D,
}

impl Grade {
    pub fn from_score(score: u32) -> Self {
        match score {
            850.. => Self::AAA,
            750.. => Self::AA,
            650.. => Self::A,
            550.. => Self::BBB,
            450.. => Self::BB,
            350.. => Self::B,
            200.. => Self::CCC,
            _ => Self::D,
        }
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    Proceed,
    ProceedWithCaution,
    ManualReview,
    EnhancedDueDiligence,
    Reject,
}

impl Recommendation {
    pub fn from_score(score: u32) -> Self {
        match score {
            650.. => Self::Proceed,
            450.. => Self::ProceedWithCaution,
            350.. => Self::ManualReview,
            200.. => Self::EnhancedDueDiligence,
            _ => Self::Reject,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proceed => "PROCEED",
            Self::ProceedWithCaution => "PROCEED_WITH_CAUTION",
            Self::ManualReview => "MANUAL_REVIEW",
            Self::EnhancedDueDiligence => "ENHANCED_DUE_DILIGENCE",
            Self::Reject => "REJECT",
        }
    }
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLabel {
    High,
    Moderate,
    Low,
}

impl ConfidenceLabel {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.8 {
            Self::High
        } else if confidence >= 0.5 {
            Self::Moderate
        } else {
            Self::Low
        }
    }
}

/// Disqualifying conditions that override the category total
///
/// Declaration order is the tie-break priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HardCap {
    Sanctioned,
    FraudBlocklisted,
    GoogleSafeBrowsingFlagged,
    VirustotalHighFlags,
    NewDomainNoReputation,
}

impl HardCap {
    pub const ALL: [HardCap; 5] = [
        HardCap::Sanctioned,
        HardCap::FraudBlocklisted,
        HardCap::GoogleSafeBrowsingFlagged,
        HardCap::VirustotalHighFlags,
        HardCap::NewDomainNoReputation,
    ];

    /// Maximum final score while this condition holds
    pub fn ceiling(&self) -> u32 {
        match self {
            Self::Sanctioned => 0,
            Self::FraudBlocklisted => 50,
            Self::GoogleSafeBrowsingFlagged => 150,
            Self::VirustotalHighFlags => 200,
            Self::NewDomainNoReputation => 100,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::Sanctioned => "SANCTIONED",
            Self::FraudBlocklisted => "FRAUD_BLOCKLISTED",
            Self::GoogleSafeBrowsingFlagged => "GOOGLE_SAFE_BROWSING_FLAGGED",
            Self::VirustotalHighFlags => "VIRUSTOTAL_HIGH_FLAGS",
            Self::NewDomainNoReputation => "NEW_DOMAIN_NO_REPUTATION",
        }
    }
}

impl std::fmt::Display for HardCap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}

/// Capped sub-score per category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryScores {
    pub existence_age: u32,
    pub security_integrity: u32,
    pub reputation_scale: u32,
    pub operational_maturity: u32,
}

impl CategoryScores {
    pub fn total(&self) -> u32 {
        self.existence_age + self.security_integrity + self.reputation_scale + self.operational_maturity
    }
}

/// Points contributed by each signal, per category, before clamping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakdown {
    pub existence_age: BTreeMap<String, i32>,
    pub security_integrity: BTreeMap<String, i32>,
    pub reputation_scale: BTreeMap<String, i32>,
    pub operational_maturity: BTreeMap<String, i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Live,
    Cached,
    Failed,
}

/// First-party data supplied by the entity registry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegisteredEntity {
    pub entity_id: String,
    pub name: String,
    pub domain: Option<String>,
    pub is_verified: bool,
    pub has_active_subscription: bool,
    pub visibility_score: Option<f64>,
}

/// Complete scoring outcome for one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustScoreResult {
    pub entity_id: String,
    pub entity_name: String,
    pub entity_type: TargetKind,
    pub target: String,
    pub domain: Option<String>,
    /// Final score after any hard cap
    pub score: u32,
    /// Sum of capped categories before overrides
    pub raw_score: u32,
    pub grade: Grade,
    pub recommendation: Recommendation,
    pub categories: CategoryScores,
    pub breakdown: Breakdown,
    pub cap_applied: Option<HardCap>,
    pub confidence: f64,
    pub confidence_label: ConfidenceLabel,
    pub sources_queried: Vec<String>,
    pub sources_responded: Vec<String>,
    pub sources_skipped: Vec<String>,
    pub collection_errors: BTreeMap<String, String>,
    pub collection_time_ms: u64,
    pub is_registered: bool,
    pub is_verified: bool,
    pub data_freshness: Freshness,
    pub computed_at: DateTime<Utc>,
    pub engine_version: String,
    pub error: Option<String>,
}

/// Free-tier projection without breakdown or source detail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorePreview {
    pub entity_id: String,
    pub entity_name: String,
    pub score: u32,
    pub grade: Grade,
    pub recommendation: Recommendation,
    pub confidence: f64,
    pub confidence_label: ConfidenceLabel,
    pub is_verified: bool,
    pub computed_at: DateTime<Utc>,
}

impl TrustScoreResult {
    /// Zero-score envelope returned when the pipeline itself failed
    pub fn degraded(target: &str, error: impl Into<String>) -> Self {
        let (entity_id, entity_type, entity_name, domain) = match TargetIdentity::parse(target) {
            Ok(identity) => (
                identity.open_entity_id(),
                identity.kind,
                identity.display_name.clone(),
                identity.domain.clone(),
            ),
            Err(_) => ("open:unknown".to_string(), TargetKind::Name, target.to_string(), None),
        };
        Self {
            entity_id,
            entity_name,
            entity_type,
            target: target.to_string(),
            domain,
            score: 0,
            raw_score: 0,
            grade: Grade::D,
            recommendation: Recommendation::Reject,
            categories: CategoryScores::default(),
            breakdown: Breakdown::default(),
            cap_applied: None,
            confidence: 0.0,
            confidence_label: ConfidenceLabel::Low,
            sources_queried: Vec::new(),
            sources_responded: Vec::new(),
            sources_skipped: Vec::new(),
            collection_errors: BTreeMap::new(),
            collection_time_ms: 0,
            is_registered: false,
            is_verified: false,
            data_freshness: Freshness::Failed,
            computed_at: Utc::now(),
            engine_version: ENGINE_VERSION.to_string(),
            error: Some(error.into()),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.data_freshness == Freshness::Failed
    }

    pub fn preview(&self) -> ScorePreview {
        ScorePreview {
            entity_id: self.entity_id.clone(),
            entity_name: self.entity_name.clone(),
            score: self.score,
            grade: self.grade,
            recommendation: self.recommendation,
            confidence: (self.confidence * 100.0).round() / 100.0,
            confidence_label: self.confidence_label,
            is_verified: self.is_verified,
            computed_at: self.computed_at,
        }
    }

    /// Attach first-party registry data
    pub fn apply_registration(&mut self, registered: &RegisteredEntity) {
        self.entity_id = registered.entity_id.clone();
        self.entity_name = registered.name.clone();
        self.is_registered = true;
        self.is_verified = registered.is_verified || self.score >= VERIFIED_THRESHOLD;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grade_bands() {
        assert_eq!(Grade::from_score(1000), Grade::AAA);
        assert_eq!(Grade::from_score(850), Grade::AAA);
        assert_eq!(Grade::from_score(849), Grade::AA);
        assert_eq!(Grade::from_score(650), Grade::A);
        assert_eq!(Grade::from_score(550), Grade::BBB);
        assert_eq!(Grade::from_score(450), Grade::BB);
        assert_eq!(Grade::from_score(350), Grade::B);
        assert_eq!(Grade::from_score(200), Grade::CCC);
        assert_eq!(Grade::from_score(199), Grade::D);
        assert_eq!(Grade::from_score(0), Grade::D);
    }

    #[test]
    fn test_recommendation_bands() {
        assert_eq!(Recommendation::from_score(650), Recommendation::Proceed);
        assert_eq!(Recommendation::from_score(649), Recommendation::ProceedWithCaution);
        assert_eq!(Recommendation::from_score(350), Recommendation::ManualReview);
        assert_eq!(Recommendation::from_score(200), Recommendation::EnhancedDueDiligence);
        assert_eq!(Recommendation::from_score(50), Recommendation::Reject);
    }

    #[test]
    fn test_hard_cap_serializes_as_reason() {
        let json = serde_json::to_string(&HardCap::FraudBlocklisted).unwrap();
        assert_eq!(json, "\"FRAUD_BLOCKLISTED\"");
        assert_eq!(HardCap::NewDomainNoReputation.to_string(), "NEW_DOMAIN_NO_REPUTATION");
    }

    #[test]
    fn test_degraded_result() {
        let result = TrustScoreResult::degraded("example.com", "boom");
        assert_eq!(result.score, 0);
        assert_eq!(result.grade, Grade::D);
        assert_eq!(result.recommendation, Recommendation::Reject);
        assert_eq!(result.data_freshness, Freshness::Failed);
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert!(result.entity_id.starts_with("open:"));
    }

    #[test]
    fn test_confidence_label() {
        assert_eq!(ConfidenceLabel::from_confidence(1.0), ConfidenceLabel::High);
        assert_eq!(ConfidenceLabel::from_confidence(0.5), ConfidenceLabel::Moderate);
        assert_eq!(ConfidenceLabel::from_confidence(0.2), ConfidenceLabel::Low);
    }
}
