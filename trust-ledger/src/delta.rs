//! Change detection between consecutive observations of one sensor

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Warning,
}

impl Severity {
    /// Severities that raise a trust alert
    pub fn is_alert(&self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaEntry {
    pub was: Value,
    pub now: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Changed keys with old and new values
pub type Delta = BTreeMap<String, DeltaEntry>;

/// Keys whose loss is a critical regression
const CRITICAL_WHEN_LOST: &[&str] = &["dns_has_spf", "dns_has_dmarc", "ssl_valid"];

/// Keys whose appearance is a critical regression
const CRITICAL_WHEN_GAINED: &[&str] = &["on_sanctions_list", "on_fraud_blocklist", "gsb_flagged"];

/// Compare a sensor's new payload with its previous one.
///
/// The first observation of a sensor has no delta.
pub fn compute_delta(previous: Option<&Map<String, Value>>, current: &Map<String, Value>) -> Delta {
    let mut delta = Delta::new();
    let Some(previous) = previous else {
        return delta;
    };

    let mut keys: Vec<&String> = previous.keys().chain(current.keys()).collect();
    keys.sort();
    keys.dedup();

    for key in keys {
        let was = previous.get(key).cloned().unwrap_or(Value::Null);
        let now = current.get(key).cloned().unwrap_or(Value::Null);
        if was == now {
            continue;
        }
        let (severity, note) = classify(key, &was, &now);
        delta.insert(key.clone(), DeltaEntry { was, now, severity, note });
    }
    delta
}

fn classify(key: &str, was: &Value, now: &Value) -> (Option<Severity>, Option<String>) {
    if CRITICAL_WHEN_LOST.contains(&key) && was == &Value::Bool(true) && now != &Value::Bool(true) {
        return (Some(Severity::Critical), Some(format!("{} no longer present", key)));
    }
    if CRITICAL_WHEN_GAINED.contains(&key) && now == &Value::Bool(true) {
        return (Some(Severity::Critical), Some(format!("{} now set", key)));
    }
    if key == "vt_malicious_count" {
        let before = was.as_u64().unwrap_or(0);
        let after = now.as_u64().unwrap_or(0);
        if after > before {
            return (
                Some(Severity::High),
                Some(format!("Malicious detections rose from {} to {}", before, after)),
            );
        }
    }
    if key == "tranco_rank" {
        let before = was.as_u64().unwrap_or(0);
        let after = now.as_u64().unwrap_or(0);
        if before > 0 && after == 0 {
            return (Some(Severity::Warning), Some("Dropped out of Tranco Top 1M".to_string()));
        }
    }
    (None, None)
}

/// Highest severity present in a delta, if any
pub fn max_severity(delta: &Delta) -> Option<Severity> {
    delta.values().filter_map(|e| e.severity).min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_first_observation_has_no_delta() {
        let current = map(json!({"dns_has_spf": true}));
        assert!(compute_delta(None, &current).is_empty());
    }

    #[test]
    fn test_unchanged_payload_has_no_delta() {
        let payload = map(json!({"dns_has_spf": true, "dns_has_mx": false}));
        assert!(compute_delta(Some(&payload), &payload).is_empty());
    }

    #[test]
    fn test_lost_spf_is_critical() {
        let previous = map(json!({"dns_has_spf": true, "dns_has_mx": true}));
        let current = map(json!({"dns_has_spf": false, "dns_has_mx": true}));
        let delta = compute_delta(Some(&previous), &current);
        assert_eq!(delta.len(), 1);
        let entry = &delta["dns_has_spf"];
        assert_eq!(entry.severity, Some(Severity::Critical));
        assert_eq!(entry.was, json!(true));
        assert_eq!(entry.now, json!(false));
    }

    #[test]
    fn test_malware_increase_is_high() {
        let previous = map(json!({"vt_malicious_count": 0}));
        let current = map(json!({"vt_malicious_count": 3}));
        let delta = compute_delta(Some(&previous), &current);
        assert_eq!(delta["vt_malicious_count"].severity, Some(Severity::High));

        let decrease = compute_delta(Some(&current), &previous);
        assert_eq!(decrease["vt_malicious_count"].severity, None);
    }

    #[test]
    fn test_rank_drop_is_warning() {
        let previous = map(json!({"tranco_rank": 5000}));
        let current = map(json!({"tranco_rank": null}));
        let delta = compute_delta(Some(&previous), &current);
        assert_eq!(delta["tranco_rank"].severity, Some(Severity::Warning));
        assert_eq!(max_severity(&delta), Some(Severity::Warning));
    }

    #[test]
    fn test_removed_key_recorded() {
        let previous = map(json!({"extra": 1, "kept": 2}));
        let current = map(json!({"kept": 2}));
        let delta = compute_delta(Some(&previous), &current);
        assert_eq!(delta["extra"].now, Value::Null);
    }
}
