//! Target identity parsing
//!
//! Any raw identifier (domain, URL, email, blockchain address, social
//! handle, free-text name) is classified and resolved to a best-effort
//! canonical domain and display name.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::LazyLock;
use thiserror::Error;

static DOMAIN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z0-9-]{2,63}$").unwrap()
});

static ADDRESS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^0x[a-fA-F0-9]{40}$").unwrap()
});

static SLUG_STRIP_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]").unwrap());

/// Errors from target parsing
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("Empty target")]
    Empty,
}

/// Classification of a raw target string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Domain,
    Url,
    Email,
    BlockchainAddress,
    SocialHandle,
    Name,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Domain => "domain",
            Self::Url => "url",
            Self::Email => "email",
            Self::BlockchainAddress => "blockchain_address",
            Self::SocialHandle => "social_handle",
            Self::Name => "name",
        }
    }
}

/// A parsed, immutable view of what is being scored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetIdentity {
    /// Input as supplied, trimmed
    pub raw: String,
    pub kind: TargetKind,
    /// Canonical domain, lowercase, without `www.`, port or path
    pub domain: Option<String>,
    /// True when the domain was inferred from a bare name
    pub domain_guessed: bool,
    /// Human readable name used for knowledge-graph and social lookups
    pub display_name: String,
}

impl TargetIdentity {
    /// Classify a raw input string.
    ///
    /// Order matters: URL, email, domain, blockchain address, social
    /// handle, and finally free-text name.
    pub fn parse(input: &str) -> Result<Self, TargetError> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(TargetError::Empty);
        }
        let lower = raw.to_lowercase();

        if lower.starts_with("http://") || lower.starts_with("https://") {
            let domain = host_of(&lower).filter(|d| DOMAIN_REGEX.is_match(d));
            let display_name = domain
                .as_deref()
                .map(name_from_domain)
                .unwrap_or_else(|| raw.to_string());
            return Ok(Self {
                raw: raw.to_string(),
                kind: TargetKind::Url,
                domain,
                domain_guessed: false,
                display_name,
            });
        }

        if let Some((_, host)) = lower.rsplit_once('@') {
            if host.contains('.') && !lower.starts_with('@') {
                let domain = Some(strip_www(host).to_string()).filter(|d| DOMAIN_REGEX.is_match(d));
                let display_name = domain
                    .as_deref()
                    .map(name_from_domain)
                    .unwrap_or_else(|| raw.to_string());
                return Ok(Self {
                    raw: raw.to_string(),
                    kind: TargetKind::Email,
                    domain,
                    domain_guessed: false,
                    display_name,
                });
            }
        }

        if lower.contains('.') && !lower.contains(' ') && !lower.starts_with("0x") {
            let candidate = host_of(&lower).unwrap_or_default();
            if DOMAIN_REGEX.is_match(&candidate) {
                return Ok(Self {
                    raw: raw.to_string(),
                    kind: TargetKind::Domain,
                    display_name: name_from_domain(&candidate),
                    domain: Some(candidate),
                    domain_guessed: false,
                });
            }
        }

        if ADDRESS_REGEX.is_match(raw) {
            return Ok(Self {
                raw: raw.to_string(),
                kind: TargetKind::BlockchainAddress,
                domain: None,
                domain_guessed: false,
                display_name: lower,
            });
        }

        if let Some(handle) = raw.strip_prefix('@') {
            return Ok(Self {
                raw: raw.to_string(),
                kind: TargetKind::SocialHandle,
                domain: None,
                domain_guessed: false,
                display_name: handle.to_string(),
            });
        }

        let slug = slug(&lower);
        let domain = (slug.len() > 2).then(|| format!("{}.com", slug));
        Ok(Self {
            raw: raw.to_string(),
            kind: TargetKind::Name,
            domain_guessed: domain.is_some(),
            domain,
            display_name: title_case(raw),
        })
    }

    /// Stable identifier for entities not known to the registry
    pub fn open_entity_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.raw.to_lowercase().as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        format!("open:{}", &digest[..16])
    }

    /// Short alphanumeric slug used for profile URLs
    pub fn slug(&self) -> String {
        match &self.domain {
            Some(domain) if !self.domain_guessed => {
                domain.split('.').next().unwrap_or(domain).to_string()
            }
            _ => slug(&self.display_name.to_lowercase()),
        }
    }
}

fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

/// Extract the host part of a URL-ish string, dropping scheme, userinfo,
/// port, path, query and fragment.
fn host_of(input: &str) -> Option<String> {
    let rest = input
        .strip_prefix("https://")
        .or_else(|| input.strip_prefix("http://"))
        .unwrap_or(input);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = authority.rsplit('@').next().unwrap_or_default();
    let host = host.split(':').next().unwrap_or_default().trim_end_matches('.');
    let host = strip_www(host);
    (!host.is_empty()).then(|| host.to_string())
}

fn name_from_domain(domain: &str) -> String {
    let label = domain.split('.').next().unwrap_or(domain);
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn title_case(input: &str) -> String {
    input
        .split_whitespace()
        .map(|word| {
            let lower = word.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn slug(input: &str) -> String {
    SLUG_STRIP_REGEX.replace_all(input, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_domain() {
        let t = TargetIdentity::parse("  WWW.Example.com ").unwrap();
        assert_eq!(t.kind, TargetKind::Domain);
        assert_eq!(t.domain.as_deref(), Some("example.com"));
        assert_eq!(t.display_name, "Example");
        assert!(!t.domain_guessed);
    }

    #[test]
    fn test_parse_url() {
        let t = TargetIdentity::parse("https://www.stripe.com:443/docs?x=1").unwrap();
        assert_eq!(t.kind, TargetKind::Url);
        assert_eq!(t.domain.as_deref(), Some("stripe.com"));
        assert_eq!(t.display_name, "Stripe");
    }

    #[test]
    fn test_parse_email() {
        let t = TargetIdentity::parse("billing@acme.io").unwrap();
        assert_eq!(t.kind, TargetKind::Email);
        assert_eq!(t.domain.as_deref(), Some("acme.io"));
    }

    #[test]
    fn test_parse_blockchain_address() {
        let t = TargetIdentity::parse("0x52908400098527886E0F7030069857D2E4169EE7").unwrap();
        assert_eq!(t.kind, TargetKind::BlockchainAddress);
        assert!(t.domain.is_none());
    }

    #[test]
    fn test_parse_social_handle() {
        let t = TargetIdentity::parse("@rustlang").unwrap();
        assert_eq!(t.kind, TargetKind::SocialHandle);
        assert_eq!(t.display_name, "rustlang");
        assert_eq!(t.slug(), "rustlang");
    }

    #[test]
    fn test_parse_name_guesses_domain() {
        let t = TargetIdentity::parse("acme corp").unwrap();
        assert_eq!(t.kind, TargetKind::Name);
        assert_eq!(t.display_name, "Acme Corp");
        assert_eq!(t.domain.as_deref(), Some("acmecorp.com"));
        assert!(t.domain_guessed);

        let short = TargetIdentity::parse("ab").unwrap();
        assert!(short.domain.is_none());
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(TargetIdentity::parse("   "), Err(TargetError::Empty));
    }

    #[test]
    fn test_open_entity_id_is_case_insensitive() {
        let a = TargetIdentity::parse("Example.com").unwrap();
        let b = TargetIdentity::parse("example.com").unwrap();
        assert_eq!(a.open_entity_id(), b.open_entity_id());
        assert!(a.open_entity_id().starts_with("open:"));
        assert_eq!(a.open_entity_id().len(), "open:".len() + 16);
    }
}
