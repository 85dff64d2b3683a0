//! TrustMesh Collectors
//!
//! Independent evidence sources, one per [`trust_core::Source`]:
//! - **Tranco**: popularity rank from a locally loaded list
//! - **crt.sh**: certificate transparency history
//! - **Reputation**: malware vendors, Safe Browsing, abuse feeds, blocklists
//! - **DNS**: SPF, DMARC, DKIM, MX and DNSSEC
//! - **HTTP headers**: security headers, security.txt, robots.txt
//! - **WHOIS**: registration age and expiry over RDAP
//! - **Knowledge graph**: Wikipedia, Wikidata, Crunchbase
//! - **Web presence**: structured data, docs, changelog, status page
//! - **Social**: profile presence across six networks
//!
//! Each collector sits behind a [`CircuitBreaker`] owned by the caller.

pub mod traits;
pub mod breaker;
pub mod rank;
pub mod certificates;
pub mod reputation;
pub mod dns;
pub mod http;
pub mod registration;
pub mod knowledge;
pub mod web;
pub mod social;
pub mod builtin;

pub use traits::*;
pub use breaker::*;
pub use rank::*;
pub use certificates::*;
pub use reputation::*;
pub use dns::*;
pub use http::*;
pub use registration::*;
pub use knowledge::*;
pub use web::*;
pub use social::*;
pub use builtin::*;
