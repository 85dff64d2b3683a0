//! DNS lookups behind a small trait so collectors can be tested offline

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};
use trust_dns_resolver::{
    config::{ResolverConfig, ResolverOpts},
    error::{ResolveError, ResolveErrorKind},
    proto::rr::{Name, RData, RecordType},
    system_conf::read_system_conf,
    TokioAsyncResolver,
};

use crate::{NetConfig, NetError};

/// Record types the collectors care about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    A,
    Mx,
    Txt,
    Dnskey,
}

impl RecordKind {
    fn record_type(&self) -> RecordType {
        match self {
            Self::A => RecordType::A,
            Self::Mx => RecordType::MX,
            Self::Txt => RecordType::TXT,
            Self::Dnskey => RecordType::DNSKEY,
        }
    }
}

/// Minimal resolver surface used by collectors
///
/// A name that does not exist, or has no records of the requested type,
/// is an empty answer, not an error.
#[async_trait]
pub trait DnsLookup: Send + Sync {
    async fn txt(&self, name: &str) -> Result<Vec<String>, NetError>;

    async fn has_records(&self, name: &str, kind: RecordKind) -> Result<bool, NetError>;
}

/// System resolver backed by trust-dns
#[derive(Clone)]
pub struct SystemResolver {
    resolver: TokioAsyncResolver,
    timeout: Duration,
}

impl SystemResolver {
    /// Resolver from the host's configuration (`/etc/resolv.conf` or the
    /// platform equivalent), falling back to public resolvers when it is
    /// unreadable.
    pub fn new(config: &NetConfig) -> Self {
        let (resolver_config, opts) = resolver_setup(read_system_conf(), config);
        Self {
            resolver: TokioAsyncResolver::tokio(resolver_config, opts),
            timeout: Duration::from_secs(config.dns_timeout_secs),
        }
    }

    async fn lookup(
        &self,
        name: &str,
        kind: RecordKind,
    ) -> Result<Option<trust_dns_resolver::lookup::Lookup>, NetError> {
        let fqdn = Name::from_ascii(name).map_err(|e| NetError::InvalidName(format!("{}: {}", name, e)))?;
        let result = tokio::time::timeout(self.timeout, self.resolver.lookup(fqdn, kind.record_type()))
            .await
            .map_err(|_| NetError::Timeout(self.timeout.as_secs()))?;

        match result {
            Ok(lookup) => Ok(Some(lookup)),
            Err(e) if is_empty_answer(&e) => {
                debug!("No {:?} records for {}", kind, name);
                Ok(None)
            }
            Err(e) => Err(NetError::Dns(e.to_string())),
        }
    }
}

fn resolver_setup<E: std::fmt::Display>(
    system: Result<(ResolverConfig, ResolverOpts), E>,
    config: &NetConfig,
) -> (ResolverConfig, ResolverOpts) {
    let (resolver_config, mut opts) = match system {
        Ok(system) => system,
        Err(e) => {
            warn!("System resolver configuration unavailable, using defaults: {}", e);
            (ResolverConfig::default(), ResolverOpts::default())
        }
    };
    opts.timeout = Duration::from_secs(config.dns_timeout_secs);
    (resolver_config, opts)
}

fn is_empty_answer(error: &ResolveError) -> bool {
    matches!(error.kind(), ResolveErrorKind::NoRecordsFound { .. })
}

#[async_trait]
impl DnsLookup for SystemResolver {
    async fn txt(&self, name: &str) -> Result<Vec<String>, NetError> {
        let Some(lookup) = self.lookup(name, RecordKind::Txt).await? else {
            return Ok(Vec::new());
        };
        Ok(lookup
            .iter()
            .filter_map(|rdata| match rdata {
                RData::TXT(txt) => Some(
                    txt.txt_data()
                        .iter()
                        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
                        .collect::<String>(),
                ),
                _ => None,
            })
            .collect())
    }

    async fn has_records(&self, name: &str, kind: RecordKind) -> Result<bool, NetError> {
        Ok(self
            .lookup(name, kind)
            .await?
            .is_some_and(|lookup| lookup.iter().next().is_some()))
    }
}
