//! First-party entity registry lookups

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use trust_core::{RegisteredEntity, TargetIdentity};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Registry unavailable: {0}")]
    Unavailable(String),
}

/// Source of enriched data for entities that registered themselves
#[async_trait]
pub trait EntityRegistry: Send + Sync {
    /// First-party record for a target, if the entity is registered
    async fn lookup_registered(&self, target: &TargetIdentity) -> Result<Option<RegisteredEntity>, RegistryError>;
}

/// Registry held in memory, keyed by domain and by lowercase name
#[derive(Default)]
pub struct MemoryRegistry {
    by_key: DashMap<String, RegisteredEntity>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, entity: RegisteredEntity) {
        if let Some(domain) = &entity.domain {
            self.by_key.insert(domain.to_lowercase(), entity.clone());
        }
        self.by_key.insert(entity.name.to_lowercase(), entity);
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

#[async_trait]
impl EntityRegistry for MemoryRegistry {
    async fn lookup_registered(&self, target: &TargetIdentity) -> Result<Option<RegisteredEntity>, RegistryError> {
        let by_domain = target
            .domain
            .as_deref()
            .filter(|_| !target.domain_guessed)
            .and_then(|d| self.by_key.get(d).map(|e| e.clone()));
        Ok(by_domain.or_else(|| {
            self.by_key
                .get(&target.display_name.to_lowercase())
                .map(|e| e.clone())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acme() -> RegisteredEntity {
        RegisteredEntity {
            entity_id: "ent_acme".into(),
            name: "Acme".into(),
            domain: Some("acme.io".into()),
            is_verified: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_lookup_by_domain_and_name() {
        let registry = MemoryRegistry::new();
        registry.register(acme());

        let by_domain = TargetIdentity::parse("https://www.acme.io/pricing").unwrap();
        assert_eq!(registry.lookup_registered(&by_domain).await.unwrap().unwrap().entity_id, "ent_acme");

        let by_name = TargetIdentity::parse("ACME").unwrap();
        assert!(registry.lookup_registered(&by_name).await.unwrap().is_some());

        let stranger = TargetIdentity::parse("other.io").unwrap();
        assert!(registry.lookup_registered(&stranger).await.unwrap().is_none());
    }
}
