//! Knowledge-graph presence: Wikipedia, Wikidata, Crunchbase

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use trust_core::{KnowledgeSignals, Source, SourceSignals, TargetIdentity};
use trust_net::{url_exists, NetError};

use crate::{Collector, CollectorError, Endpoints};

pub struct KnowledgeGraphCollector {
    client: Client,
    wikipedia: String,
    wikidata: String,
    crunchbase: String,
}

impl KnowledgeGraphCollector {
    pub fn new(client: Client, endpoints: &Endpoints) -> Self {
        Self {
            client,
            wikipedia: endpoints.wikipedia.trim_end_matches('/').to_string(),
            wikidata: endpoints.wikidata.trim_end_matches('/').to_string(),
            crunchbase: endpoints.crunchbase.trim_end_matches('/').to_string(),
        }
    }

    async fn wikipedia(&self, name: &str) -> Result<bool, NetError> {
        let title = urlencoding::encode(&name.replace(' ', "_")).into_owned();
        url_exists(&self.client, &format!("{}/wiki/{}", self.wikipedia, title)).await
    }

    async fn wikidata(&self, name: &str) -> Result<bool, NetError> {
        let response = self
            .client
            .get(format!("{}/w/api.php", self.wikidata))
            .query(&[
                ("action", "wbsearchentities"),
                ("search", name),
                ("language", "en"),
                ("format", "json"),
                ("limit", "1"),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(NetError::Status(response.status().as_u16()));
        }
        let body: Value = response.json().await?;
        Ok(body["search"].as_array().is_some_and(|hits| !hits.is_empty()))
    }

    async fn crunchbase(&self, slug: &str) -> Result<bool, NetError> {
        url_exists(&self.client, &format!("{}/organization/{}", self.crunchbase, slug)).await
    }
}

#[async_trait]
impl Collector for KnowledgeGraphCollector {
    fn sensor_id(&self) -> &str {
        Source::KnowledgeGraph.sensor_id()
    }

    async fn collect(&self, target: &TargetIdentity) -> Result<SourceSignals, CollectorError> {
        let name = target.display_name.as_str();
        let slug = target.slug();
        let (wikipedia, wikidata, crunchbase) =
            tokio::join!(self.wikipedia(name), self.wikidata(name), self.crunchbase(&slug));

        if let (Err(e), Err(_), Err(_)) = (&wikipedia, &wikidata, &crunchbase) {
            return Err(CollectorError::Network(e.to_string()));
        }

        let signals = KnowledgeSignals {
            has_wikipedia: wikipedia.unwrap_or(false),
            has_wikidata: wikidata.unwrap_or(false),
            has_crunchbase: crunchbase.unwrap_or(false),
        };
        debug!("Knowledge graph for {}: {:?}", name, signals);
        Ok(SourceSignals::Knowledge(signals))
    }
}
