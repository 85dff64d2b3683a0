//! Social profile presence, probed by slug

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use tracing::debug;

use trust_core::{SocialSignals, Source, SourceSignals, TargetIdentity};
use trust_net::url_exists;

use crate::{fill_template, Collector, CollectorError, SocialProfiles};

pub struct SocialCollector {
    client: Client,
    profiles: SocialProfiles,
}

impl SocialCollector {
    pub fn new(client: Client, profiles: SocialProfiles) -> Self {
        Self { client, profiles }
    }
}

#[async_trait]
impl Collector for SocialCollector {
    fn sensor_id(&self) -> &str {
        Source::Social.sensor_id()
    }

    fn applies_to(&self, target: &TargetIdentity) -> bool {
        !target.slug().is_empty()
    }

    async fn collect(&self, target: &TargetIdentity) -> Result<SourceSignals, CollectorError> {
        let p = &self.profiles;
        let templates = [&p.twitter, &p.linkedin, &p.github, &p.facebook, &p.youtube, &p.instagram];
        let probes = templates.iter().map(|template| {
            let url = fill_template(template, target);
            async move { url_exists(&self.client, &url).await }
        });
        let results = join_all(probes).await;

        if results.iter().all(|r| r.is_err()) {
            let reason = results
                .into_iter()
                .find_map(|r| r.err())
                .map(|e| e.to_string())
                .unwrap_or_default();
            return Err(CollectorError::Network(reason));
        }

        let found: Vec<bool> = results.into_iter().map(|r| r.unwrap_or(false)).collect();
        let signals = SocialSignals {
            social_twitter: found[0],
            social_linkedin: found[1],
            social_github: found[2],
            social_facebook: found[3],
            social_youtube: found[4],
            social_instagram: found[5],
            social_count: found.iter().filter(|f| **f).count() as u32,
        };
        debug!("Social presence for {}: {} profiles", target.display_name, signals.social_count);
        Ok(SourceSignals::Social(signals))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn profiles(base: &str) -> SocialProfiles {
        SocialProfiles {
            twitter: format!("{}/x/{{slug}}", base),
            linkedin: format!("{}/linkedin/{{slug}}", base),
            github: format!("{}/github/{{slug}}", base),
            facebook: format!("{}/facebook/{{slug}}", base),
            youtube: format!("{}/youtube/@{{slug}}", base),
            instagram: format!("{}/instagram/{{slug}}", base),
        }
    }

    #[tokio::test]
    async fn test_counts_found_profiles() {
        let server = MockServer::start().await;
        for found in ["/x/rustlang", "/github/rustlang"] {
            Mock::given(method("HEAD"))
                .and(path(found))
                .respond_with(ResponseTemplate::new(200))
                .mount(&server)
                .await;
        }

        let collector = SocialCollector::new(Client::new(), profiles(&server.uri()));
        let target = TargetIdentity::parse("@rustlang").unwrap();
        assert!(collector.applies_to(&target));
        let SourceSignals::Social(signals) = collector.collect(&target).await.unwrap() else {
            panic!("wrong slot");
        };
        assert!(signals.social_twitter);
        assert!(signals.social_github);
        assert!(!signals.social_linkedin);
        assert_eq!(signals.social_count, 2);
    }

    #[tokio::test]
    async fn test_every_profile_lookup_failing_is_an_error() {
        let collector = SocialCollector::new(Client::new(), profiles("http://127.0.0.1:1"));
        let target = TargetIdentity::parse("@rustlang").unwrap();
        assert!(collector.collect(&target).await.is_err());
    }
}
