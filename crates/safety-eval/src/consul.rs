use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use async_trait::async_trait;
use tracing::debug;

use env_detect::EnvironmentType;
use safety_policy::ConsulDiscovery;

use crate::discovery::DiscoveryBackend;

/// Consul protected-service backend.
///
/// Queries the Consul catalog and protects every service carrying one of the
/// configured protected tags.
pub struct ConsulBackend {
    client: reqwest::Client,
    url: String,
    protected_tags: HashSet<String>,
}

impl ConsulBackend {
    pub fn new(config: &ConsulDiscovery) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("failed to build Consul HTTP client")?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            protected_tags: config.protected_service_tags.iter().cloned().collect(),
        })
    }
}

#[async_trait]
impl DiscoveryBackend for ConsulBackend {
    fn name(&self) -> &str {
        "consul"
    }

    async fn list_protected_service_names(
        &self,
        _environment: EnvironmentType,
    ) -> Result<HashSet<String>> {
        let url = format!("{}/v1/catalog/services", self.url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Consul catalog query failed: {url}"))?;
        ensure!(
            response.status().is_success(),
            "Consul catalog query returned {}",
            response.status()
        );

        // The catalog endpoint maps service name -> tag list.
        let services: HashMap<String, Vec<String>> = response
            .json()
            .await
            .context("failed to decode Consul catalog response")?;

        let protected: HashSet<String> = services
            .into_iter()
            .filter(|(_, tags)| tags.iter().any(|t| self.protected_tags.contains(t)))
            .map(|(name, _)| name)
            .collect();

        debug!(count = protected.len(), "consul protected services");
        Ok(protected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_in_url_is_normalized() {
        let config: ConsulDiscovery = serde_yml::from_str(
            r#"
enabled: true
url: "http://consul.internal:8500/"
protected_service_tags: ["critical"]
"#,
        )
        .unwrap();
        let backend = ConsulBackend::new(&config).unwrap();
        assert_eq!(backend.url, "http://consul.internal:8500");
        assert!(backend.protected_tags.contains("critical"));
    }

    #[tokio::test]
    async fn unreachable_consul_is_an_error_not_a_panic() {
        let config: ConsulDiscovery = serde_yml::from_str(
            r#"
enabled: true
url: "http://127.0.0.1:1"
timeout_seconds: 1
"#,
        )
        .unwrap();
        let backend = ConsulBackend::new(&config).unwrap();
        let err = backend
            .list_protected_service_names(EnvironmentType::Test)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Consul catalog query failed"));
    }
}
