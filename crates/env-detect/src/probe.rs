use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::context::CloudInfo;

/// A single cloud-metadata probe.
///
/// Implementations must be cheap to construct and safe to abandon mid-flight:
/// the detector races every configured probe and aborts the losers.  A probe
/// that fails or times out simply contributes no evidence; it is never a
/// fatal error.
#[async_trait]
pub trait CloudProbe: Send + Sync {
    /// Provider name reported in [`CloudInfo::provider`].
    fn provider(&self) -> &str;

    /// Query the provider's metadata service.
    async fn probe(&self) -> Result<CloudInfo>;
}

/// Per-provider probe settings from the safety config.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// Base URL of the provider's metadata service, trailing slash included.
    pub metadata_url: String,
    /// HTTP timeout for individual metadata requests.
    #[serde(default = "default_probe_timeout")]
    pub timeout_seconds: u64,
}

fn default_probe_timeout() -> u64 {
    2
}

/// Race all probes concurrently; the first successful result wins.
///
/// The whole race is bounded by `overall_timeout` so detection latency does
/// not scale with the number of supported providers.  Once a winner arrives
/// (or the deadline passes) the remaining in-flight probes are aborted --
/// best-effort cleanup, not correctness-critical.
pub async fn probe_any(
    probes: Vec<Arc<dyn CloudProbe>>,
    overall_timeout: Duration,
) -> Option<CloudInfo> {
    if probes.is_empty() {
        return None;
    }

    let mut set = JoinSet::new();
    for probe in probes {
        set.spawn(async move {
            let provider = probe.provider().to_string();
            match probe.probe().await {
                Ok(info) => {
                    debug!(provider, "cloud probe succeeded");
                    Some(info)
                }
                Err(err) => {
                    debug!(provider, %err, "cloud probe failed");
                    None
                }
            }
        });
    }

    let winner = tokio::time::timeout(overall_timeout, async {
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Some(info)) => return Some(info),
                Ok(None) => {}
                Err(err) => debug!(%err, "cloud probe task panicked or was cancelled"),
            }
        }
        None
    })
    .await;

    set.abort_all();

    match winner {
        Ok(result) => result,
        Err(_) => {
            debug!(timeout = ?overall_timeout, "cloud probing timed out");
            None
        }
    }
}

/// Build the HTTP probes for every configured provider.
///
/// Unrecognised provider keys are skipped with a warning so one typo in the
/// config cannot take the gate down.
pub fn build_probes(providers: &HashMap<String, ProbeConfig>) -> Vec<Arc<dyn CloudProbe>> {
    let mut probes: Vec<Arc<dyn CloudProbe>> = Vec::new();

    for (name, cfg) in providers {
        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .build()
        {
            Ok(client) => client,
            Err(err) => {
                warn!(provider = %name, %err, "failed to build probe HTTP client; skipping");
                continue;
            }
        };

        match name.as_str() {
            "aws" => probes.push(Arc::new(AwsProbe {
                client,
                metadata_url: cfg.metadata_url.clone(),
            })),
            "gcp" => probes.push(Arc::new(GcpProbe {
                client,
                metadata_url: cfg.metadata_url.clone(),
            })),
            "azure" => probes.push(Arc::new(AzureProbe {
                client,
                metadata_url: cfg.metadata_url.clone(),
            })),
            other => warn!(provider = other, "unknown cloud provider in config; skipping"),
        }
    }

    probes
}

async fn fetch(client: &reqwest::Client, url: &str, headers: &[(&str, &str)]) -> Result<String> {
    let mut request = client.get(url);
    for (key, value) in headers {
        request = request.header(*key, *value);
    }
    let response = request.send().await?;
    ensure!(
        response.status().is_success(),
        "metadata endpoint {url} returned {}",
        response.status()
    );
    Ok(response.text().await?.trim().to_string())
}

/// AWS instance-metadata probe (IMDS).
struct AwsProbe {
    client: reqwest::Client,
    metadata_url: String,
}

#[async_trait]
impl CloudProbe for AwsProbe {
    fn provider(&self) -> &str {
        "aws"
    }

    async fn probe(&self) -> Result<CloudInfo> {
        let base = &self.metadata_url;
        let instance_id = fetch(&self.client, &format!("{base}instance-id"), &[]).await?;

        let mut info = CloudInfo::new("aws");
        info.metadata.insert("instance_id".to_string(), instance_id);

        // Everything past the instance id is best-effort.
        if let Ok(instance_type) =
            fetch(&self.client, &format!("{base}instance-type"), &[]).await
        {
            info.metadata.insert("instance_type".to_string(), instance_type);
        }

        // Instance tags require opt-in IAM permissions; absence is normal.
        if let Ok(tag_keys) = fetch(&self.client, &format!("{base}tags/instance/"), &[]).await {
            for key in tag_keys.lines().filter(|k| !k.is_empty()) {
                if let Ok(value) =
                    fetch(&self.client, &format!("{base}tags/instance/{key}"), &[]).await
                {
                    info.tags.insert(key.to_string(), value);
                }
            }
        }

        Ok(info)
    }
}

/// GCP metadata-server probe.
struct GcpProbe {
    client: reqwest::Client,
    metadata_url: String,
}

const GCP_HEADERS: &[(&str, &str)] = &[("Metadata-Flavor", "Google")];

#[async_trait]
impl CloudProbe for GcpProbe {
    fn provider(&self) -> &str {
        "gcp"
    }

    async fn probe(&self) -> Result<CloudInfo> {
        let base = &self.metadata_url;
        let instance_id = fetch(&self.client, &format!("{base}instance/id"), GCP_HEADERS).await?;

        let mut info = CloudInfo::new("gcp");
        info.metadata.insert("instance_id".to_string(), instance_id);

        if let Ok(name) = fetch(&self.client, &format!("{base}instance/name"), GCP_HEADERS).await
        {
            info.metadata.insert("instance_name".to_string(), name);
        }
        if let Ok(project) =
            fetch(&self.client, &format!("{base}project/project-id"), GCP_HEADERS).await
        {
            info.metadata.insert("project_id".to_string(), project);
        }

        Ok(info)
    }
}

/// Azure instance-metadata probe.
struct AzureProbe {
    client: reqwest::Client,
    metadata_url: String,
}

const AZURE_HEADERS: &[(&str, &str)] = &[("Metadata", "true")];
const AZURE_QUERY: &str = "api-version=2021-02-01&format=text";

#[async_trait]
impl CloudProbe for AzureProbe {
    fn provider(&self) -> &str {
        "azure"
    }

    async fn probe(&self) -> Result<CloudInfo> {
        let base = &self.metadata_url;
        let vm_id = fetch(
            &self.client,
            &format!("{base}compute/vmId?{AZURE_QUERY}"),
            AZURE_HEADERS,
        )
        .await?;

        let mut info = CloudInfo::new("azure");
        info.metadata.insert("vm_id".to_string(), vm_id);

        if let Ok(name) = fetch(
            &self.client,
            &format!("{base}compute/name?{AZURE_QUERY}"),
            AZURE_HEADERS,
        )
        .await
        {
            info.metadata.insert("vm_name".to_string(), name);
        }
        if let Ok(group) = fetch(
            &self.client,
            &format!("{base}compute/resourceGroupName?{AZURE_QUERY}"),
            AZURE_HEADERS,
        )
        .await
        {
            info.metadata.insert("resource_group".to_string(), group);
        }

        Ok(info)
    }
}
