use std::collections::HashSet;
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use env_detect::EnvironmentType;
use safety_policy::KubernetesDiscovery;

use crate::discovery::DiscoveryBackend;

/// Path mounted into every pod by the kubelet.
const SERVICE_ACCOUNT_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Kubernetes protected-service backend.
///
/// Contributes the configured cluster-system service names, but only when
/// the gate itself runs inside a cluster (serviceaccount mount or the
/// `KUBERNETES_SERVICE_HOST` variable the apiserver injects).  Outside a
/// cluster those names are not in scope and the backend contributes nothing.
pub struct KubernetesBackend {
    protected_services: HashSet<String>,
}

impl KubernetesBackend {
    pub fn new(config: &KubernetesDiscovery) -> Self {
        Self {
            protected_services: config.protected_services.iter().cloned().collect(),
        }
    }

    fn in_cluster() -> bool {
        Path::new(SERVICE_ACCOUNT_PATH).exists()
            || std::env::var_os("KUBERNETES_SERVICE_HOST").is_some()
    }
}

#[async_trait]
impl DiscoveryBackend for KubernetesBackend {
    fn name(&self) -> &str {
        "kubernetes"
    }

    async fn list_protected_service_names(
        &self,
        _environment: EnvironmentType,
    ) -> Result<HashSet<String>> {
        if !Self::in_cluster() {
            debug!("not running inside a Kubernetes cluster; no protected services");
            return Ok(HashSet::new());
        }

        debug!(
            count = self.protected_services.len(),
            "kubernetes protected services"
        );
        Ok(self.protected_services.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> KubernetesDiscovery {
        serde_yml::from_str("enabled: true").unwrap()
    }

    #[test]
    fn default_protected_set_covers_cluster_system_services() {
        let backend = KubernetesBackend::new(&config());
        assert!(backend.protected_services.contains("kube-dns"));
        assert!(backend.protected_services.contains("monitoring-prometheus"));
    }

    #[tokio::test]
    async fn outside_a_cluster_nothing_is_contributed() {
        // CI and dev machines are not Kubernetes pods.
        std::env::remove_var("KUBERNETES_SERVICE_HOST");
        if KubernetesBackend::in_cluster() {
            return; // running inside a real cluster, skip
        }
        let backend = KubernetesBackend::new(&config());
        let names = backend
            .list_protected_service_names(EnvironmentType::Test)
            .await
            .unwrap();
        assert!(names.is_empty());
    }
}
