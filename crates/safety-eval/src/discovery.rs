use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

use env_detect::EnvironmentType;
use safety_policy::SafetyPolicy;

/// A pluggable protected-service discovery backend.
///
/// Implementations must never hang indefinitely on their own, but the
/// resolver additionally bounds every call with its own timeout.  A backend
/// that errors contributes no protected names; the static list and the other
/// backends still apply.
#[async_trait]
pub trait DiscoveryBackend: Send + Sync {
    /// Backend name used in logs and degradation reporting.
    fn name(&self) -> &str;

    /// Service names this backend considers protected in `environment`.
    async fn list_protected_service_names(
        &self,
        environment: EnvironmentType,
    ) -> Result<HashSet<String>>;
}

/// Outcome of one protected-service lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedLookup {
    pub protected: bool,
    /// Backends that errored or timed out and contributed nothing.
    pub degraded_backends: Vec<String>,
}

/// Merges an environment's static protected-service set with the live
/// results of every registered discovery backend.
pub struct ProtectedServiceResolver {
    backends: Vec<Arc<dyn DiscoveryBackend>>,
    backend_timeout: Duration,
}

impl ProtectedServiceResolver {
    pub fn new(backends: Vec<Arc<dyn DiscoveryBackend>>, backend_timeout: Duration) -> Self {
        Self {
            backends,
            backend_timeout,
        }
    }

    /// A resolver with no discovery backends; only static protections apply.
    pub fn static_only() -> Self {
        Self::new(Vec::new(), Duration::from_secs(5))
    }

    /// Is `service` protected in `environment` under `policy`?
    ///
    /// A static `"*"` wildcard protects every service unconditionally and
    /// short-circuits discovery entirely.  Otherwise all backends are
    /// queried concurrently, each bounded by the resolver's timeout; a
    /// failing backend is recorded as degraded rather than aborting the
    /// check.
    pub async fn is_protected(
        &self,
        service: &str,
        environment: EnvironmentType,
        policy: &SafetyPolicy,
    ) -> ProtectedLookup {
        if policy.protected_services.contains("*") {
            debug!(service, "static wildcard protects all services; skipping discovery");
            return ProtectedLookup {
                protected: true,
                degraded_backends: Vec::new(),
            };
        }

        if policy.protected_services.contains(service) {
            debug!(service, "service is statically protected");
            return ProtectedLookup {
                protected: true,
                degraded_backends: Vec::new(),
            };
        }

        let lookups = self.backends.iter().map(|backend| {
            let backend = Arc::clone(backend);
            let timeout = self.backend_timeout;
            async move {
                let name = backend.name().to_string();
                match tokio::time::timeout(
                    timeout,
                    backend.list_protected_service_names(environment),
                )
                .await
                {
                    Ok(Ok(names)) => (name, Some(names)),
                    Ok(Err(err)) => {
                        warn!(
                            backend = %name, %err,
                            "discovery backend failed; it contributes no protections"
                        );
                        (name, None)
                    }
                    Err(_) => {
                        warn!(
                            backend = %name, ?timeout,
                            "discovery backend timed out; it contributes no protections"
                        );
                        (name, None)
                    }
                }
            }
        });

        let mut protected = false;
        let mut degraded_backends = Vec::new();
        for (name, result) in futures::future::join_all(lookups).await {
            match result {
                Some(names) => {
                    if names.contains(service) {
                        debug!(service, backend = %name, "service protected by discovery");
                        protected = true;
                    }
                }
                None => degraded_backends.push(name),
            }
        }

        ProtectedLookup {
            protected,
            degraded_backends,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedBackend {
        name: &'static str,
        names: Vec<&'static str>,
        calls: AtomicUsize,
    }

    impl FixedBackend {
        fn new(name: &'static str, names: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                name,
                names,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl DiscoveryBackend for FixedBackend {
        fn name(&self) -> &str {
            self.name
        }

        async fn list_protected_service_names(
            &self,
            _environment: EnvironmentType,
        ) -> Result<HashSet<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.names.iter().map(|s| s.to_string()).collect())
        }
    }

    struct HangingBackend;

    #[async_trait]
    impl DiscoveryBackend for HangingBackend {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn list_protected_service_names(
            &self,
            _environment: EnvironmentType,
        ) -> Result<HashSet<String>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(HashSet::new())
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl DiscoveryBackend for FailingBackend {
        fn name(&self) -> &str {
            "failing"
        }

        async fn list_protected_service_names(
            &self,
            _environment: EnvironmentType,
        ) -> Result<HashSet<String>> {
            Err(anyhow!("connection refused"))
        }
    }

    fn policy_with_static(services: &[&str]) -> SafetyPolicy {
        let mut policy = SafetyPolicy::restrictive();
        policy.protected_services = services.iter().map(|s| s.to_string()).collect();
        policy
    }

    #[tokio::test]
    async fn wildcard_protects_everything_and_skips_discovery() {
        let backend = FixedBackend::new("k8s", vec!["kube-dns"]);
        let resolver = ProtectedServiceResolver::new(
            vec![backend.clone()],
            Duration::from_secs(5),
        );
        let policy = policy_with_static(&["*"]);

        let lookup = resolver
            .is_protected("anything-at-all", EnvironmentType::Test, &policy)
            .await;
        assert!(lookup.protected);
        assert!(lookup.degraded_backends.is_empty());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn static_list_is_authoritative() {
        let resolver = ProtectedServiceResolver::static_only();
        let policy = policy_with_static(&["database"]);

        let lookup = resolver
            .is_protected("database", EnvironmentType::Staging, &policy)
            .await;
        assert!(lookup.protected);

        let lookup = resolver
            .is_protected("web-server", EnvironmentType::Staging, &policy)
            .await;
        assert!(!lookup.protected);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_backend_degrades_without_masking_others() {
        // One backend hangs past the timeout, the other knows auth-service.
        let resolver = ProtectedServiceResolver::new(
            vec![
                Arc::new(HangingBackend),
                FixedBackend::new("consul", vec!["auth-service"]),
            ],
            Duration::from_secs(5),
        );
        let policy = policy_with_static(&[]);

        let lookup = resolver
            .is_protected("auth-service", EnvironmentType::Staging, &policy)
            .await;
        assert!(lookup.protected);
        assert_eq!(lookup.degraded_backends, vec!["hanging".to_string()]);

        let lookup = resolver
            .is_protected("unrelated-service", EnvironmentType::Staging, &policy)
            .await;
        assert!(!lookup.protected);
        assert_eq!(lookup.degraded_backends, vec!["hanging".to_string()]);
    }

    #[tokio::test]
    async fn erroring_backend_fails_open_for_its_own_names_only() {
        let resolver = ProtectedServiceResolver::new(
            vec![
                Arc::new(FailingBackend),
                FixedBackend::new("k8s", vec!["kube-dns"]),
            ],
            Duration::from_secs(5),
        );
        let policy = policy_with_static(&[]);

        let lookup = resolver
            .is_protected("kube-dns", EnvironmentType::Development, &policy)
            .await;
        assert!(lookup.protected);
        assert_eq!(lookup.degraded_backends, vec!["failing".to_string()]);
    }
}
