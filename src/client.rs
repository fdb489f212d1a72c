//! Cluster API client
//!
//! The actuator only ever writes to the Cluster object it was handed: the
//! provider spec (certificates generated on first reconcile), the status, and
//! the finalizer list. Everything goes through [`ClusterClient`] so tests can
//! substitute a mock.

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::{Cluster, ClusterStatus, ProviderSpec};
use crate::Error;

/// Field manager recorded on every patch
pub const FIELD_MANAGER: &str = "capz-actuator";

/// Trait abstracting writes to Cluster objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Replace the provider spec of a Cluster
    async fn patch_provider_spec(
        &self,
        namespace: &str,
        name: &str,
        provider_spec: &ProviderSpec,
    ) -> Result<(), Error>;

    /// Merge the given status into a Cluster's status subresource
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ClusterStatus,
    ) -> Result<(), Error>;

    /// Add a finalizer to a Cluster if it is not already present
    async fn add_finalizer(&self, namespace: &str, name: &str, finalizer: &str)
        -> Result<(), Error>;

    /// Remove a finalizer from a Cluster
    async fn remove_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error>;
}

/// [`ClusterClient`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Create a new client wrapping the given Kubernetes client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Cluster> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn patch_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });

        self.api(namespace)
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;

        Ok(())
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn patch_provider_spec(
        &self,
        namespace: &str,
        name: &str,
        provider_spec: &ProviderSpec,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({
            "spec": {
                "providerSpec": provider_spec
            }
        });

        self.api(namespace)
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;

        debug!(cluster = %name, "patched provider spec");
        Ok(())
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ClusterStatus,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({
            "status": status
        });

        self.api(namespace)
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;

        debug!(cluster = %name, "patched status");
        Ok(())
    }

    async fn add_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let cluster = self.api(namespace).get(name).await?;
        let mut finalizers = cluster.metadata.finalizers.unwrap_or_default();

        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }

        finalizers.push(finalizer.to_string());
        self.patch_finalizers(namespace, name, finalizers).await
    }

    async fn remove_finalizer(
        &self,
        namespace: &str,
        name: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        let cluster = self.api(namespace).get(name).await?;
        let finalizers: Vec<String> = cluster
            .metadata
            .finalizers
            .as_ref()
            .map(|f| f.iter().filter(|s| *s != finalizer).cloned().collect())
            .unwrap_or_default();

        self.patch_finalizers(namespace, name, finalizers).await
    }
}
