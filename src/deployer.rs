//! Deployer: read-side queries about a provisioned cluster

use std::sync::Arc;

use kube::ResourceExt;
use tracing::error;

use crate::client::ClusterClient;
use crate::crd::Cluster;
use crate::scope::{Scope, ScopeGetter, ScopeIntent, ScopeParams};
use crate::Error;

/// Inputs to [`Deployer::new`]
pub struct DeployerParams {
    /// Creates the scope each query runs in
    pub scope_getter: Arc<dyn ScopeGetter>,
    /// Client handed to each scope
    pub client: Arc<dyn ClusterClient>,
}

/// Answers the Cluster API deployer queries for Azure clusters
pub struct Deployer {
    scope_getter: Arc<dyn ScopeGetter>,
    client: Arc<dyn ClusterClient>,
}

impl Deployer {
    /// Create a deployer
    pub fn new(params: DeployerParams) -> Self {
        Self {
            scope_getter: params.scope_getter,
            client: params.client,
        }
    }

    /// Public IP address of the cluster's API server load balancer
    pub async fn get_ip(&self, cluster: &Cluster) -> Result<String, Error> {
        self.with_scope(cluster, |scope| {
            scope
                .provider_status()
                .api_server_ip_address()
                .map(str::to_string)
                .ok_or_else(|| Error::not_ready(scope.cluster_name(), "API server IP address"))
        })
        .await
    }

    /// Admin kubeconfig for the cluster
    pub async fn get_kubeconfig(&self, cluster: &Cluster) -> Result<String, Error> {
        self.with_scope(cluster, |scope| {
            scope
                .provider_spec()
                .admin_kubeconfig
                .filter(|k| !k.is_empty())
                .ok_or_else(|| Error::not_ready(scope.cluster_name(), "admin kubeconfig"))
        })
        .await
    }

    async fn with_scope<T, F>(&self, cluster: &Cluster, query: F) -> Result<T, Error>
    where
        F: FnOnce(&dyn Scope) -> Result<T, Error>,
    {
        let scope = self
            .scope_getter
            .get_scope(ScopeParams {
                cluster: cluster.clone(),
                client: self.client.clone(),
                intent: ScopeIntent::Query,
            })
            .map_err(|e| Error::scope_creation(cluster.name_any(), e))?;

        let result = query(scope.as_ref());

        if let Err(e) = scope.close().await {
            if result.is_ok() {
                return Err(Error::scope_close(cluster.name_any(), e));
            }
            error!(cluster = %cluster.name_any(), error = %e, "failed to close scope");
        }
        result
    }
}
