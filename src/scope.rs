//! Per-call cluster scope
//!
//! A scope is created at the start of every reconcile or delete call. It
//! decodes the Azure provider spec and status from the Cluster, hands them to
//! the services, and writes back whatever changed when it is closed.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::client::ClusterClient;
use crate::config::AzureSettings;
use crate::crd::{
    ApiEndpoint, AzureClusterProviderSpec, AzureClusterProviderStatus, Cluster, ClusterStatus,
};
use crate::Error;

/// Port the API server load balancer listens on
pub const API_SERVER_PORT: u16 = 6443;

/// Namespace assumed when a Cluster carries none
pub const DEFAULT_NAMESPACE: &str = "default";

/// Session bound to one Cluster for the duration of one call
///
/// Accessors return owned values; the provider spec and status are mutated
/// through the setters and persisted by [`Scope::close`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Scope: Send + Sync {
    /// Name of the cluster
    fn cluster_name(&self) -> String;

    /// Namespace of the cluster
    fn namespace(&self) -> String;

    /// The Cluster object the scope was created from
    fn cluster(&self) -> Cluster;

    /// Subscription the cluster's resources live in
    fn subscription_id(&self) -> String;

    /// Resource group holding the cluster's resources
    fn resource_group(&self) -> String;

    /// Azure region of the cluster
    fn location(&self) -> String;

    /// Current provider spec
    fn provider_spec(&self) -> AzureClusterProviderSpec;

    /// Replace the provider spec
    fn set_provider_spec(&self, spec: AzureClusterProviderSpec);

    /// Current provider status
    fn provider_status(&self) -> AzureClusterProviderStatus;

    /// Replace the provider status
    fn set_provider_status(&self, status: AzureClusterProviderStatus);

    /// Release the scope, persisting any changes
    ///
    /// Called exactly once per call, after the last step has run.
    async fn close(&self) -> Result<(), Error>;
}

/// What a scope is opened for
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScopeIntent {
    /// Provisioning; the cluster must name a location
    #[default]
    Reconcile,
    /// Teardown; only the resource group is needed
    Delete,
    /// Read-only queries against persisted state
    Query,
}

impl ScopeIntent {
    fn requires_location(self) -> bool {
        matches!(self, ScopeIntent::Reconcile)
    }
}

/// Inputs to scope construction
#[derive(Clone)]
pub struct ScopeParams {
    /// Cluster the scope is bound to
    pub cluster: Cluster,
    /// Client used to persist changes on close
    pub client: Arc<dyn ClusterClient>,
    /// Operation the scope serves
    pub intent: ScopeIntent,
}

/// Creates scopes
#[cfg_attr(test, automock)]
pub trait ScopeGetter: Send + Sync {
    /// Create a scope for the given cluster
    fn get_scope(&self, params: ScopeParams) -> Result<Arc<dyn Scope>, Error>;
}

/// [`ScopeGetter`] producing [`ClusterScope`]s
#[derive(Clone, Debug)]
pub struct DefaultScopeGetter {
    settings: AzureSettings,
}

impl DefaultScopeGetter {
    /// Create a scope getter using the given Azure settings
    pub fn new(settings: AzureSettings) -> Self {
        Self { settings }
    }
}

impl ScopeGetter for DefaultScopeGetter {
    fn get_scope(&self, params: ScopeParams) -> Result<Arc<dyn Scope>, Error> {
        let scope = ClusterScope::new(params, self.settings.clone())?;
        Ok(Arc::new(scope))
    }
}

#[derive(Clone)]
struct ScopeState {
    spec: AzureClusterProviderSpec,
    status: AzureClusterProviderStatus,
}

/// Scope backed by a Cluster object and a [`ClusterClient`]
pub struct ClusterScope {
    cluster: Cluster,
    name: String,
    namespace: String,
    client: Arc<dyn ClusterClient>,
    settings: AzureSettings,
    original: ScopeState,
    state: Mutex<ScopeState>,
}

impl ClusterScope {
    /// Decode and validate the Cluster's provider spec and status
    ///
    /// An empty resource group defaults to the cluster name. The location
    /// must be set when the scope is opened for [`ScopeIntent::Reconcile`].
    pub fn new(params: ScopeParams, settings: AzureSettings) -> Result<Self, Error> {
        let ScopeParams {
            cluster,
            client,
            intent,
        } = params;

        let name = cluster.name_any();
        if name.is_empty() {
            return Err(Error::validation("cluster has no name"));
        }
        let namespace = cluster
            .namespace()
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        let mut spec = AzureClusterProviderSpec::from_provider_spec(&cluster.spec.provider_spec)?;
        let status = AzureClusterProviderStatus::from_provider_status(cluster.provider_status())?;

        if intent.requires_location() && spec.location.trim().is_empty() {
            return Err(Error::validation_for(
                &name,
                "providerSpec.location must be set",
            ));
        }

        // The original spec is recorded before defaulting so that a defaulted
        // resource group is written back on close.
        let original = ScopeState {
            spec: spec.clone(),
            status: status.clone(),
        };

        if spec.resource_group.is_empty() {
            spec.resource_group = name.clone();
        }

        Ok(Self {
            state: Mutex::new(ScopeState { spec, status }),
            cluster,
            name,
            namespace,
            client,
            settings,
            original,
        })
    }

    fn state(&self) -> MutexGuard<'_, ScopeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn persist_spec(&self, spec: &AzureClusterProviderSpec) -> Result<(), Error> {
        let provider_spec = spec.to_provider_spec()?;
        self.client
            .patch_provider_spec(&self.namespace, &self.name, &provider_spec)
            .await
    }

    async fn persist_status(&self, status: &AzureClusterProviderStatus) -> Result<(), Error> {
        let status = self.cluster_status(status)?;
        self.client
            .patch_status(&self.namespace, &self.name, &status)
            .await
    }

    fn cluster_status(&self, status: &AzureClusterProviderStatus) -> Result<ClusterStatus, Error> {
        let mut cluster_status = self.cluster.status.clone().unwrap_or_default();
        cluster_status.provider_status = Some(status.to_provider_status()?);

        if let Some(ip) = status.api_server_ip_address() {
            cluster_status.api_endpoints = vec![ApiEndpoint {
                host: ip.to_string(),
                port: API_SERVER_PORT,
            }];
        }
        Ok(cluster_status)
    }
}

#[async_trait]
impl Scope for ClusterScope {
    fn cluster_name(&self) -> String {
        self.name.clone()
    }

    fn namespace(&self) -> String {
        self.namespace.clone()
    }

    fn cluster(&self) -> Cluster {
        self.cluster.clone()
    }

    fn subscription_id(&self) -> String {
        self.settings.subscription_id.clone()
    }

    fn resource_group(&self) -> String {
        self.state().spec.resource_group.clone()
    }

    fn location(&self) -> String {
        self.state().spec.location.clone()
    }

    fn provider_spec(&self) -> AzureClusterProviderSpec {
        self.state().spec.clone()
    }

    fn set_provider_spec(&self, spec: AzureClusterProviderSpec) {
        self.state().spec = spec;
    }

    fn provider_status(&self) -> AzureClusterProviderStatus {
        self.state().status.clone()
    }

    fn set_provider_status(&self, status: AzureClusterProviderStatus) {
        self.state().status = status;
    }

    async fn close(&self) -> Result<(), Error> {
        let current = self.state().clone();

        let spec_result = if current.spec != self.original.spec {
            self.persist_spec(&current.spec).await
        } else {
            Ok(())
        };

        // The status is written even when the spec patch failed.
        let status_result = if current.status != self.original.status {
            self.persist_status(&current.status).await
        } else {
            Ok(())
        };

        spec_result.and(status_result)?;
        debug!(cluster = %self.name, "scope closed");
        Ok(())
    }
}
