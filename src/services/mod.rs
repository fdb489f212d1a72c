//! Collaborator services driven by the actuator
//!
//! Each service converges one category of Azure resources for the cluster
//! bound to its scope. Services are idempotent: the actuator re-runs every
//! step from the beginning on each call.

mod certificates;

use std::sync::Arc;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::scope::Scope;
use crate::Error;

pub use certificates::{
    generate_kubeconfig, CertificatesService, ADMIN_GROUP, ADMIN_USER, CLUSTER_CA_NAME,
    ETCD_CA_NAME, FRONT_PROXY_CA_NAME,
};

/// Issues the cluster's certificate authorities and keys
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CertificateService: Send + Sync {
    /// Create any missing certificates and store them in the provider spec
    async fn reconcile_certificates(&self) -> Result<(), Error>;
}

/// Manages the cluster's resource group
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceGroupService: Send + Sync {
    /// Create the resource group if it does not exist
    async fn reconcile_resource_group(&self) -> Result<(), Error>;

    /// Delete the resource group and everything in it
    async fn delete_resource_group(&self) -> Result<(), Error>;
}

/// Manages virtual networks and load balancers
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NetworkService: Send + Sync {
    /// Converge the virtual network, subnets and security groups
    async fn reconcile_network(&self) -> Result<(), Error>;

    /// Converge the named load balancer and its public IP
    async fn reconcile_load_balancer(&self, name: &str) -> Result<(), Error>;
}

/// Manages the cluster's bastion host
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BastionService: Send + Sync {
    /// Create or update the bastion host
    async fn reconcile_bastion(&self) -> Result<(), Error>;

    /// Delete the bastion host
    async fn delete_bastion(&self) -> Result<(), Error>;
}

/// Builds services bound to a scope
///
/// Optional capabilities return `None` when the provider does not implement
/// them; the actuator skips the corresponding steps.
#[cfg_attr(test, automock)]
pub trait ServiceFactory: Send + Sync {
    /// Certificate service for the scope's cluster
    fn certificates(&self, scope: Arc<dyn Scope>) -> Arc<dyn CertificateService>;

    /// Resource group service for the scope's cluster
    fn resources(&self, scope: Arc<dyn Scope>) -> Arc<dyn ResourceGroupService>;

    /// Network service for the scope's cluster
    fn network(&self, scope: Arc<dyn Scope>) -> Arc<dyn NetworkService>;

    /// Bastion service, if the provider has one
    fn bastion(&self, scope: Arc<dyn Scope>) -> Option<Arc<dyn BastionService>>;
}
