//! Custom Resource Definitions and provider types
//!
//! The Cluster CRD is owned by Cluster API; the Azure provider types live
//! inside its opaque provider fields.

mod azure;
mod cluster;
mod types;

pub use azure::{
    AzureClusterProviderSpec, AzureClusterProviderStatus, KeyPair, LoadBalancer, Network,
    NetworkSpec, PublicIp, SubnetRole, SubnetSpec, Vm, VnetSpec, PROVIDER_API_VERSION,
    PROVIDER_SPEC_KIND, PROVIDER_STATUS_KIND,
};
pub use cluster::{Cluster, ClusterSpec, ClusterStatus};
pub use types::{ApiEndpoint, ClusterNetworkingConfig, NetworkRanges, ProviderSpec};
