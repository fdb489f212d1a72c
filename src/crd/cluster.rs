//! Cluster API `Cluster` Custom Resource Definition
//!
//! The Cluster resource is owned by the Cluster API core controllers; this
//! crate only reads its spec and writes back the opaque provider fields.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ApiEndpoint, ClusterNetworkingConfig, ProviderSpec};

/// Specification for a Cluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.k8s.io",
    version = "v1alpha1",
    kind = "Cluster",
    plural = "clusters",
    status = "ClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".status.apiEndpoints[0].host"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Cluster-wide network configuration
    #[serde(default)]
    pub cluster_network: ClusterNetworkingConfig,

    /// Provider-specific configuration, opaque to Cluster API
    #[serde(default)]
    pub provider_spec: ProviderSpec,
}

/// Status for a Cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Endpoints at which the cluster's API server can be reached
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_endpoints: Vec<ApiEndpoint>,

    /// Provider-specific status, opaque to Cluster API
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_status: Option<serde_json::Value>,

    /// Machine-readable reason for a terminal problem
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,

    /// Human-readable description of a terminal problem
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Cluster {
    /// Raw provider status, if any has been recorded
    pub fn provider_status(&self) -> Option<&serde_json::Value> {
        self.status
            .as_ref()
            .and_then(|s| s.provider_status.as_ref())
    }

    /// Returns true once the API server has asked for this cluster to be deleted
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Returns true if the given finalizer is present
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|name| name == finalizer))
    }
}
