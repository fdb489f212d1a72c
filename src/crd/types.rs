//! Supporting types for the Cluster CRD

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Cluster-wide network configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetworkingConfig {
    /// Network ranges from which service VIPs are allocated
    #[serde(default)]
    pub services: NetworkRanges,

    /// Network ranges from which pod IPs are allocated
    #[serde(default)]
    pub pods: NetworkRanges,

    /// Domain name for services
    #[serde(default)]
    pub service_domain: String,
}

/// A list of CIDR blocks
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRanges {
    /// CIDR blocks, e.g. "10.96.0.0/12"
    #[serde(default)]
    pub cidr_blocks: Vec<String>,
}

/// Provider-specific configuration wrapper
///
/// Cluster API stores provider configuration as an embedded raw object.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ProviderSpec {
    /// The embedded provider object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl ProviderSpec {
    /// Wrap a raw provider object
    pub fn from_value(value: serde_json::Value) -> Self {
        Self { value: Some(value) }
    }
}

/// An endpoint at which the API server can be reached
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ApiEndpoint {
    /// Hostname or IP address
    pub host: String,

    /// Port number
    pub port: u16,
}

impl std::fmt::Display for ApiEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
