//! Azure provider spec and status
//!
//! These are carried inside the Cluster's opaque `providerSpec.value` and
//! `status.providerStatus` fields. The scope decodes them at the start of a
//! call and encodes them again when it is closed.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::types::ProviderSpec;
use crate::Error;

/// API version written into encoded provider objects
pub const PROVIDER_API_VERSION: &str = "azureprovider/v1alpha1";

/// Kind of the provider spec object
pub const PROVIDER_SPEC_KIND: &str = "AzureClusterProviderSpec";

/// Kind of the provider status object
pub const PROVIDER_STATUS_KIND: &str = "AzureClusterProviderStatus";

/// Desired Azure configuration for a cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureClusterProviderSpec {
    /// Resource group holding every resource of the cluster
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_group: String,

    /// Azure region, e.g. "westus2"
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub location: String,

    /// Virtual network layout
    #[serde(default)]
    pub network_spec: NetworkSpec,

    /// Cluster CA
    #[serde(default, skip_serializing_if = "KeyPair::is_empty")]
    pub ca_key_pair: KeyPair,

    /// etcd CA
    #[serde(
        rename = "etcdCAKeyPair",
        default,
        skip_serializing_if = "KeyPair::is_empty"
    )]
    pub etcd_ca_key_pair: KeyPair,

    /// Front proxy CA
    #[serde(
        rename = "frontProxyCAKeyPair",
        default,
        skip_serializing_if = "KeyPair::is_empty"
    )]
    pub front_proxy_ca_key_pair: KeyPair,

    /// Service account signing key pair
    #[serde(default, skip_serializing_if = "KeyPair::is_empty")]
    pub sa_key_pair: KeyPair,

    /// Admin kubeconfig generated alongside the certificates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_kubeconfig: Option<String>,

    /// CA public key hashes used by joining nodes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discovery_hashes: Vec<String>,
}

impl AzureClusterProviderSpec {
    /// Decode from a Cluster's provider spec
    ///
    /// An absent value decodes to the default spec.
    pub fn from_provider_spec(spec: &ProviderSpec) -> Result<Self, Error> {
        decode(spec.value.as_ref(), PROVIDER_SPEC_KIND)
    }

    /// Encode into a provider spec
    pub fn to_provider_spec(&self) -> Result<ProviderSpec, Error> {
        encode(self, PROVIDER_SPEC_KIND).map(ProviderSpec::from_value)
    }

    /// Returns true if every CA and the service account key pair are present
    pub fn has_certificates(&self) -> bool {
        [
            &self.ca_key_pair,
            &self.etcd_ca_key_pair,
            &self.front_proxy_ca_key_pair,
            &self.sa_key_pair,
        ]
        .iter()
        .all(|kp| kp.has_cert_and_key())
    }
}

/// Observed Azure state for a cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureClusterProviderStatus {
    /// Network resources created for the cluster
    #[serde(default)]
    pub network: Network,

    /// Bastion host, once one exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bastion: Option<Vm>,
}

impl AzureClusterProviderStatus {
    /// Decode from a Cluster's provider status
    pub fn from_provider_status(value: Option<&serde_json::Value>) -> Result<Self, Error> {
        decode(value, PROVIDER_STATUS_KIND)
    }

    /// Encode into a raw provider status
    pub fn to_provider_status(&self) -> Result<serde_json::Value, Error> {
        encode(self, PROVIDER_STATUS_KIND)
    }

    /// Public IP address of the API server load balancer, if allocated
    pub fn api_server_ip_address(&self) -> Option<&str> {
        self.network
            .api_server_ip
            .as_ref()
            .and_then(|ip| ip.ip_address.as_deref())
            .filter(|ip| !ip.is_empty())
    }
}

/// PEM-encoded certificate and private key
#[derive(Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct KeyPair {
    /// Certificate (or public key for the service account pair)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cert: String,

    /// Private key
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
}

impl KeyPair {
    /// Returns true if neither half is set
    pub fn is_empty(&self) -> bool {
        self.cert.is_empty() && self.key.is_empty()
    }

    /// Returns true if both halves are set
    pub fn has_cert_and_key(&self) -> bool {
        !self.cert.is_empty() && !self.key.is_empty()
    }
}

// Private keys stay out of logs.
impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("cert", &(!self.cert.is_empty()))
            .field("key", &(!self.key.is_empty()))
            .finish()
    }
}

/// Virtual network layout
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// Virtual network to create or adopt
    #[serde(default)]
    pub vnet: VnetSpec,

    /// Subnets inside the virtual network
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnets: Vec<SubnetSpec>,
}

impl NetworkSpec {
    /// First subnet with the given role
    pub fn subnet(&self, role: SubnetRole) -> Option<&SubnetSpec> {
        self.subnets.iter().find(|s| s.role == role)
    }
}

/// Virtual network configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VnetSpec {
    /// Azure resource id of an existing network to adopt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Name of the network
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Address space of the network
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cidr_block: String,
}

/// Subnet configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpec {
    /// Azure resource id, once created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Name of the subnet
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Address range of the subnet
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cidr_block: String,

    /// What runs in the subnet
    #[serde(default)]
    pub role: SubnetRole,
}

/// Role of a subnet
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubnetRole {
    /// Control plane machines
    #[serde(rename = "controlplane")]
    ControlPlane,
    /// Worker machines
    #[default]
    Node,
}

/// Network resources created for a cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    /// Subnets as created in Azure
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnets: Vec<SubnetSpec>,

    /// Load balancer in front of the API servers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server_lb: Option<LoadBalancer>,

    /// Public IP of the API server load balancer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server_ip: Option<PublicIp>,
}

/// Azure load balancer
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancer {
    /// Azure resource id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Name of the load balancer
    pub name: String,

    /// SKU, e.g. "Standard"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,

    /// Name of the frontend IP configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend_ip_config: Option<String>,
}

/// Azure public IP address
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicIp {
    /// Azure resource id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Name of the public IP resource
    pub name: String,

    /// Allocated address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,

    /// DNS name bound to the address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_name: Option<String>,
}

/// Azure virtual machine summary
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Vm {
    /// Azure resource id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Name of the machine
    pub name: String,

    /// Provisioning state as reported by Azure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

fn decode<T: DeserializeOwned + Default>(
    value: Option<&serde_json::Value>,
    kind: &str,
) -> Result<T, Error> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(T::default()),
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| Error::serialization_for_kind(kind, format!("failed to decode: {e}"))),
    }
}

fn encode<T: Serialize>(value: &T, kind: &str) -> Result<serde_json::Value, Error> {
    let mut encoded = serde_json::to_value(value)
        .map_err(|e| Error::serialization_for_kind(kind, format!("failed to encode: {e}")))?;

    if let serde_json::Value::Object(map) = &mut encoded {
        map.insert("apiVersion".to_string(), PROVIDER_API_VERSION.into());
        map.insert("kind".to_string(), kind.into());
    }
    Ok(encoded)
}
