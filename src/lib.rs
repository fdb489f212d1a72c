//! capz-actuator - Azure cluster actuator for Cluster API
//!
//! Given a Cluster API `Cluster` whose provider spec describes an Azure
//! cluster, the actuator drives the Azure resources (certificates, resource
//! group, virtual network, API server load balancer) toward the declared
//! state and tears them down when the Cluster is deleted.
//!
//! # Architecture
//!
//! - The [`actuator::Actuator`] runs a fixed, fail-fast sequence of steps
//! - Each call works inside a [`scope::Scope`] bound to one Cluster, closed
//!   exactly once when the call ends
//! - The steps are performed by collaborator services built per scope by a
//!   [`services::ServiceFactory`]
//! - A failed resource group deletion is not an error but a request to retry
//!   after a fixed delay ([`Error::RequeueAfter`])
//!
//! # Modules
//!
//! - [`actuator`] - Reconcile/delete orchestration
//! - [`scope`] - Per-call cluster scope
//! - [`services`] - Collaborator service interfaces and the certificate service
//! - [`deployer`] - API server address and kubeconfig queries
//! - [`controller`] - `kube::runtime` controller glue
//! - [`client`] - Writes to Cluster objects
//! - [`crd`] - Cluster CRD and Azure provider types
//! - [`pki`] - Certificate authority generation
//! - [`config`] - Actuator and Azure settings
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod actuator;
pub mod client;
pub mod config;
pub mod controller;
pub mod crd;
pub mod deployer;
pub mod error;
pub mod pki;
pub mod scope;
pub mod services;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
