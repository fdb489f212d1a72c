//! Certificate service
//!
//! Generates the cluster's certificate authorities and service account key
//! on first reconcile and stores them in the provider spec, where the
//! machine actuator picks them up for kubeadm. Existing material is never
//! rotated here.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::{debug, info};

use super::CertificateService;
use crate::crd::KeyPair;
use crate::pki::{self, CertificateAuthority};
use crate::scope::{Scope, API_SERVER_PORT};
use crate::Error;

/// Common name of the cluster CA
pub const CLUSTER_CA_NAME: &str = "kubernetes";
/// Common name of the etcd CA
pub const ETCD_CA_NAME: &str = "etcd-ca";
/// Common name of the front proxy CA
pub const FRONT_PROXY_CA_NAME: &str = "front-proxy-ca";

/// User name in the generated admin kubeconfig
pub const ADMIN_USER: &str = "kubernetes-admin";
/// Group granting the admin user cluster-admin
pub const ADMIN_GROUP: &str = "system:masters";

/// [`CertificateService`] that generates material locally
pub struct CertificatesService {
    scope: Arc<dyn Scope>,
}

impl CertificatesService {
    /// Create a certificate service bound to the given scope
    pub fn new(scope: Arc<dyn Scope>) -> Self {
        Self { scope }
    }
}

/// Generate a CA into `key_pair` unless both halves are already present
fn ensure_ca(key_pair: &mut KeyPair, common_name: &str) -> Result<bool, Error> {
    if key_pair.has_cert_and_key() {
        return Ok(false);
    }

    let ca = CertificateAuthority::new(common_name)?;
    key_pair.cert = ca.ca_cert_pem().to_string();
    key_pair.key = ca.ca_key_pem().to_string();
    Ok(true)
}

#[async_trait]
impl CertificateService for CertificatesService {
    async fn reconcile_certificates(&self) -> Result<(), Error> {
        let cluster_name = self.scope.cluster_name();
        let mut spec = self.scope.provider_spec();
        let original = spec.clone();

        for (key_pair, name) in [
            (&mut spec.ca_key_pair, CLUSTER_CA_NAME),
            (&mut spec.etcd_ca_key_pair, ETCD_CA_NAME),
            (&mut spec.front_proxy_ca_key_pair, FRONT_PROXY_CA_NAME),
        ] {
            if ensure_ca(key_pair, name)? {
                debug!(cluster = %cluster_name, ca = name, "generated certificate authority");
            }
        }

        if !spec.sa_key_pair.has_cert_and_key() {
            let (public, private) = pki::generate_service_account_key()?;
            spec.sa_key_pair = KeyPair {
                cert: public,
                key: private,
            };
        }

        let hash = pki::public_key_hash(&spec.ca_key_pair.cert)?;
        if spec.discovery_hashes != [hash.as_str()] {
            spec.discovery_hashes = vec![hash];
        }

        // The kubeconfig needs the API server address, which only exists
        // once the load balancer step has run.
        if spec.admin_kubeconfig.is_none() {
            if let Some(ip) = self.scope.provider_status().api_server_ip_address() {
                let ca =
                    CertificateAuthority::from_pem(&spec.ca_key_pair.cert, &spec.ca_key_pair.key)?;
                let (cert, key) = ca.generate_client_cert(ADMIN_USER, ADMIN_GROUP)?;
                let server = format!("https://{}:{}", ip, API_SERVER_PORT);
                spec.admin_kubeconfig = Some(generate_kubeconfig(
                    &cluster_name,
                    &server,
                    ca.ca_cert_pem(),
                    &cert,
                    &key,
                ));
            }
        }

        if spec != original {
            info!(cluster = %cluster_name, "updated cluster certificates");
            self.scope.set_provider_spec(spec);
        }
        Ok(())
    }
}

/// Generate an admin kubeconfig authenticating with a client certificate
pub fn generate_kubeconfig(
    cluster_name: &str,
    server: &str,
    ca_cert_pem: &str,
    client_cert_pem: &str,
    client_key_pem: &str,
) -> String {
    format!(
        r#"apiVersion: v1
kind: Config
clusters:
- cluster:
    server: {server}
    certificate-authority-data: {ca_cert}
  name: {cluster}
contexts:
- context:
    cluster: {cluster}
    user: {user}
  name: {user}@{cluster}
current-context: {user}@{cluster}
users:
- name: {user}
  user:
    client-certificate-data: {client_cert}
    client-key-data: {client_key}
"#,
        server = server,
        cluster = cluster_name,
        user = ADMIN_USER,
        ca_cert = STANDARD.encode(ca_cert_pem.as_bytes()),
        client_cert = STANDARD.encode(client_cert_pem.as_bytes()),
        client_key = STANDARD.encode(client_key_pem.as_bytes()),
    )
}
