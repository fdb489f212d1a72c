//! Actuator and Azure configuration
//!
//! Azure credentials come from the standard `AZURE_*` environment variables,
//! the same ones the Azure SDKs and CLI read.

use std::time::Duration;

use crate::Error;

/// Delay before a failed resource group deletion is retried
pub const DEFAULT_DELETE_REQUEUE_AFTER: Duration = Duration::from_secs(5);

/// Delay before a failed reconciliation is retried
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// How often a converged cluster is re-reconciled
pub const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(600);

/// Environment variable holding the subscription to provision into
pub const AZURE_SUBSCRIPTION_ID: &str = "AZURE_SUBSCRIPTION_ID";
/// Environment variable holding the AAD tenant
pub const AZURE_TENANT_ID: &str = "AZURE_TENANT_ID";
/// Environment variable holding the service principal client id
pub const AZURE_CLIENT_ID: &str = "AZURE_CLIENT_ID";
/// Environment variable holding the service principal secret
pub const AZURE_CLIENT_SECRET: &str = "AZURE_CLIENT_SECRET";
/// Environment variable selecting the Azure cloud
pub const AZURE_ENVIRONMENT: &str = "AZURE_ENVIRONMENT";

/// Cloud used when `AZURE_ENVIRONMENT` is unset
pub const DEFAULT_AZURE_ENVIRONMENT: &str = "AzurePublicCloud";

/// Tunables for the actuator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActuatorConfig {
    /// Requeue delay returned when resource group deletion fails
    pub delete_requeue_after: Duration,
    /// Requeue interval after a successful reconcile
    pub resync_period: Duration,
    /// Requeue delay after a failed reconcile
    pub error_backoff: Duration,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            delete_requeue_after: DEFAULT_DELETE_REQUEUE_AFTER,
            resync_period: DEFAULT_RESYNC_PERIOD,
            error_backoff: DEFAULT_ERROR_BACKOFF,
        }
    }
}

/// Azure account settings shared by every scope
#[derive(Clone, PartialEq, Eq)]
pub struct AzureSettings {
    /// Subscription that owns the cluster's resource groups
    pub subscription_id: String,
    /// AAD tenant of the service principal
    pub tenant_id: Option<String>,
    /// Service principal client id
    pub client_id: Option<String>,
    /// Service principal secret
    pub client_secret: Option<String>,
    /// Azure cloud name (AzurePublicCloud, AzureChinaCloud, ...)
    pub environment: String,
}

// Redacts the client secret.
impl std::fmt::Debug for AzureSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureSettings")
            .field("subscription_id", &self.subscription_id)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("environment", &self.environment)
            .finish()
    }
}

impl AzureSettings {
    /// Load settings from the process environment
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary lookup function
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let subscription_id = get(AZURE_SUBSCRIPTION_ID)
            .ok_or_else(|| Error::config(format!("{AZURE_SUBSCRIPTION_ID} is not set")))?;

        Ok(Self {
            subscription_id,
            tenant_id: get(AZURE_TENANT_ID),
            client_id: get(AZURE_CLIENT_ID),
            client_secret: get(AZURE_CLIENT_SECRET),
            environment: get(AZURE_ENVIRONMENT)
                .unwrap_or_else(|| DEFAULT_AZURE_ENVIRONMENT.to_string()),
        })
    }

    /// Create settings for a subscription with no service principal
    pub fn for_subscription(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            tenant_id: None,
            client_id: None,
            client_secret: None,
            environment: DEFAULT_AZURE_ENVIRONMENT.to_string(),
        }
    }
}
