//! Cluster controller
//!
//! Adapts the [`Actuator`] to `kube::runtime::Controller`: live clusters get
//! a finalizer and are reconciled; clusters being deleted are torn down and
//! released by removing the finalizer.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument};

use crate::actuator::{Actuator, ActuatorParams};
use crate::client::{ClusterClient, KubeClusterClient};
use crate::config::{ActuatorConfig, AzureSettings};
use crate::crd::Cluster;
use crate::scope::{DefaultScopeGetter, ScopeGetter, DEFAULT_NAMESPACE};
use crate::services::ServiceFactory;
use crate::Error;

/// Finalizer holding a Cluster until its Azure resources are gone
pub const CLUSTER_FINALIZER: &str = "cluster.cluster.k8s.io";

/// Controller context shared across all reconciliation calls
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```ignore
/// let ctx = Context::builder(client, services)
///     .settings(AzureSettings::from_env()?)
///     .build()?;
/// ```
pub struct Context {
    /// The actuator driving Azure resources
    pub actuator: Arc<Actuator>,
    /// Client for finalizer updates (trait object for testability)
    pub client: Arc<dyn ClusterClient>,
    /// Requeue timings
    pub config: ActuatorConfig,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client, services: Arc<dyn ServiceFactory>) -> ContextBuilder {
        ContextBuilder::new(client, services)
    }

    /// Create a context from already-built parts
    pub fn new(
        actuator: Arc<Actuator>,
        client: Arc<dyn ClusterClient>,
        config: ActuatorConfig,
    ) -> Self {
        Self {
            actuator,
            client,
            config,
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    services: Arc<dyn ServiceFactory>,
    settings: Option<AzureSettings>,
    scope_getter: Option<Arc<dyn ScopeGetter>>,
    cluster_client: Option<Arc<dyn ClusterClient>>,
    config: ActuatorConfig,
}

impl ContextBuilder {
    fn new(client: Client, services: Arc<dyn ServiceFactory>) -> Self {
        Self {
            client,
            services,
            settings: None,
            scope_getter: None,
            cluster_client: None,
            config: ActuatorConfig::default(),
        }
    }

    /// Set the Azure settings; defaults to reading the environment
    pub fn settings(mut self, settings: AzureSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Override the scope getter
    pub fn scope_getter(mut self, scope_getter: Arc<dyn ScopeGetter>) -> Self {
        self.scope_getter = Some(scope_getter);
        self
    }

    /// Override the Cluster client
    pub fn cluster_client(mut self, client: Arc<dyn ClusterClient>) -> Self {
        self.cluster_client = Some(client);
        self
    }

    /// Override the requeue timings
    pub fn config(mut self, config: ActuatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the Context
    ///
    /// Fails if no scope getter was given and the Azure settings cannot be
    /// loaded from the environment.
    pub fn build(self) -> Result<Context, Error> {
        let client = self
            .cluster_client
            .unwrap_or_else(|| Arc::new(KubeClusterClient::new(self.client.clone())));

        let scope_getter: Arc<dyn ScopeGetter> = match self.scope_getter {
            Some(getter) => getter,
            None => {
                let settings = match self.settings {
                    Some(settings) => settings,
                    None => AzureSettings::from_env()?,
                };
                Arc::new(DefaultScopeGetter::new(settings))
            }
        };

        let actuator = Actuator::new(ActuatorParams {
            client: client.clone(),
            scope_getter,
            services: self.services,
            config: self.config.clone(),
        });

        Ok(Context::new(Arc::new(actuator), client, self.config))
    }
}

/// Reconcile a Cluster resource
#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
pub async fn reconcile(cluster: Arc<Cluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = cluster.name_any();
    let namespace = cluster
        .namespace()
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

    if cluster.is_being_deleted() {
        if !cluster.has_finalizer(CLUSTER_FINALIZER) {
            debug!("cluster is being deleted and holds no finalizer");
            return Ok(Action::await_change());
        }

        return match ctx.actuator.delete(&cluster).await {
            Ok(()) => {
                ctx.client
                    .remove_finalizer(&namespace, &name, CLUSTER_FINALIZER)
                    .await?;
                info!("cluster resources deleted, finalizer removed");
                Ok(Action::await_change())
            }
            Err(e) => match e.requeue_delay() {
                Some(delay) => {
                    info!(?delay, "cluster deletion incomplete, requeueing");
                    Ok(Action::requeue(delay))
                }
                None => Err(e),
            },
        };
    }

    if !cluster.has_finalizer(CLUSTER_FINALIZER) {
        info!("adding finalizer");
        ctx.client
            .add_finalizer(&namespace, &name, CLUSTER_FINALIZER)
            .await?;
    }

    ctx.actuator.reconcile(&cluster).await?;
    Ok(Action::requeue(ctx.config.resync_period))
}

/// Error policy for the controller
///
/// Requeue signals are honoured with their own delay; any other error is
/// retried after the configured backoff.
pub fn error_policy(cluster: Arc<Cluster>, error: &Error, ctx: Arc<Context>) -> Action {
    if let Some(delay) = error.requeue_delay() {
        debug!(cluster = %cluster.name_any(), ?delay, "requeue requested");
        return Action::requeue(delay);
    }

    error!(
        ?error,
        cluster = %cluster.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    Action::requeue(backoff(error, &ctx.config))
}

fn backoff(error: &Error, config: &ActuatorConfig) -> Duration {
    // Errors that need a spec fix wait for the resync instead of spinning.
    if error.is_retryable() {
        config.error_backoff
    } else {
        config.resync_period
    }
}
