//! Azure cluster actuator
//!
//! The actuator implements the two operations the Cluster API cluster
//! controller calls: [`Actuator::reconcile`] and [`Actuator::delete`]. Every
//! call opens a [`Scope`] for the cluster, drives the collaborator services
//! in a fixed order, and closes the scope exactly once before returning.
//!
//! Reconciliation is fail-fast: the first failing step aborts the call and
//! later steps are not attempted. The next call starts again from the first
//! step, relying on the services being idempotent.

use std::fmt;
use std::sync::Arc;

use kube::ResourceExt;
use tracing::{debug, error, info, instrument};

use crate::client::ClusterClient;
use crate::config::ActuatorConfig;
use crate::crd::Cluster;
use crate::deployer::{Deployer, DeployerParams};
use crate::scope::{Scope, ScopeGetter, ScopeIntent, ScopeParams};
use crate::services::{
    BastionService, CertificateService, NetworkService, ResourceGroupService, ServiceFactory,
};
use crate::Error;

/// Name of the load balancer fronting the API servers
pub const API_LOAD_BALANCER: &str = "api";

/// One step of cluster reconciliation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileStep {
    /// Certificate authorities and keys
    Certificates,
    /// The resource group holding the cluster
    ResourceGroup,
    /// Virtual network, subnets and security groups
    Network,
    /// Bastion host
    Bastion,
    /// The named load balancer
    LoadBalancer(String),
}

impl ReconcileStep {
    /// What the step converges, as used in error messages
    pub fn resource(&self) -> &'static str {
        match self {
            ReconcileStep::Certificates => "certificates",
            ReconcileStep::ResourceGroup => "resource group",
            ReconcileStep::Network => "network",
            ReconcileStep::Bastion => "bastion host",
            ReconcileStep::LoadBalancer(_) => "load balancers",
        }
    }
}

impl fmt::Display for ReconcileStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reconcile {}", self.resource())
    }
}

/// Ordered reconciliation steps
///
/// The bastion step is only planned when the provider has a bastion service.
pub fn reconcile_plan(with_bastion: bool) -> Vec<ReconcileStep> {
    let mut plan = vec![
        ReconcileStep::Certificates,
        ReconcileStep::ResourceGroup,
        ReconcileStep::Network,
    ];
    if with_bastion {
        plan.push(ReconcileStep::Bastion);
    }
    plan.push(ReconcileStep::LoadBalancer(API_LOAD_BALANCER.to_string()));
    plan
}

/// Services bound to one scope
struct Services {
    certificates: Arc<dyn CertificateService>,
    resources: Arc<dyn ResourceGroupService>,
    network: Arc<dyn NetworkService>,
    bastion: Option<Arc<dyn BastionService>>,
}

impl Services {
    fn new(factory: &dyn ServiceFactory, scope: &Arc<dyn Scope>) -> Self {
        Self {
            certificates: factory.certificates(scope.clone()),
            resources: factory.resources(scope.clone()),
            network: factory.network(scope.clone()),
            bastion: factory.bastion(scope.clone()),
        }
    }

    /// Steps for these services; the bastion step only when one is bound
    fn plan(&self) -> Vec<ReconcileStep> {
        reconcile_plan(self.bastion.is_some())
    }

    async fn run(&self, step: &ReconcileStep) -> Result<(), Error> {
        match step {
            ReconcileStep::Certificates => self.certificates.reconcile_certificates().await,
            ReconcileStep::ResourceGroup => self.resources.reconcile_resource_group().await,
            ReconcileStep::Network => self.network.reconcile_network().await,
            ReconcileStep::Bastion => {
                if let Some(bastion) = &self.bastion {
                    bastion.reconcile_bastion().await?;
                }
                Ok(())
            }
            ReconcileStep::LoadBalancer(name) => self.network.reconcile_load_balancer(name).await,
        }
    }
}

/// Inputs to [`Actuator::new`]
pub struct ActuatorParams {
    /// Client handed to every scope
    pub client: Arc<dyn ClusterClient>,
    /// Creates the per-call scope
    pub scope_getter: Arc<dyn ScopeGetter>,
    /// Builds the collaborator services for a scope
    pub services: Arc<dyn ServiceFactory>,
    /// Tunables
    pub config: ActuatorConfig,
}

/// Drives Azure infrastructure for Cluster API clusters
///
/// Holds no per-cluster state and can be shared across concurrent calls for
/// different clusters.
pub struct Actuator {
    deployer: Deployer,
    client: Arc<dyn ClusterClient>,
    scope_getter: Arc<dyn ScopeGetter>,
    services: Arc<dyn ServiceFactory>,
    config: ActuatorConfig,
}

impl Actuator {
    /// Create an actuator
    pub fn new(params: ActuatorParams) -> Self {
        let deployer = Deployer::new(DeployerParams {
            scope_getter: params.scope_getter.clone(),
            client: params.client.clone(),
        });

        Self {
            deployer,
            client: params.client,
            scope_getter: params.scope_getter,
            services: params.services,
            config: params.config,
        }
    }

    /// The embedded deployer
    pub fn deployer(&self) -> &Deployer {
        &self.deployer
    }

    /// Public IP address of the cluster's API server
    pub async fn get_ip(&self, cluster: &Cluster) -> Result<String, Error> {
        self.deployer.get_ip(cluster).await
    }

    /// Admin kubeconfig for the cluster
    pub async fn get_kubeconfig(&self, cluster: &Cluster) -> Result<String, Error> {
        self.deployer.get_kubeconfig(cluster).await
    }

    /// Converge the cluster's Azure infrastructure
    #[instrument(skip(self, cluster), fields(cluster = %cluster.name_any()))]
    pub async fn reconcile(&self, cluster: &Cluster) -> Result<(), Error> {
        info!("reconciling cluster");

        let scope = self.open_scope(cluster, ScopeIntent::Reconcile)?;
        let result = self.run_reconcile(&scope).await;
        release(scope, result).await
    }

    /// Tear down the cluster's Azure infrastructure
    ///
    /// A failed resource group deletion is returned as
    /// [`Error::RequeueAfter`] so the controller retries instead of giving up.
    #[instrument(skip(self, cluster), fields(cluster = %cluster.name_any()))]
    pub async fn delete(&self, cluster: &Cluster) -> Result<(), Error> {
        info!("deleting cluster");

        let scope = self.open_scope(cluster, ScopeIntent::Delete)?;
        let result = self.run_delete(&scope).await;
        release(scope, result).await
    }

    fn open_scope(
        &self,
        cluster: &Cluster,
        intent: ScopeIntent,
    ) -> Result<Arc<dyn Scope>, Error> {
        self.scope_getter
            .get_scope(ScopeParams {
                cluster: cluster.clone(),
                client: self.client.clone(),
                intent,
            })
            .map_err(|e| Error::scope_creation(cluster.name_any(), e))
    }

    async fn run_reconcile(&self, scope: &Arc<dyn Scope>) -> Result<(), Error> {
        let name = scope.cluster_name();
        let services = Services::new(self.services.as_ref(), scope);

        for step in services.plan() {
            debug!(%step, "running step");
            services
                .run(&step)
                .await
                .map_err(|e| Error::step_failed(&name, step.to_string(), e))?;
        }
        Ok(())
    }

    // Only the resource group is deleted; removing it removes the network and
    // load balancers inside it.
    async fn run_delete(&self, scope: &Arc<dyn Scope>) -> Result<(), Error> {
        let name = scope.cluster_name();
        let services = Services::new(self.services.as_ref(), scope);

        if let Some(bastion) = &services.bastion {
            bastion
                .delete_bastion()
                .await
                .map_err(|e| Error::step_failed(&name, "delete bastion host", e))?;
        }

        if let Err(e) = services.resources.delete_resource_group().await {
            error!(
                error = %e,
                resource_group = %scope.resource_group(),
                "failed to delete resource group"
            );
            return Err(Error::requeue_after(self.config.delete_requeue_after));
        }
        Ok(())
    }
}

/// Close the scope and combine its outcome with the steps' result
///
/// A step error takes precedence over a close error.
async fn release(scope: Arc<dyn Scope>, result: Result<(), Error>) -> Result<(), Error> {
    let closed = scope.close().await;

    match (result, closed) {
        (Ok(()), Ok(())) => Ok(()),
        (Ok(()), Err(e)) => Err(Error::scope_close(scope.cluster_name(), e)),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_err)) => {
            error!(error = %close_err, "failed to close scope");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClusterClient;
    use crate::crd::ClusterSpec;
    use crate::scope::{MockScope, MockScopeGetter, ScopeIntent};
    use crate::services::{
        MockBastionService, MockCertificateService, MockNetworkService, MockResourceGroupService,
        MockServiceFactory,
    };
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn sample_cluster(name: &str) -> Cluster {
        Cluster::new(name, ClusterSpec::default())
    }

    /// Records the order in which services were called
    #[derive(Clone, Default)]
    struct CallLog {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl CallLog {
        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    /// Which service call should fail
    #[derive(Clone, Copy, Debug, PartialEq)]
    enum Fail {
        Nothing,
        Certificates,
        ResourceGroup,
        Network,
        LoadBalancer,
        DeleteResourceGroup,
        Bastion,
        DeleteBastion,
    }

    fn result_for(fail: Fail, this: Fail, service: &str) -> Result<(), Error> {
        if fail == this {
            Err(Error::service(service, format!("{service} unavailable")))
        } else {
            Ok(())
        }
    }

    fn mock_scope(name: &str, closes: Arc<AtomicUsize>) -> MockScope {
        let mut scope = MockScope::new();
        scope.expect_cluster_name().return_const(name.to_string());
        scope
            .expect_resource_group()
            .return_const(format!("{name}-rg"));
        scope.expect_close().returning(move || {
            closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        scope
    }

    fn mock_factory(log: &CallLog, fail: Fail, with_bastion: bool) -> MockServiceFactory {
        let mut factory = MockServiceFactory::new();

        let l = log.clone();
        factory.expect_certificates().returning(move |_| {
            let l = l.clone();
            let mut svc = MockCertificateService::new();
            svc.expect_reconcile_certificates().returning(move || {
                l.record("certificates");
                result_for(fail, Fail::Certificates, "certificates")
            });
            let svc: Arc<dyn CertificateService> = Arc::new(svc);
            svc
        });

        let l = log.clone();
        factory.expect_resources().returning(move |_| {
            let (l1, l2) = (l.clone(), l.clone());
            let mut svc = MockResourceGroupService::new();
            svc.expect_reconcile_resource_group().returning(move || {
                l1.record("resource group");
                result_for(fail, Fail::ResourceGroup, "resources")
            });
            svc.expect_delete_resource_group().returning(move || {
                l2.record("delete resource group");
                result_for(fail, Fail::DeleteResourceGroup, "resources")
            });
            let svc: Arc<dyn ResourceGroupService> = Arc::new(svc);
            svc
        });

        let l = log.clone();
        factory.expect_network().returning(move |_| {
            let (l1, l2) = (l.clone(), l.clone());
            let mut svc = MockNetworkService::new();
            svc.expect_reconcile_network().returning(move || {
                l1.record("network");
                result_for(fail, Fail::Network, "network")
            });
            svc.expect_reconcile_load_balancer().returning(move |name| {
                l2.record(&format!("load balancer {name}"));
                result_for(fail, Fail::LoadBalancer, "network")
            });
            let svc: Arc<dyn NetworkService> = Arc::new(svc);
            svc
        });

        let l = log.clone();
        factory.expect_bastion().returning(move |_| {
            if !with_bastion {
                return None;
            }
            let (l1, l2) = (l.clone(), l.clone());
            let mut svc = MockBastionService::new();
            svc.expect_reconcile_bastion().returning(move || {
                l1.record("bastion");
                result_for(fail, Fail::Bastion, "bastion")
            });
            svc.expect_delete_bastion().returning(move || {
                l2.record("delete bastion");
                result_for(fail, Fail::DeleteBastion, "bastion")
            });
            let svc: Arc<dyn BastionService> = Arc::new(svc);
            Some(svc)
        });

        factory
    }

    struct Harness {
        actuator: Actuator,
        log: CallLog,
        closes: Arc<AtomicUsize>,
        intents: Arc<Mutex<Vec<ScopeIntent>>>,
    }

    fn harness(fail: Fail, with_bastion: bool) -> Harness {
        let log = CallLog::default();
        let closes = Arc::new(AtomicUsize::new(0));
        let intents = Arc::new(Mutex::new(Vec::new()));

        let closes_clone = closes.clone();
        let intents_clone = intents.clone();
        let mut getter = MockScopeGetter::new();
        getter.expect_get_scope().returning(move |params| {
            intents_clone.lock().unwrap().push(params.intent);
            let scope: Arc<dyn Scope> =
                Arc::new(mock_scope(&params.cluster.name_any(), closes_clone.clone()));
            Ok(scope)
        });

        let actuator = Actuator::new(ActuatorParams {
            client: Arc::new(MockClusterClient::new()),
            scope_getter: Arc::new(getter),
            services: Arc::new(mock_factory(&log, fail, with_bastion)),
            config: ActuatorConfig::default(),
        });

        Harness {
            actuator,
            log,
            closes,
            intents,
        }
    }

    fn failing_scope_harness() -> (Actuator, Arc<MockServiceFactory>) {
        let mut getter = MockScopeGetter::new();
        getter
            .expect_get_scope()
            .returning(|_| Err(Error::validation_for("broken", "providerSpec.location must be set")));

        let mut factory = MockServiceFactory::new();
        factory.expect_certificates().never();
        factory.expect_resources().never();
        factory.expect_network().never();
        factory.expect_bastion().never();
        let factory = Arc::new(factory);

        let actuator = Actuator::new(ActuatorParams {
            client: Arc::new(MockClusterClient::new()),
            scope_getter: Arc::new(getter),
            services: factory.clone(),
            config: ActuatorConfig::default(),
        });
        (actuator, factory)
    }

    // ==========================================================================
    // Story Tests: reconciliation
    // ==========================================================================

    /// Story: a healthy cluster converges every resource category in order
    #[tokio::test]
    async fn story_all_steps_succeed() {
        let h = harness(Fail::Nothing, false);

        h.actuator
            .reconcile(&sample_cluster("prod-eastus"))
            .await
            .unwrap();

        assert_eq!(
            h.log.calls(),
            vec!["certificates", "resource group", "network", "load balancer api"]
        );
        assert_eq!(h.closes.load(Ordering::SeqCst), 1);
    }

    /// Story: certificate issuance fails, nothing else is touched
    ///
    /// The error names the cluster so the operator can find it, and the
    /// resource group, network and load balancer are left for the next call.
    #[tokio::test]
    async fn story_certificate_failure_stops_reconciliation() {
        let h = harness(Fail::Certificates, false);

        let err = h
            .actuator
            .reconcile(&sample_cluster("prod-eastus"))
            .await
            .unwrap_err();

        assert_eq!(h.log.calls(), vec!["certificates"]);
        assert!(err.to_string().contains("prod-eastus"));
        assert_eq!(
            err.to_string(),
            "failed to reconcile certificates for cluster \"prod-eastus\": \
             certificates service error: certificates unavailable"
        );
        assert_eq!(h.closes.load(Ordering::SeqCst), 1);
    }

    /// Story: a broken provider spec is reported before any service runs
    #[tokio::test]
    async fn story_scope_failure_invokes_no_service() {
        let (actuator, _factory) = failing_scope_harness();

        let err = actuator
            .reconcile(&sample_cluster("broken"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ScopeCreation { .. }));
        assert!(err.to_string().starts_with("failed to create scope: "));

        let err = actuator.delete(&sample_cluster("broken")).await.unwrap_err();
        assert!(matches!(err, Error::ScopeCreation { .. }));
        assert!(!err.is_requeue());
    }

    /// Story: a provider with a bastion capability gets a bastion step
    #[tokio::test]
    async fn story_bastion_runs_between_network_and_load_balancer() {
        let h = harness(Fail::Nothing, true);

        h.actuator.reconcile(&sample_cluster("c1")).await.unwrap();

        assert_eq!(
            h.log.calls(),
            vec![
                "certificates",
                "resource group",
                "network",
                "bastion",
                "load balancer api"
            ]
        );
    }

    #[rstest]
    #[case::certificates(Fail::Certificates, "reconcile certificates", 1)]
    #[case::resource_group(Fail::ResourceGroup, "reconcile resource group", 2)]
    #[case::network(Fail::Network, "reconcile network", 3)]
    #[case::load_balancer(Fail::LoadBalancer, "reconcile load balancers", 4)]
    #[tokio::test]
    async fn test_each_failure_names_its_step_and_closes_once(
        #[case] fail: Fail,
        #[case] step: &str,
        #[case] calls: usize,
    ) {
        let h = harness(fail, false);

        let err = h.actuator.reconcile(&sample_cluster("c1")).await.unwrap_err();

        assert_eq!(err.step(), Some(step));
        assert_eq!(err.cluster(), Some("c1"));
        assert_eq!(h.log.calls().len(), calls);
        assert_eq!(h.closes.load(Ordering::SeqCst), 1);
    }

    // ==========================================================================
    // Story Tests: deletion
    // ==========================================================================

    /// Story: deleting a cluster removes its resource group
    #[tokio::test]
    async fn story_delete_removes_resource_group() {
        let h = harness(Fail::Nothing, false);

        h.actuator.delete(&sample_cluster("c1")).await.unwrap();

        assert_eq!(h.log.calls(), vec!["delete resource group"]);
        assert_eq!(h.closes.load(Ordering::SeqCst), 1);
    }

    /// Story: Azure refuses to delete the resource group, try again shortly
    #[tokio::test]
    async fn story_failed_delete_requeues_after_five_seconds() {
        let h = harness(Fail::DeleteResourceGroup, false);

        let err = h.actuator.delete(&sample_cluster("c1")).await.unwrap_err();

        assert!(err.is_requeue());
        assert_eq!(err.requeue_delay(), Some(Duration::from_secs(5)));
        assert_eq!(h.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_bastion_first_when_supported() {
        let h = harness(Fail::Nothing, true);

        h.actuator.delete(&sample_cluster("c1")).await.unwrap();

        assert_eq!(
            h.log.calls(),
            vec!["delete bastion", "delete resource group"]
        );
    }

    /// Story: a bastion that cannot be removed is a hard failure, not a retry
    ///
    /// The resource group is left alone so the bastion is not orphaned.
    #[tokio::test]
    async fn story_failed_bastion_delete_is_terminal() {
        let h = harness(Fail::DeleteBastion, true);

        let err = h.actuator.delete(&sample_cluster("c1")).await.unwrap_err();

        assert!(!err.is_requeue());
        assert!(matches!(err, Error::StepFailed { .. }));
        assert_eq!(err.step(), Some("delete bastion host"));
        assert_eq!(h.log.calls(), vec!["delete bastion"]);
        assert_eq!(h.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scopes_are_opened_for_their_operation() {
        let h = harness(Fail::Nothing, false);
        let cluster = sample_cluster("c1");

        h.actuator.reconcile(&cluster).await.unwrap();
        h.actuator.delete(&cluster).await.unwrap();

        assert_eq!(
            *h.intents.lock().unwrap(),
            vec![ScopeIntent::Reconcile, ScopeIntent::Delete]
        );
    }

    // ==========================================================================
    // Scope release
    // ==========================================================================

    #[tokio::test]
    async fn test_close_failure_after_success_is_reported() {
        let mut scope = MockScope::new();
        scope.expect_cluster_name().return_const("c1".to_string());
        scope
            .expect_close()
            .times(1)
            .returning(|| Err(Error::service("kubernetes", "conflict")));

        let err = release(Arc::new(scope), Ok(())).await.unwrap_err();
        assert!(matches!(err, Error::ScopeClose { .. }));
    }

    #[tokio::test]
    async fn test_step_error_wins_over_close_failure() {
        let mut scope = MockScope::new();
        scope.expect_cluster_name().return_const("c1".to_string());
        scope
            .expect_close()
            .times(1)
            .returning(|| Err(Error::service("kubernetes", "conflict")));

        let step_err = Error::step_failed("c1", "reconcile network", Error::service("network", "x"));
        let err = release(Arc::new(scope), Err(step_err)).await.unwrap_err();
        assert_eq!(err.step(), Some("reconcile network"));
    }

    // ==========================================================================
    // Plan
    // ==========================================================================

    #[test]
    fn test_plan_order() {
        assert_eq!(
            reconcile_plan(false),
            vec![
                ReconcileStep::Certificates,
                ReconcileStep::ResourceGroup,
                ReconcileStep::Network,
                ReconcileStep::LoadBalancer(API_LOAD_BALANCER.to_string()),
            ]
        );
        assert_eq!(reconcile_plan(true)[3], ReconcileStep::Bastion);
    }

    #[test]
    fn test_step_display() {
        assert_eq!(
            ReconcileStep::LoadBalancer("api".to_string()).to_string(),
            "reconcile load balancers"
        );
        assert_eq!(ReconcileStep::ResourceGroup.to_string(), "reconcile resource group");
    }
}
