//! Controller glue for running the actuator under `kube::runtime`

mod cluster;

use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};
use tracing::{debug, warn};

use crate::crd::Cluster;

pub use cluster::{error_policy, reconcile, Context, ContextBuilder, CLUSTER_FINALIZER};

/// Watch Cluster resources in all namespaces until a shutdown signal
pub async fn run(client: Client, ctx: Arc<Context>) {
    let clusters: Api<Cluster> = Api::all(client);

    Controller::new(clusters, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    debug!(?action, "cluster reconciliation completed");
                }
                Err(e) => {
                    warn!(error = %e, "cluster reconciliation error");
                }
            }
        })
        .await;
}
