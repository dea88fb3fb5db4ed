//! Kubernetes controller for MySQLCluster resources
//!
//! The controller does no topology work itself. It keeps one clustering
//! process per MySQLCluster alive through the [`ClusterManager`] and stops
//! the process when the finalizer runs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use kube::api::{Api, ListParams};
use kube::runtime::controller::{Action, Controller as KubeController};
use kube::runtime::finalizer::{finalizer, Event as Finalizer};
use kube::runtime::watcher::Config;
use kube::{Client, ResourceExt};
use sqlherd::clustering::ClusterManager;
use sqlherd::constants::FINALIZER;
use sqlherd::crd::MySQLCluster;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::metrics;

/// Requeue interval of a healthy object; the clustering loop has its own ticker.
const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Controller state
pub struct ControllerState {
    /// Kubernetes client
    pub client: Client,
    /// Running clustering processes
    pub manager: Arc<ClusterManager>,
}

/// Main controller for MySQLCluster resources
pub struct Controller {
    client: Client,
    namespace: String,
    state: Arc<ControllerState>,
}

impl Controller {
    /// Create a new controller
    pub fn new(client: Client, namespace: String, manager: Arc<ClusterManager>) -> Self {
        let state = ControllerState {
            client: client.clone(),
            manager,
        };

        Self {
            client,
            namespace,
            state: Arc::new(state),
        }
    }

    /// Run the controller until its watch stream ends.
    pub async fn run(&self) -> Result<(), Error> {
        info!("Starting MySQLCluster controller");

        let clusters: Api<MySQLCluster> = if self.namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), &self.namespace)
        };

        // Verify CRD is installed
        let lp = ListParams::default().limit(1);
        if let Err(e) = clusters.list(&lp).await {
            error!("Failed to list MySQLClusters. Is the CRD installed? Error: {}", e);
            return Err(Error::CrdNotInstalled);
        }

        info!("CRD verification successful");

        KubeController::new(clusters, Config::default())
            .run(reconcile, error_policy, Arc::clone(&self.state))
            .for_each(|result| async move {
                match result {
                    Ok((obj, action)) => {
                        debug!(name = %obj.name, ?action, "Reconciliation successful");
                    }
                    Err(e) => {
                        error!(error = %e, "Reconciliation error");
                    }
                }
            })
            .await;

        info!("Controller stopped");
        Ok(())
    }
}

/// Reconcile a MySQLCluster resource
async fn reconcile(cluster: Arc<MySQLCluster>, ctx: Arc<ControllerState>) -> Result<Action, Error> {
    let start = Instant::now();
    let name = cluster.name_any();
    let namespace = cluster
        .namespace()
        .ok_or_else(|| Error::MissingNamespace(name.clone()))?;

    debug!(name = %name, namespace = %namespace, "Reconciling MySQLCluster");

    let api: Api<MySQLCluster> = Api::namespaced(ctx.client.clone(), &namespace);
    let manager = Arc::clone(&ctx.manager);
    let result = finalizer(&api, FINALIZER, cluster, |event| async move {
        match event {
            Finalizer::Apply(cluster) => {
                manager.update(&cluster.key());
                Ok::<_, Error>(Action::requeue(RESYNC_INTERVAL))
            }
            Finalizer::Cleanup(cluster) => {
                info!(name = %cluster.name_any(), "Stopping clustering for deleted MySQLCluster");
                manager.stop(&cluster.key());
                Ok(Action::await_change())
            }
        }
    })
    .await
    .map_err(|e| Error::Finalizer(Box::new(e)));

    let key = format!("{}/{}", namespace, name);
    metrics::record_reconciliation(&key, result.is_ok(), start.elapsed().as_secs_f64());
    result
}

/// Error policy for reconciliation failures
fn error_policy(_cluster: Arc<MySQLCluster>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    warn!(error = %error, "Reconciliation error, will retry");
    Action::requeue(Duration::from_secs(60))
}
