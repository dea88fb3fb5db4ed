//! Common test utilities for integration tests.

pub mod assertions;
pub mod cluster_sim;
pub mod fixtures;

use k8s_openapi::api::core::v1::Pod;
use sqlherd::clustering::ClusterContext;
use sqlherd::config::HerdConfig;
use sqlherd::crd::{ClusterKey, MySQLCluster};
use std::sync::Arc;

// Re-export common types
pub use assertions::*;
pub use cluster_sim::*;
pub use fixtures::*;

/// A cluster wired to simulated collaborators.
pub struct TestEnv {
    pub key: ClusterKey,
    pub store: Arc<MemoryStore>,
    pub fleet: SimFleet,
    pub agents: Arc<SimAgentFactory>,
    pub events: Arc<RecordingEvents>,
    pub ctx: ClusterContext,
}

impl TestEnv {
    /// Register `cluster`, its password secret, the external source secret
    /// and `pods`, backed by `fleet`.
    pub fn new(cluster: MySQLCluster, pods: Vec<Pod>, fleet: SimFleet) -> Self {
        let key = cluster.key();
        let store = Arc::new(MemoryStore::new());
        store.put_secret(password_secret(&cluster));
        store.put_secret(source_secret());
        store.put_pods(pods);
        store.put_cluster(cluster);

        let agents = Arc::new(SimAgentFactory::new(fleet.clone()));
        let events = Arc::new(RecordingEvents::new());
        let ctx = ClusterContext::new(
            store.clone(),
            Arc::new(SimOperatorFactory::new(fleet.clone())),
            agents.clone(),
            events.clone(),
            HerdConfig::development(),
        );

        Self {
            key,
            store,
            fleet,
            agents,
            events,
            ctx,
        }
    }

    /// A converged cluster with ready pods labelled by role.
    pub fn healthy(name: &str, replicas: i32, gtid: &str) -> Self {
        let cluster = cluster(name, replicas);
        let fleet = SimFleet::healthy(&cluster, 0, gtid);
        let pods = (0..cluster.replicas())
            .map(|i| {
                let role = if i == 0 { "primary" } else { "replica" };
                pod(&cluster, i, true, Some(role))
            })
            .collect();
        Self::new(cluster, pods, fleet)
    }

    pub fn cluster(&self) -> MySQLCluster {
        self.store.cluster(&self.key)
    }
}
