//! Access to the cluster records kept in the resource store.
//!
//! The clustering loop reads the desired-state record, its credentials and
//! the instance pods, and writes back status with optimistic concurrency:
//! [`ResourceStore::update_cluster_status`] fails with
//! [`HerdError::Conflict`](crate::error::HerdError::Conflict) when the
//! record changed since it was read.

mod kube_store;

pub use kube_store::KubeStore;

use crate::constants::{APP_NAME, LABEL_APP_INSTANCE, LABEL_APP_NAME};
use crate::crd::{ClusterKey, MySQLCluster};
use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Secret};
use std::collections::BTreeMap;

#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_cluster(&self, key: &ClusterKey) -> Result<MySQLCluster>;

    /// Write `cluster.status`, guarded by `cluster.metadata.resource_version`.
    async fn update_cluster_status(&self, cluster: &MySQLCluster) -> Result<MySQLCluster>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret>;

    /// Instance pods of `cluster`, in any order.
    async fn list_pods(&self, cluster: &MySQLCluster) -> Result<Vec<Pod>>;

    /// Set (`Some`) or remove (`None`) the role label of a pod.
    async fn set_pod_role(&self, namespace: &str, name: &str, role: Option<&str>) -> Result<()>;

    async fn remove_pod_annotation(&self, namespace: &str, name: &str, key: &str) -> Result<()>;
}

/// Labels selecting the instance pods of `cluster`.
pub fn pod_labels(cluster: &MySQLCluster) -> BTreeMap<String, String> {
    use kube::ResourceExt;
    BTreeMap::from([
        (LABEL_APP_NAME.to_string(), APP_NAME.to_string()),
        (LABEL_APP_INSTANCE.to_string(), cluster.name_any()),
    ])
}

/// Label selector string for [`pod_labels`].
pub fn pod_selector(cluster: &MySQLCluster) -> String {
    pod_labels(cluster)
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::MySQLClusterSpec;

    #[test]
    fn test_pod_selector() {
        let cluster = MySQLCluster::new(
            "db",
            MySQLClusterSpec {
                replicas: 1,
                server_id_base: 1,
                replication_source_secret_name: None,
                startup_wait_seconds: 10,
                restore: None,
            },
        );
        assert_eq!(
            pod_selector(&cluster),
            "app.kubernetes.io/instance=db,app.kubernetes.io/name=mysql"
        );
    }
}
