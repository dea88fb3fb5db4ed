use super::{pod_selector, ResourceStore};
use crate::constants::LABEL_ROLE;
use crate::crd::{ClusterKey, MySQLCluster};
use crate::error::{HerdError, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use tracing::debug;

const FIELD_MANAGER: &str = "sqlherd-operator";

/// Resource store backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn map_err(err: kube::Error, what: impl FnOnce() -> String) -> HerdError {
    match &err {
        kube::Error::Api(ae) if ae.code == 404 => HerdError::NotFound(what()),
        kube::Error::Api(ae) if ae.code == 409 => HerdError::Conflict(what()),
        _ => HerdError::Kube(err),
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get_cluster(&self, key: &ClusterKey) -> Result<MySQLCluster> {
        let api: Api<MySQLCluster> = Api::namespaced(self.client.clone(), &key.namespace);
        api.get(&key.name)
            .await
            .map_err(|e| map_err(e, || format!("mysqlcluster {}", key)))
    }

    async fn update_cluster_status(&self, cluster: &MySQLCluster) -> Result<MySQLCluster> {
        let key = cluster.key();
        let api: Api<MySQLCluster> = Api::namespaced(self.client.clone(), &key.namespace);

        // The resourceVersion turns the merge patch into a compare-and-swap.
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": cluster.resource_version() },
            "status": cluster.status,
        });

        let pp = PatchParams::apply(FIELD_MANAGER);
        let updated = api
            .patch_status(&key.name, &pp, &Patch::Merge(&patch))
            .await
            .map_err(|e| map_err(e, || format!("mysqlcluster {}", key)))?;

        debug!(cluster = %key, "Status updated");
        Ok(updated)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| map_err(e, || format!("secret {}/{}", namespace, name)))
    }

    async fn list_pods(&self, cluster: &MySQLCluster) -> Result<Vec<Pod>> {
        let namespace = cluster.namespace().unwrap_or_default();
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
        let lp = ListParams::default().labels(&pod_selector(cluster));
        Ok(api.list(&lp).await?.items)
    }

    async fn set_pod_role(&self, namespace: &str, name: &str, role: Option<&str>) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({
            "metadata": { "labels": { LABEL_ROLE: role } }
        });
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_err(e, || format!("pod {}/{}", namespace, name)))?;
        Ok(())
    }

    async fn remove_pod_annotation(&self, namespace: &str, name: &str, key: &str) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({
            "metadata": { "annotations": { key: null } }
        });
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_err(e, || format!("pod {}/{}", namespace, name)))?;
        Ok(())
    }
}
