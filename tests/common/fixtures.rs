// Builders for the records a cluster is made of: the cluster object, its
// password secret, the external source secret and the instance pods.

use k8s_openapi::api::core::v1::{Pod, PodCondition, PodStatus, Secret};
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use sqlherd::constants::{ANN_SECRET_VERSION, LABEL_ROLE};
use sqlherd::crd::{MySQLCluster, MySQLClusterSpec, MySQLClusterStatus};
use sqlherd::password::{self, PASSWORD_VERSION};
use sqlherd::store::pod_labels;
use std::collections::BTreeMap;

pub const NAMESPACE: &str = "test";
pub const SOURCE_SECRET: &str = "external-source";
pub const SOURCE_HOST: &str = "mysql.external.example.com";

pub fn cluster(name: &str, replicas: i32) -> MySQLCluster {
    let mut cluster = MySQLCluster::new(
        name,
        MySQLClusterSpec {
            replicas,
            server_id_base: 1,
            replication_source_secret_name: None,
            startup_wait_seconds: 60,
            restore: None,
        },
    );
    cluster.metadata.namespace = Some(NAMESPACE.to_string());
    cluster.metadata.resource_version = Some("1".to_string());
    cluster.status = Some(MySQLClusterStatus::default());
    cluster
}

/// A cluster replicating from [`SOURCE_HOST`].
pub fn intermediate_cluster(name: &str, replicas: i32) -> MySQLCluster {
    let mut cluster = cluster(name, replicas);
    cluster.spec.replication_source_secret_name = Some(SOURCE_SECRET.to_string());
    cluster
}

fn secret(name: &str, annotations: BTreeMap<String, String>, data: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            annotations: Some(annotations),
            ..Default::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        ..Default::default()
    }
}

pub fn password_secret(cluster: &MySQLCluster) -> Secret {
    secret(
        &cluster.user_secret_name(),
        BTreeMap::from([(ANN_SECRET_VERSION.to_string(), PASSWORD_VERSION.to_string())]),
        &[
            (password::ADMIN_PASSWORD_KEY, "admin-pw"),
            (password::AGENT_PASSWORD_KEY, "agent-pw"),
            (password::REPLICATION_PASSWORD_KEY, "repl-pw"),
            (password::CLONE_DONOR_PASSWORD_KEY, "donor-pw"),
            (password::EXPORTER_PASSWORD_KEY, "exporter-pw"),
            (password::BACKUP_PASSWORD_KEY, "backup-pw"),
            (password::READ_ONLY_PASSWORD_KEY, "ro-pw"),
            (password::WRITABLE_PASSWORD_KEY, "rw-pw"),
        ],
    )
}

pub fn source_secret() -> Secret {
    secret(
        SOURCE_SECRET,
        BTreeMap::new(),
        &[
            (password::SOURCE_HOST_KEY, SOURCE_HOST),
            (password::SOURCE_PORT_KEY, "3306"),
            (password::SOURCE_USER_KEY, "source-repl"),
            (password::SOURCE_PASSWORD_KEY, "source-pw"),
            (password::SOURCE_INIT_USER_KEY, "source-init"),
            (password::SOURCE_INIT_PASSWORD_KEY, "source-init-pw"),
        ],
    )
}

/// IP address given to the pod of instance `index`.
pub fn pod_ip(index: usize) -> String {
    format!("10.0.0.{}", index + 10)
}

pub fn pod(cluster: &MySQLCluster, index: usize, ready: bool, role: Option<&str>) -> Pod {
    let mut labels = pod_labels(cluster);
    if let Some(role) = role {
        labels.insert(LABEL_ROLE.to_string(), role.to_string());
    }
    Pod {
        metadata: ObjectMeta {
            name: Some(cluster.pod_name(index)),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        status: Some(PodStatus {
            conditions: Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            pod_ip: Some(pod_ip(index)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Ready pods for every instance, without role labels.
pub fn pods(cluster: &MySQLCluster) -> Vec<Pod> {
    (0..cluster.replicas())
        .map(|i| pod(cluster, i, true, None))
        .collect()
}
