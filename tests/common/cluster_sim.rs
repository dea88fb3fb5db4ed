// Simulated MySQL instances and resource store for integration tests.
//
// GTID sets are modelled as comma separated opaque tokens such as "a:1,a:2";
// subset and subtraction work on the token sets.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::ResourceExt;
use parking_lot::Mutex;
use sqlherd::agent::{AgentConn, AgentFactory, CloneRequest};
use sqlherd::constants::{LABEL_APP_INSTANCE, LABEL_ROLE};
use sqlherd::crd::{ClusterKey, MySQLCluster};
use sqlherd::dbop::{DatabaseOperator, NopOperator, OperatorFactory};
use sqlherd::error::{HerdError, Result};
use sqlherd::events::{ClusterEvent, EventRecorder};
use sqlherd::password::MySQLPassword;
use sqlherd::store::ResourceStore;
use sqlherd::types::{
    AccessInfo, CloneStatus, GlobalVariables, MySQLInstanceStatus, ReplicaHost, ReplicaStatus,
    CLONE_STATE_COMPLETED,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::fixtures::{pod_ip, SOURCE_HOST};

// =============================================================================
// GTID sets
// =============================================================================

fn tokens(set: &str) -> BTreeSet<&str> {
    set.split(',').map(str::trim).filter(|t| !t.is_empty()).collect()
}

pub fn gtid_is_subset(set1: &str, set2: &str) -> bool {
    tokens(set1).is_subset(&tokens(set2))
}

pub fn gtid_subtract(set1: &str, set2: &str) -> String {
    let other = tokens(set2);
    tokens(set1)
        .into_iter()
        .filter(|t| !other.contains(t))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn gtid_union(set1: &str, set2: &str) -> String {
    let mut all = tokens(set1);
    all.extend(tokens(set2));
    all.into_iter().collect::<Vec<_>>().join(",")
}

// =============================================================================
// Simulated instances
// =============================================================================

/// State of one simulated mysqld.
#[derive(Debug, Clone)]
pub struct SimInstance {
    pub up: bool,
    pub hostname: String,
    pub ip: String,
    pub server_id: u32,
    pub status: MySQLInstanceStatus,
    pub kills: usize,
    /// Status queries received, failed ones included.
    pub status_calls: usize,
    /// Status queries still to fail before the next one succeeds.
    pub status_failures: usize,
    pub replica_configs: usize,
    pub resolvable: bool,
}

struct FleetState {
    instances: Vec<SimInstance>,
    external_gtid: String,
}

/// The instances of one cluster, shared by every operator and agent built for it.
#[derive(Clone)]
pub struct SimFleet {
    state: Arc<Mutex<FleetState>>,
    open: Arc<AtomicUsize>,
    created: Arc<AtomicUsize>,
    stalled: Arc<AtomicBool>,
}

impl SimFleet {
    /// Fresh, empty, read-only instances.
    pub fn new(cluster: &MySQLCluster) -> Self {
        let base = cluster.spec.server_id_base as u32;
        let instances = (0..cluster.replicas())
            .map(|i| SimInstance {
                up: true,
                hostname: cluster.pod_hostname(i),
                ip: pod_ip(i),
                server_id: base + i as u32,
                status: MySQLInstanceStatus {
                    global_variables: GlobalVariables {
                        uuid: format!("uuid-{}", i),
                        read_only: true,
                        super_read_only: true,
                        ..Default::default()
                    },
                    ..Default::default()
                },
                kills: 0,
                status_calls: 0,
                status_failures: 0,
                replica_configs: 0,
                resolvable: true,
            })
            .collect();
        Self {
            state: Arc::new(Mutex::new(FleetState {
                instances,
                external_gtid: String::new(),
            })),
            open: Arc::new(AtomicUsize::new(0)),
            created: Arc::new(AtomicUsize::new(0)),
            stalled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A converged topology: `primary` is writable with semi-sync enabled and
    /// every other instance replicates from it.
    pub fn healthy(cluster: &MySQLCluster, primary: usize, gtid: &str) -> Self {
        let fleet = Self::new(cluster);
        let replicas = cluster.replicas();
        fleet.make_primary(primary, gtid, replicas > 1);
        for i in (0..replicas).filter(|&i| i != primary) {
            fleet.make_replica(i, primary, gtid);
        }
        fleet
    }

    pub fn make_primary(&self, index: usize, gtid: &str, semisync: bool) {
        let mut state = self.state.lock();
        let replicas = state.instances.len();
        let gv = &mut state.instances[index].status.global_variables;
        gv.executed_gtid = gtid.to_string();
        gv.read_only = false;
        gv.super_read_only = false;
        if semisync {
            gv.semi_sync_source_enabled = true;
            gv.wait_for_replica_count = (replicas / 2) as u32;
        }
        state.instances[index].status.replica_status = None;
    }

    pub fn make_replica(&self, index: usize, primary: usize, gtid: &str) {
        let mut state = self.state.lock();
        let source_host = state.instances[primary].hostname.clone();
        let inst = &mut state.instances[index];
        inst.status.global_variables.executed_gtid = gtid.to_string();
        inst.status.global_variables.read_only = true;
        inst.status.global_variables.super_read_only = true;
        inst.status.global_variables.semi_sync_replica_enabled = true;
        inst.status.replica_status = Some(running_link(&source_host, gtid));
    }

    /// Replace the executed set of an instance.
    pub fn set_gtid(&self, index: usize, gtid: &str) {
        let mut state = self.state.lock();
        let inst = &mut state.instances[index];
        inst.status.global_variables.executed_gtid = gtid.to_string();
        if let Some(rs) = inst.status.replica_status.as_mut() {
            rs.retrieved_gtid_set = gtid.to_string();
            rs.executed_gtid_set = gtid.to_string();
        }
    }

    pub fn set_read_only(&self, index: usize, read_only: bool) {
        let mut state = self.state.lock();
        let gv = &mut state.instances[index].status.global_variables;
        gv.read_only = read_only;
        gv.super_read_only = read_only;
    }

    pub fn set_up(&self, index: usize, up: bool) {
        self.state.lock().instances[index].up = up;
    }

    /// Fail the next `n` status queries of an instance.
    pub fn fail_status(&self, index: usize, n: usize) {
        self.state.lock().instances[index].status_failures = n;
    }

    /// Make the instance address unresolvable, so its operator is a no-op.
    pub fn set_resolvable(&self, index: usize, resolvable: bool) {
        self.state.lock().instances[index].resolvable = resolvable;
    }

    pub fn set_purged_gtid(&self, index: usize, gtid: &str) {
        self.state.lock().instances[index]
            .status
            .global_variables
            .purged_gtid = gtid.to_string();
    }

    /// Drop the replication link of an instance, as after a reset.
    pub fn unlink(&self, index: usize) {
        let mut state = self.state.lock();
        let inst = &mut state.instances[index];
        inst.status.replica_status = None;
        inst.status.global_variables.semi_sync_replica_enabled = false;
    }

    /// Data served by the external source of an intermediate cluster.
    pub fn set_external_gtid(&self, gtid: &str) {
        self.state.lock().external_gtid = gtid.to_string();
    }

    /// Make every status query hang until the caller is dropped.
    pub fn stall(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    pub fn instance(&self, index: usize) -> SimInstance {
        self.state.lock().instances[index].clone()
    }

    /// Operators created and not yet closed.
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn created_connections(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Status as `SHOW` statements would report it, with the attached
    /// replicas derived from the other instances' links.
    fn observe(state: &FleetState, index: usize) -> MySQLInstanceStatus {
        let me = &state.instances[index];
        let mut status = me.status.clone();
        status.replica_hosts = state
            .instances
            .iter()
            .filter(|other| other.up)
            .filter(|other| {
                other.status.replica_status.as_ref().is_some_and(|rs| {
                    rs.source_host == me.hostname && rs.replica_io_running == "Yes"
                })
            })
            .map(|other| ReplicaHost {
                server_id: other.server_id,
                host: other.hostname.clone(),
                port: 3306,
                source_id: me.server_id,
                replica_uuid: other.status.global_variables.uuid.clone(),
            })
            .collect();
        status
    }

    fn with_instance<T>(
        &self,
        index: usize,
        f: impl FnOnce(&mut FleetState, usize) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state.lock();
        if !state.instances[index].up {
            return Err(HerdError::InstanceUnavailable {
                index,
                reason: "connection refused".to_string(),
            });
        }
        f(&mut state, index)
    }
}

fn running_link(source_host: &str, gtid: &str) -> ReplicaStatus {
    ReplicaStatus {
        source_host: source_host.to_string(),
        retrieved_gtid_set: gtid.to_string(),
        executed_gtid_set: gtid.to_string(),
        replica_io_running: "Yes".to_string(),
        replica_sql_running: "Yes".to_string(),
        ..Default::default()
    }
}

// =============================================================================
// Database operators
// =============================================================================

pub struct SimOperator {
    name: String,
    index: usize,
    fleet: SimFleet,
    closed: AtomicBool,
}

#[async_trait]
impl DatabaseOperator for SimOperator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_status(&self) -> Result<MySQLInstanceStatus> {
        if self.fleet.stalled.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.fleet.with_instance(self.index, |state, i| {
            let inst = &mut state.instances[i];
            inst.status_calls += 1;
            if inst.status_failures > 0 {
                inst.status_failures -= 1;
                return Err(HerdError::InstanceUnavailable {
                    index: i,
                    reason: "lost connection during query".to_string(),
                });
            }
            Ok(SimFleet::observe(state, i))
        })
    }

    async fn is_subset_gtid(&self, set1: &str, set2: &str) -> Result<bool> {
        self.fleet
            .with_instance(self.index, |_, _| Ok(gtid_is_subset(set1, set2)))
    }

    async fn subtract_gtid(&self, set1: &str, set2: &str) -> Result<String> {
        self.fleet
            .with_instance(self.index, |_, _| Ok(gtid_subtract(set1, set2)))
    }

    async fn configure_replica(&self, source: &AccessInfo, semisync: bool) -> Result<()> {
        self.fleet.with_instance(self.index, |state, i| {
            let source_gtid = state
                .instances
                .iter()
                .find(|inst| inst.hostname == source.host)
                .map(|inst| inst.status.global_variables.executed_gtid.clone())
                .unwrap_or_else(|| state.external_gtid.clone());
            let inst = &mut state.instances[i];
            inst.replica_configs += 1;
            let gtid = gtid_union(&inst.status.global_variables.executed_gtid, &source_gtid);
            inst.status.global_variables.executed_gtid = gtid.clone();
            inst.status.global_variables.semi_sync_replica_enabled = semisync;
            inst.status.global_variables.semi_sync_source_enabled = false;
            inst.status.replica_status = Some(running_link(&source.host, &gtid));
            Ok(())
        })
    }

    async fn configure_primary(&self, wait_for_count: u32) -> Result<()> {
        self.fleet.with_instance(self.index, |state, i| {
            let gv = &mut state.instances[i].status.global_variables;
            gv.semi_sync_source_enabled = true;
            gv.wait_for_replica_count = wait_for_count;
            Ok(())
        })
    }

    async fn stop_replica_io_thread(&self) -> Result<()> {
        self.fleet.with_instance(self.index, |state, i| {
            if let Some(rs) = state.instances[i].status.replica_status.as_mut() {
                rs.replica_io_running = "No".to_string();
            }
            Ok(())
        })
    }

    async fn wait_for_gtid(&self, gtid_set: &str, _timeout_seconds: u32) -> Result<()> {
        self.fleet.with_instance(self.index, |state, i| {
            let inst = &mut state.instances[i];
            let retrieved = inst
                .status
                .replica_status
                .as_ref()
                .map(|rs| rs.retrieved_gtid_set.clone())
                .unwrap_or_default();
            let gv = &mut inst.status.global_variables;
            let reachable = gtid_union(&gv.executed_gtid, &retrieved);
            if !gtid_is_subset(gtid_set, &reachable) {
                return Err(HerdError::Timeout);
            }
            gv.executed_gtid = gtid_union(&gv.executed_gtid, gtid_set);
            Ok(())
        })
    }

    async fn set_read_only(&self, read_only: bool) -> Result<()> {
        self.fleet.with_instance(self.index, |state, i| {
            let inst = &mut state.instances[i];
            inst.status.global_variables.read_only = read_only;
            inst.status.global_variables.super_read_only = read_only;
            if !read_only {
                inst.status.replica_status = None;
            }
            Ok(())
        })
    }

    async fn kill_connections(&self) -> Result<()> {
        self.fleet.with_instance(self.index, |state, i| {
            state.instances[i].kills += 1;
            Ok(())
        })
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.fleet.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

pub struct SimOperatorFactory {
    fleet: SimFleet,
}

impl SimOperatorFactory {
    pub fn new(fleet: SimFleet) -> Self {
        Self { fleet }
    }
}

#[async_trait]
impl OperatorFactory for SimOperatorFactory {
    async fn create(
        &self,
        cluster: &MySQLCluster,
        _password: &MySQLPassword,
        index: usize,
    ) -> Result<Box<dyn DatabaseOperator>> {
        let name = format!("{}/{}", cluster.namespace().unwrap_or_default(), cluster.pod_name(index));
        if !self.fleet.state.lock().instances[index].resolvable {
            return Ok(Box::new(NopOperator::new(name)));
        }
        self.fleet.open.fetch_add(1, Ordering::SeqCst);
        self.fleet.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimOperator {
            name,
            index,
            fleet: self.fleet.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

// =============================================================================
// Agents
// =============================================================================

/// Clones copy the donor's executed set into the recipient.
pub struct SimAgentFactory {
    fleet: SimFleet,
    requests: Arc<Mutex<Vec<(usize, CloneRequest)>>>,
    fail: AtomicBool,
}

impl SimAgentFactory {
    pub fn new(fleet: SimFleet) -> Self {
        Self {
            fleet,
            requests: Arc::new(Mutex::new(Vec::new())),
            fail: AtomicBool::new(false),
        }
    }

    pub fn fail_clones(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Recipient index and request of every clone so far.
    pub fn requests(&self) -> Vec<(usize, CloneRequest)> {
        self.requests.lock().clone()
    }
}

struct SimAgentConn {
    index: usize,
    fleet: SimFleet,
    requests: Arc<Mutex<Vec<(usize, CloneRequest)>>>,
    fail: bool,
}

#[async_trait]
impl AgentFactory for SimAgentFactory {
    async fn connect(&self, _cluster: &MySQLCluster, index: usize) -> Result<Box<dyn AgentConn>> {
        Ok(Box::new(SimAgentConn {
            index,
            fleet: self.fleet.clone(),
            requests: self.requests.clone(),
            fail: self.fail.load(Ordering::SeqCst),
        }))
    }
}

#[async_trait]
impl AgentConn for SimAgentConn {
    async fn clone_from(&self, req: &CloneRequest) -> Result<()> {
        self.requests.lock().push((self.index, req.clone()));
        if self.fail {
            return Err(HerdError::Agent("clone aborted".to_string()));
        }

        let mut state = self.fleet.state.lock();
        let donor_gtid = if req.host == SOURCE_HOST {
            state.external_gtid.clone()
        } else {
            state
                .instances
                .iter()
                .find(|inst| inst.ip == req.host || inst.hostname == req.host)
                .map(|inst| inst.status.global_variables.executed_gtid.clone())
                .ok_or_else(|| HerdError::Agent(format!("unknown donor {}", req.host)))?
        };
        let inst = &mut state.instances[self.index];
        inst.status.global_variables.executed_gtid = donor_gtid;
        inst.status.clone_status = Some(CloneStatus {
            state: Some(CLONE_STATE_COMPLETED.to_string()),
        });
        Ok(())
    }
}

// =============================================================================
// Resource store
// =============================================================================

/// In-memory resource store with resourceVersion checks on status writes.
#[derive(Default)]
pub struct MemoryStore {
    clusters: Mutex<HashMap<ClusterKey, MySQLCluster>>,
    secrets: Mutex<HashMap<(String, String), Secret>>,
    pods: Mutex<Vec<Pod>>,
    pending_conflicts: AtomicUsize,
    status_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_cluster(&self, cluster: MySQLCluster) {
        self.clusters.lock().insert(cluster.key(), cluster);
    }

    pub fn put_secret(&self, secret: Secret) {
        let key = (secret.namespace().unwrap_or_default(), secret.name_any());
        self.secrets.lock().insert(key, secret);
    }

    pub fn put_pods(&self, pods: Vec<Pod>) {
        self.pods.lock().extend(pods);
    }

    pub fn cluster(&self, key: &ClusterKey) -> MySQLCluster {
        self.clusters.lock()[key].clone()
    }

    pub fn pod(&self, name: &str) -> Pod {
        self.pods
            .lock()
            .iter()
            .find(|p| p.name_any() == name)
            .cloned()
            .expect("pod exists")
    }

    /// Apply `f` to the stored pod named `name`.
    pub fn edit_pod(&self, name: &str, f: impl FnOnce(&mut Pod)) {
        let mut pods = self.pods.lock();
        let pod = pods
            .iter_mut()
            .find(|p| p.name_any() == name)
            .expect("pod exists");
        f(pod);
    }

    /// Fail the next `n` status writes with a conflict.
    pub fn inject_conflicts(&self, n: usize) {
        self.pending_conflicts.store(n, Ordering::SeqCst);
    }

    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_cluster(&self, key: &ClusterKey) -> Result<MySQLCluster> {
        self.clusters
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| HerdError::NotFound(key.to_string()))
    }

    async fn update_cluster_status(&self, cluster: &MySQLCluster) -> Result<MySQLCluster> {
        let mut clusters = self.clusters.lock();
        let key = cluster.key();
        let stored = clusters
            .get_mut(&key)
            .ok_or_else(|| HerdError::NotFound(key.to_string()))?;

        if self
            .pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(HerdError::Conflict(key.to_string()));
        }
        if stored.metadata.resource_version != cluster.metadata.resource_version {
            return Err(HerdError::Conflict(key.to_string()));
        }

        let version: u64 = stored
            .metadata
            .resource_version
            .as_deref()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        stored.status = cluster.status.clone();
        stored.metadata.resource_version = Some((version + 1).to_string());
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored.clone())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        self.secrets
            .lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| HerdError::NotFound(format!("{}/{}", namespace, name)))
    }

    async fn list_pods(&self, cluster: &MySQLCluster) -> Result<Vec<Pod>> {
        let namespace = cluster.namespace();
        let name = cluster.name_any();
        Ok(self
            .pods
            .lock()
            .iter()
            .filter(|p| p.namespace() == namespace)
            .filter(|p| p.labels().get(LABEL_APP_INSTANCE) == Some(&name))
            .cloned()
            .collect())
    }

    async fn set_pod_role(&self, namespace: &str, name: &str, role: Option<&str>) -> Result<()> {
        let mut pods = self.pods.lock();
        let pod = pods
            .iter_mut()
            .find(|p| p.namespace().as_deref() == Some(namespace) && p.name_any() == name)
            .ok_or_else(|| HerdError::NotFound(format!("{}/{}", namespace, name)))?;
        let labels = pod.labels_mut();
        match role {
            Some(role) => {
                labels.insert(LABEL_ROLE.to_string(), role.to_string());
            }
            None => {
                labels.remove(LABEL_ROLE);
            }
        }
        Ok(())
    }

    async fn remove_pod_annotation(&self, namespace: &str, name: &str, key: &str) -> Result<()> {
        let mut pods = self.pods.lock();
        let pod = pods
            .iter_mut()
            .find(|p| p.namespace().as_deref() == Some(namespace) && p.name_any() == name)
            .ok_or_else(|| HerdError::NotFound(format!("{}/{}", namespace, name)))?;
        pod.annotations_mut().remove(key);
        Ok(())
    }
}

// =============================================================================
// Events
// =============================================================================

#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<ClusterEvent>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ClusterEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl EventRecorder for RecordingEvents {
    async fn record(&self, _cluster: &MySQLCluster, event: ClusterEvent) {
        self.events.lock().push(event);
    }
}
