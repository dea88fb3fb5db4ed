//! Status gathering and cluster state classification.

use super::quorum::required_acks;
use super::ClusterContext;
use crate::config::StatusCheckConfig;
use crate::constants::ANN_DEMOTE;
use crate::crd::{ClusterKey, MySQLCluster};
use crate::dbop::{DatabaseOperator, OperatorSet};
use crate::error::{HerdError, Result};
use crate::password::MySQLPassword;
use crate::resilience::{RetryConfig, RetryExecutor};
use crate::types::{ClusterState, MySQLInstanceStatus};
use futures::future::join_all;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, warn};

/// Everything one evaluation cycle knows about a cluster.
///
/// The set owns the operators of the cycle; dropping it closes them.
#[derive(Debug)]
pub struct StatusSet {
    pub primary: usize,
    pub cluster: MySQLCluster,
    pub password: MySQLPassword,
    /// Pods indexed by instance ordinal.
    pub pods: Vec<Pod>,
    pub ops: OperatorSet,
    /// Live status per instance; `None` when the instance could not be read.
    pub mysql_status: Vec<Option<MySQLInstanceStatus>>,
    /// Executed GTID set of the primary, re-read after the other instances.
    pub executed_gtid: String,
    pub errants: Vec<usize>,
    /// Switchover targets, sorted.
    pub candidates: Vec<usize>,
    pub need_switch: bool,
    pub candidate: usize,
    pub state: ClusterState,
}

/// Outcome of [`classify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub state: ClusterState,
    pub candidates: Vec<usize>,
    pub need_switch: bool,
    pub candidate: usize,
}

impl StatusSet {
    /// Classify the set and record the result in it.
    pub fn decide_state(&mut self) {
        let c = classify(self);
        self.state = c.state;
        self.candidates = c.candidates;
        self.need_switch = c.need_switch;
        self.candidate = c.candidate;
    }

    pub fn is_errant(&self, index: usize) -> bool {
        matches!(&self.mysql_status[index], Some(st) if st.is_errant)
    }

    pub fn primary_status(&self) -> Option<&MySQLInstanceStatus> {
        self.mysql_status[self.primary].as_ref()
    }

    /// Instances that are not the primary.
    pub fn replica_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.mysql_status.len()).filter(move |&i| i != self.primary)
    }
}

// ============================================================================
// Gathering
// ============================================================================

/// Read the cluster record, its credentials and pods, then the live status
/// of every instance, and classify the result.
pub async fn gather_status(ctx: &ClusterContext, key: &ClusterKey) -> Result<StatusSet> {
    let cluster = ctx.store.get_cluster(key).await?;
    let primary = cluster.current_primary_index();
    let replicas = cluster.replicas();

    let secret = ctx
        .store
        .get_secret(&key.namespace, &cluster.user_secret_name())
        .await?;
    let password = MySQLPassword::from_secret(&secret)?;

    let pod_list = ctx.store.list_pods(&cluster).await?;
    if pod_list.len() != replicas {
        return Err(HerdError::PodCountMismatch {
            expected: replicas,
            actual: pod_list.len(),
        });
    }
    if primary >= replicas {
        return Err(HerdError::Internal(format!(
            "current primary index {} is out of range for {} replicas",
            primary, replicas
        )));
    }
    let pods = index_pods(pod_list, replicas)?;

    let mut ops = OperatorSet::new();
    for i in 0..replicas {
        ops.push(ctx.operators.create(&cluster, &password, i).await?);
    }

    let mut mysql_status = join_all(
        ops.iter()
            .enumerate()
            .map(|(i, op)| fetch_status(op, i, &ctx.config.status)),
    )
    .await;

    // replicas may have advanced while the others were queried
    let mut executed_gtid = String::new();
    if mysql_status[primary].is_some() {
        tokio::time::sleep(ctx.config.status.primary_settle).await;
        let pst = ops[primary]
            .get_status()
            .await
            .map_err(|e| HerdError::InstanceUnavailable {
                index: primary,
                reason: format!("failed to re-check the primary: {}", e),
            })?;
        executed_gtid = pst.global_variables.executed_gtid.clone();
        mysql_status[primary] = Some(pst);
    }

    let mut errants = Vec::new();
    if !executed_gtid.is_empty() {
        for (i, status) in mysql_status.iter_mut().enumerate() {
            if i == primary {
                continue;
            }
            let Some(ist) = status else { continue };
            let executed = &ist.global_variables.executed_gtid;
            if ops[primary].is_subset_gtid(executed, &executed_gtid).await? {
                continue;
            }
            let diff = ops[primary]
                .subtract_gtid(executed, &executed_gtid)
                .await
                .unwrap_or_default();
            warn!(instance = i, diff = %diff, "Instance has errant transactions");
            ist.is_errant = true;
            errants.push(i);
        }
    } else {
        // The primary is down or lost its data; keep the last known errants.
        let recorded = cluster
            .status
            .as_ref()
            .map(|s| s.errant_replica_list.clone())
            .unwrap_or_default();
        for index in recorded {
            let Ok(index) = usize::try_from(index) else { continue };
            if index >= replicas || errants.contains(&index) {
                continue;
            }
            if let Some(ist) = mysql_status[index].as_mut() {
                ist.is_errant = true;
            }
            errants.push(index);
        }
        errants.sort_unstable();
    }

    let mut ss = StatusSet {
        primary,
        cluster,
        password,
        pods,
        ops,
        mysql_status,
        executed_gtid,
        errants,
        candidates: Vec::new(),
        need_switch: false,
        candidate: 0,
        state: ClusterState::Undecided,
    };
    ss.decide_state();
    Ok(ss)
}

async fn fetch_status(
    op: &dyn DatabaseOperator,
    index: usize,
    config: &StatusCheckConfig,
) -> Option<MySQLInstanceStatus> {
    let retry = RetryExecutor::new(RetryConfig::fixed(
        config.retry_max + 1,
        config.retry_interval,
    ));
    match retry
        .execute_when(|e| !matches!(e, HerdError::Nop), || op.get_status())
        .await
    {
        Ok(status) => Some(status),
        Err(HerdError::Nop) => {
            debug!(instance = index, "Instance address is not resolvable");
            None
        }
        Err(e) => {
            warn!(instance = index, error = %e, "Failed to get mysqld status, mysqld is not ready");
            None
        }
    }
}

/// Instance ordinal encoded as the last `-` separated field of a pod name.
pub fn pod_index(name: &str) -> Result<usize> {
    name.rsplit('-')
        .next()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| HerdError::BadPodName(name.to_string()))
}

fn index_pods(pods: Vec<Pod>, replicas: usize) -> Result<Vec<Pod>> {
    let mut slots: Vec<Option<Pod>> = vec![None; replicas];
    for pod in pods {
        let name = pod.name_any();
        let index = pod_index(&name)?;
        if index >= replicas {
            return Err(HerdError::BadPodName(format!(
                "{}: index {} is out of range",
                name, index
            )));
        }
        if slots[index].replace(pod).is_some() {
            return Err(HerdError::BadPodName(format!("{}: duplicate index", name)));
        }
    }
    Ok(slots.into_iter().flatten().collect())
}

// ============================================================================
// Classification
// ============================================================================

/// Decide the state of a gathered set. The first matching rule wins.
///
/// Switchover candidates come from the rule that matched (`Healthy` or
/// `Degraded`); the lowest ordinal is picked.
pub fn classify(ss: &StatusSet) -> Classification {
    let (state, mut candidates) = if is_cloning(ss) {
        (ClusterState::Cloning, Vec::new())
    } else if is_restoring(ss) {
        (ClusterState::Restoring, Vec::new())
    } else if let Some(candidates) = healthy(ss) {
        (ClusterState::Healthy, candidates)
    } else if let Some(candidates) = degraded(ss) {
        (ClusterState::Degraded, candidates)
    } else if is_failed(ss) {
        (ClusterState::Failed, Vec::new())
    } else if is_lost(ss) {
        (ClusterState::Lost, Vec::new())
    } else {
        (ClusterState::Incomplete, Vec::new())
    };

    candidates.sort_unstable();
    let (need_switch, candidate) = match candidates.first() {
        Some(&first) => (needs_switch(&ss.pods[ss.primary]), first),
        None => (false, 0),
    };

    Classification {
        state,
        candidates,
        need_switch,
        candidate,
    }
}

pub fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

/// The pod is going away or was asked to give up the primary role.
pub fn needs_switch(pod: &Pod) -> bool {
    if pod.metadata.deletion_timestamp.is_some() {
        return true;
    }
    pod.annotations().get(ANN_DEMOTE).map(String::as_str) == Some("true")
}

/// Replicas attached to the primary whose server id belongs to this cluster.
fn replicas_in_cluster(ss: &StatusSet, pst: &MySQLInstanceStatus) -> usize {
    let base = i64::from(ss.cluster.spec.server_id_base);
    let end = base + i64::from(ss.cluster.spec.replicas);
    pst.replica_hosts
        .iter()
        .filter(|r| (base..end).contains(&i64::from(r.server_id)))
        .count()
}

/// The primary has no transactions while some replica does.
fn lost_data(ss: &StatusSet) -> bool {
    if !ss.executed_gtid.is_empty() {
        return false;
    }
    ss.replica_indices().any(|i| {
        ss.mysql_status[i]
            .as_ref()
            .is_some_and(|st| !st.global_variables.executed_gtid.is_empty())
    })
}

/// The primary is read-only exactly when it replicates from an external source.
fn primary_posture_ok(ss: &StatusSet, pst: &MySQLInstanceStatus) -> bool {
    if ss.cluster.is_intermediate() {
        pst.global_variables.super_read_only
    } else {
        !pst.global_variables.read_only
    }
}

/// Replica `i` is read-only, error-free and replicating from the primary.
fn replica_in_sync(ss: &StatusSet, i: usize, primary_host: &str) -> bool {
    let Some(st) = &ss.mysql_status[i] else {
        return false;
    };
    !st.is_errant
        && st.global_variables.super_read_only
        && st
            .replica_status
            .as_ref()
            .is_some_and(|rs| rs.source_host == primary_host)
}

fn is_cloning(ss: &StatusSet) -> bool {
    if !ss.cluster.is_intermediate() {
        return false;
    }
    if ss.cluster.status.as_ref().is_some_and(|s| s.cloned) {
        return false;
    }
    match ss.primary_status() {
        None => true,
        Some(pst) => match &pst.clone_status {
            Some(cs) => !cs.is_completed(),
            None => pst.global_variables.executed_gtid.is_empty(),
        },
    }
}

fn is_restoring(ss: &StatusSet) -> bool {
    if ss.cluster.spec.restore.is_none() {
        return false;
    }
    ss.cluster
        .status
        .as_ref()
        .map_or(true, |s| s.restored_time.is_none())
}

fn healthy(ss: &StatusSet) -> Option<Vec<usize>> {
    if !ss.pods.iter().all(is_pod_ready) {
        return None;
    }

    let primary_host = ss.cluster.pod_hostname(ss.primary);
    let mut candidates = Vec::new();
    for i in ss.replica_indices() {
        if !replica_in_sync(ss, i, &primary_host) {
            return None;
        }
        candidates.push(i);
    }

    let pst = ss.primary_status()?;
    if replicas_in_cluster(ss, pst) != ss.cluster.replicas().saturating_sub(1) {
        return None;
    }
    if !primary_posture_ok(ss, pst) {
        return None;
    }
    Some(candidates)
}

fn degraded(ss: &StatusSet) -> Option<Vec<usize>> {
    if !is_pod_ready(&ss.pods[ss.primary]) || lost_data(ss) {
        return None;
    }
    let pst = ss.primary_status()?;
    if !primary_posture_ok(ss, pst) {
        return None;
    }

    let n = ss.cluster.replicas();
    let quorum = required_acks(n);
    if replicas_in_cluster(ss, pst) < quorum {
        return None;
    }

    let primary_host = ss.cluster.pod_hostname(ss.primary);
    let candidates: Vec<usize> = ss
        .replica_indices()
        .filter(|&i| is_pod_ready(&ss.pods[i]) && replica_in_sync(ss, i, &primary_host))
        .collect();

    let ok = candidates.len();
    if ok >= quorum && ok != n.saturating_sub(1) {
        Some(candidates)
    } else {
        None
    }
}

/// Non-errant replicas holding data that a failover could promote.
fn promotable_replicas(ss: &StatusSet) -> usize {
    ss.replica_indices()
        .filter(|&i| {
            ss.mysql_status[i].as_ref().is_some_and(|st| {
                st.replica_status.is_some()
                    && !st.is_errant
                    && !st.global_variables.executed_gtid.is_empty()
            })
        })
        .count()
}

fn primary_gone(ss: &StatusSet) -> bool {
    ss.primary_status().is_none() || lost_data(ss)
}

fn is_failed(ss: &StatusSet) -> bool {
    primary_gone(ss) && promotable_replicas(ss) > required_acks(ss.cluster.replicas())
}

fn is_lost(ss: &StatusSet) -> bool {
    primary_gone(ss) && promotable_replicas(ss) <= required_acks(ss.cluster.replicas())
}
