//! Prometheus metrics for the clustering loop.
//!
//! Every series is labelled by cluster `name` and `namespace`. A
//! [`ClusterMetrics`] handle is created per manager process and its series
//! are removed when the process stops.

use crate::crd::{ClusterKey, MySQLClusterStatus};
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, Counter, CounterVec, Gauge,
    GaugeVec, Histogram, HistogramVec,
};

const LABELS: &[&str] = &["name", "namespace"];

lazy_static::lazy_static! {
    pub static ref CHECKS: CounterVec = register_counter_vec!(
        "sqlherd_cluster_checks_total",
        "Number of evaluation cycles run for a cluster",
        LABELS
    ).unwrap();

    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "sqlherd_cluster_errors_total",
        "Number of evaluation cycles that failed",
        LABELS
    ).unwrap();

    pub static ref AVAILABLE: GaugeVec = register_gauge_vec!(
        "sqlherd_cluster_available",
        "1 if the cluster is available, 0 otherwise",
        LABELS
    ).unwrap();

    pub static ref HEALTHY: GaugeVec = register_gauge_vec!(
        "sqlherd_cluster_healthy",
        "1 if the cluster is healthy, 0 otherwise",
        LABELS
    ).unwrap();

    pub static ref SWITCHOVER: CounterVec = register_counter_vec!(
        "sqlherd_cluster_switchover_total",
        "Number of completed switchovers",
        LABELS
    ).unwrap();

    pub static ref FAILOVER: CounterVec = register_counter_vec!(
        "sqlherd_cluster_failover_total",
        "Number of completed failovers",
        LABELS
    ).unwrap();

    pub static ref REPLICAS: GaugeVec = register_gauge_vec!(
        "sqlherd_cluster_replicas",
        "Declared number of instances",
        LABELS
    ).unwrap();

    pub static ref READY_REPLICAS: GaugeVec = register_gauge_vec!(
        "sqlherd_cluster_ready_replicas",
        "Number of instances in sync, the primary included",
        LABELS
    ).unwrap();

    pub static ref ERRANT_REPLICAS: GaugeVec = register_gauge_vec!(
        "sqlherd_cluster_errant_replicas",
        "Number of instances holding errant transactions",
        LABELS
    ).unwrap();

    pub static ref PROCESSING_TIME: HistogramVec = register_histogram_vec!(
        "sqlherd_cluster_processing_time_seconds",
        "Duration of one evaluation cycle",
        LABELS
    ).unwrap();

    pub static ref BACKUP_TIMESTAMP: GaugeVec = register_gauge_vec!(
        "sqlherd_backup_timestamp_seconds",
        "Unix time of the last successful backup",
        LABELS
    ).unwrap();

    pub static ref BACKUP_ELAPSED: GaugeVec = register_gauge_vec!(
        "sqlherd_backup_elapsed_seconds",
        "Time spent on the last successful backup",
        LABELS
    ).unwrap();

    pub static ref BACKUP_DUMP_SIZE: GaugeVec = register_gauge_vec!(
        "sqlherd_backup_dump_bytes",
        "Size of the last full dump",
        LABELS
    ).unwrap();

    pub static ref BACKUP_BINLOG_SIZE: GaugeVec = register_gauge_vec!(
        "sqlherd_backup_binlog_bytes",
        "Size of the binlog archive of the last backup",
        LABELS
    ).unwrap();

    pub static ref BACKUP_WORKDIR_USAGE: GaugeVec = register_gauge_vec!(
        "sqlherd_backup_workdir_usage_bytes",
        "Peak working directory usage of the last backup",
        LABELS
    ).unwrap();

    pub static ref BACKUP_WARNINGS: GaugeVec = register_gauge_vec!(
        "sqlherd_backup_warnings",
        "Number of warnings of the last backup",
        LABELS
    ).unwrap();
}

/// Per-cluster metric children.
#[derive(Clone)]
pub struct ClusterMetrics {
    name: String,
    namespace: String,
    pub checks: Counter,
    pub errors: Counter,
    pub available: Gauge,
    pub healthy: Gauge,
    pub switchover: Counter,
    pub failover: Counter,
    pub replicas: Gauge,
    pub ready_replicas: Gauge,
    pub errant_replicas: Gauge,
    pub processing_time: Histogram,
}

impl ClusterMetrics {
    pub fn new(key: &ClusterKey) -> Self {
        let labels = [key.name.as_str(), key.namespace.as_str()];
        Self {
            name: key.name.clone(),
            namespace: key.namespace.clone(),
            checks: CHECKS.with_label_values(&labels),
            errors: ERRORS.with_label_values(&labels),
            available: AVAILABLE.with_label_values(&labels),
            healthy: HEALTHY.with_label_values(&labels),
            switchover: SWITCHOVER.with_label_values(&labels),
            failover: FAILOVER.with_label_values(&labels),
            replicas: REPLICAS.with_label_values(&labels),
            ready_replicas: READY_REPLICAS.with_label_values(&labels),
            errant_replicas: ERRANT_REPLICAS.with_label_values(&labels),
            processing_time: PROCESSING_TIME.with_label_values(&labels),
        }
    }

    fn labels(&self) -> [&str; 2] {
        [self.name.as_str(), self.namespace.as_str()]
    }

    /// Set the backup gauges from the cluster status, when it has a backup.
    pub fn update_backup(&self, status: &MySQLClusterStatus) {
        let Some(backup) = &status.backup else {
            return;
        };
        let labels = self.labels();
        if let Ok(t) = chrono::DateTime::parse_from_rfc3339(&backup.time) {
            BACKUP_TIMESTAMP
                .with_label_values(&labels)
                .set(t.timestamp() as f64);
        }
        BACKUP_ELAPSED
            .with_label_values(&labels)
            .set(backup.elapsed_seconds);
        BACKUP_DUMP_SIZE
            .with_label_values(&labels)
            .set(backup.dump_size as f64);
        BACKUP_BINLOG_SIZE
            .with_label_values(&labels)
            .set(backup.binlog_size as f64);
        BACKUP_WORKDIR_USAGE
            .with_label_values(&labels)
            .set(backup.work_dir_usage as f64);
        BACKUP_WARNINGS
            .with_label_values(&labels)
            .set(backup.warnings.len() as f64);
    }

    /// Remove every series of this cluster.
    pub fn delete(&self) {
        let labels = self.labels();
        for vec in [&*CHECKS, &*ERRORS, &*SWITCHOVER, &*FAILOVER] {
            let _ = vec.remove_label_values(&labels);
        }
        for vec in [
            &*AVAILABLE,
            &*HEALTHY,
            &*REPLICAS,
            &*READY_REPLICAS,
            &*ERRANT_REPLICAS,
            &*BACKUP_TIMESTAMP,
            &*BACKUP_ELAPSED,
            &*BACKUP_DUMP_SIZE,
            &*BACKUP_BINLOG_SIZE,
            &*BACKUP_WORKDIR_USAGE,
            &*BACKUP_WARNINGS,
        ] {
            let _ = vec.remove_label_values(&labels);
        }
        let _ = PROCESSING_TIME.remove_label_values(&labels);
    }
}
