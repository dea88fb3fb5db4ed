//! sqlx-backed operator talking to the admin port of an instance.

use super::{DatabaseOperator, NopOperator, OperatorFactory};
use crate::constants::{is_system_user, ADMIN_USER, MYSQL_ADMIN_PORT};
use crate::crd::MySQLCluster;
use crate::error::{HerdError, Result};
use crate::password::MySQLPassword;
use crate::types::{
    AccessInfo, CloneStatus, GlobalVariables, MySQLInstanceStatus, ReplicaHost, ReplicaStatus,
};
use async_trait::async_trait;
use kube::ResourceExt;
use sqlx::mysql::{MySqlConnectOptions, MySqlDatabaseError, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::Row;
use std::time::Duration;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// `rpl_semi_sync_master_timeout`, 24 hours in milliseconds.
const SEMI_SYNC_SOURCE_TIMEOUT_MS: u64 = 24 * 60 * 60 * 1000;

/// ER_NO_SUCH_THREAD
const ER_NO_SUCH_THREAD: u16 = 1094;

const STATUS_GLOBAL_VARS: &str = "SELECT @@server_uuid, @@gtid_executed, @@gtid_purged, \
     @@read_only, @@super_read_only, @@rpl_semi_sync_master_wait_for_slave_count, \
     @@rpl_semi_sync_master_enabled, @@rpl_semi_sync_slave_enabled";

/// Factory creating a [`SqlOperator`] per instance.
///
/// Instances whose hostname does not resolve get a [`NopOperator`].
#[derive(Debug, Clone, Default)]
pub struct SqlOperatorFactory;

impl SqlOperatorFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl OperatorFactory for SqlOperatorFactory {
    async fn create(
        &self,
        cluster: &MySQLCluster,
        password: &MySQLPassword,
        index: usize,
    ) -> Result<Box<dyn DatabaseOperator>> {
        let name = format!(
            "{}/{}",
            cluster.namespace().unwrap_or_default(),
            cluster.pod_name(index)
        );
        let host = cluster.pod_hostname(index);

        let resolved = match tokio::net::lookup_host((host.as_str(), MYSQL_ADMIN_PORT)).await {
            Ok(mut addrs) => addrs.next().is_some(),
            Err(_) => false,
        };
        if !resolved {
            debug!(instance = %name, host = %host, "Instance address not resolvable");
            return Ok(Box::new(NopOperator::new(name)));
        }

        Ok(Box::new(SqlOperator::connect(name, &host, password)))
    }
}

/// Operator holding a single-connection pool to one instance.
pub struct SqlOperator {
    name: String,
    pool: MySqlPool,
}

impl SqlOperator {
    /// Create the pool. Connections are opened on first use.
    pub fn connect(name: String, host: &str, password: &MySQLPassword) -> Self {
        let options = MySqlConnectOptions::new()
            .host(host)
            .port(MYSQL_ADMIN_PORT)
            .username(ADMIN_USER)
            .password(&password.admin);
        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(CONNECT_TIMEOUT)
            .idle_timeout(IDLE_TIMEOUT)
            .connect_lazy_with(options);
        Self { name, pool }
    }

    async fn exec(&self, sql: &str) -> Result<()> {
        sqlx::raw_sql(sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn global_variables(&self) -> Result<GlobalVariables> {
        let row = sqlx::query(STATUS_GLOBAL_VARS)
            .fetch_one(&self.pool)
            .await?;
        Ok(GlobalVariables {
            uuid: row.try_get(0)?,
            executed_gtid: row.try_get(1)?,
            purged_gtid: row.try_get(2)?,
            read_only: int_at(&row, 3)? != 0,
            super_read_only: int_at(&row, 4)? != 0,
            wait_for_replica_count: int_at(&row, 5)? as u32,
            semi_sync_source_enabled: int_at(&row, 6)? != 0,
            semi_sync_replica_enabled: int_at(&row, 7)? != 0,
        })
    }

    async fn replica_hosts(&self) -> Result<Vec<ReplicaHost>> {
        let rows = sqlx::query("SHOW REPLICAS").fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| -> Result<ReplicaHost> {
                Ok(ReplicaHost {
                    server_id: int_col(row, "Server_Id")? as u32,
                    host: row.try_get("Host")?,
                    port: int_col(row, "Port")? as u16,
                    source_id: int_col(row, "Source_Id")? as u32,
                    replica_uuid: row.try_get("Replica_UUID")?,
                })
            })
            .collect()
    }

    async fn replica_status(&self) -> Result<Option<ReplicaStatus>> {
        let Some(row) = sqlx::query("SHOW REPLICA STATUS")
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(ReplicaStatus {
            last_io_errno: int_col(&row, "Last_IO_Errno")? as i32,
            last_io_error: row.try_get("Last_IO_Error")?,
            last_sql_errno: int_col(&row, "Last_SQL_Errno")? as i32,
            last_sql_error: row.try_get("Last_SQL_Error")?,
            source_host: row.try_get("Source_Host")?,
            retrieved_gtid_set: row.try_get("Retrieved_Gtid_Set")?,
            executed_gtid_set: row.try_get("Executed_Gtid_Set")?,
            replica_io_running: row.try_get("Replica_IO_Running")?,
            replica_sql_running: row.try_get("Replica_SQL_Running")?,
        }))
    }

    async fn clone_status(&self) -> Result<Option<CloneStatus>> {
        let row = sqlx::query("SELECT state FROM performance_schema.clone_status")
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => Ok(Some(CloneStatus {
                state: r.try_get(0)?,
            })),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl DatabaseOperator for SqlOperator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_status(&self) -> Result<MySQLInstanceStatus> {
        Ok(MySQLInstanceStatus {
            is_errant: false,
            global_variables: self.global_variables().await?,
            replica_hosts: self.replica_hosts().await?,
            replica_status: self.replica_status().await?,
            clone_status: self.clone_status().await?,
        })
    }

    async fn is_subset_gtid(&self, set1: &str, set2: &str) -> Result<bool> {
        let row = sqlx::query("SELECT GTID_SUBSET(?, ?)")
            .bind(set1)
            .bind(set2)
            .fetch_one(&self.pool)
            .await?;
        Ok(int_at(&row, 0)? != 0)
    }

    async fn subtract_gtid(&self, set1: &str, set2: &str) -> Result<String> {
        let row = sqlx::query("SELECT GTID_SUBTRACT(?, ?)")
            .bind(set1)
            .bind(set2)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get(0)?)
    }

    async fn configure_replica(&self, source: &AccessInfo, semisync: bool) -> Result<()> {
        self.exec("STOP REPLICA").await?;
        let change = format!(
            "CHANGE REPLICATION SOURCE TO SOURCE_HOST = {}, SOURCE_PORT = {}, \
             SOURCE_USER = {}, SOURCE_PASSWORD = {}, SOURCE_AUTO_POSITION = 1, \
             GET_SOURCE_PUBLIC_KEY = 1",
            quote(&source.host),
            source.port,
            quote(&source.user),
            quote(&source.password)
        );
        self.exec(&change).await?;
        self.exec(&format!(
            "SET GLOBAL rpl_semi_sync_slave_enabled = {}",
            on_off(semisync)
        ))
        .await?;
        self.exec("SET GLOBAL rpl_semi_sync_master_enabled = OFF")
            .await?;
        self.exec("START REPLICA").await
    }

    async fn configure_primary(&self, wait_for_count: u32) -> Result<()> {
        self.exec(&format!(
            "SET GLOBAL rpl_semi_sync_master_timeout = {}",
            SEMI_SYNC_SOURCE_TIMEOUT_MS
        ))
        .await?;
        self.exec(&format!(
            "SET GLOBAL rpl_semi_sync_master_wait_for_slave_count = {}",
            wait_for_count
        ))
        .await?;
        self.exec("SET GLOBAL rpl_semi_sync_master_enabled = ON")
            .await
    }

    async fn stop_replica_io_thread(&self) -> Result<()> {
        self.exec("STOP REPLICA IO_THREAD").await
    }

    async fn wait_for_gtid(&self, gtid_set: &str, timeout_seconds: u32) -> Result<()> {
        let row = sqlx::query("SELECT WAIT_FOR_EXECUTED_GTID_SET(?, ?)")
            .bind(gtid_set)
            .bind(timeout_seconds)
            .fetch_one(&self.pool)
            .await?;
        if int_at(&row, 0)? != 0 {
            return Err(HerdError::Timeout);
        }
        Ok(())
    }

    async fn set_read_only(&self, read_only: bool) -> Result<()> {
        if read_only {
            return self.exec("SET GLOBAL super_read_only = 1").await;
        }
        self.exec("STOP REPLICA").await?;
        self.exec("RESET REPLICA").await?;
        self.exec("SET GLOBAL read_only = 0").await
    }

    async fn kill_connections(&self) -> Result<()> {
        let rows = sqlx::query("SELECT ID, USER, HOST FROM information_schema.PROCESSLIST")
            .fetch_all(&self.pool)
            .await?;

        for row in rows {
            let id = int_at(&row, 0)?;
            let user: String = row.try_get(1)?;
            let host: String = row.try_get(2)?;
            if is_system_user(&user) || host == "localhost" {
                continue;
            }

            if let Err(e) = self.exec(&format!("KILL CONNECTION {}", id)).await {
                if !is_no_such_thread(&e) {
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn close(&self) {
        if self.pool.is_closed() {
            return;
        }
        let pool = self.pool.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { pool.close().await });
        }
    }
}

fn is_no_such_thread(err: &HerdError) -> bool {
    match err {
        HerdError::Database(e) => e
            .as_database_error()
            .and_then(|d| d.try_downcast_ref::<MySqlDatabaseError>())
            .map(|d| d.number() == ER_NO_SUCH_THREAD)
            .unwrap_or(false),
        _ => false,
    }
}

/// Integer columns come back signed, unsigned or as text depending on the
/// server version; accept all three.
fn int_at(row: &MySqlRow, index: usize) -> Result<i64> {
    if let Ok(v) = row.try_get::<i64, _>(index) {
        return Ok(v);
    }
    if let Ok(v) = row.try_get::<u64, _>(index) {
        return Ok(v as i64);
    }
    let s: String = row.try_get(index)?;
    s.trim()
        .parse()
        .map_err(|_| HerdError::Internal(format!("column {} is not an integer: {:?}", index, s)))
}

fn int_col(row: &MySqlRow, column: &str) -> Result<i64> {
    if let Ok(v) = row.try_get::<i64, _>(column) {
        return Ok(v);
    }
    if let Ok(v) = row.try_get::<u64, _>(column) {
        return Ok(v as i64);
    }
    let s: String = row.try_get(column)?;
    s.trim()
        .parse()
        .map_err(|_| HerdError::Internal(format!("column {} is not an integer: {:?}", column, s)))
}

fn on_off(b: bool) -> &'static str {
    if b {
        "ON"
    } else {
        "OFF"
    }
}

/// Quote a string literal for statements that do not accept placeholders.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            '\0' => out.push_str("\\0"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}
