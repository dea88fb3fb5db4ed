//! Credentials read from Kubernetes secrets.

use crate::constants::ANN_SECRET_VERSION;
use crate::error::{HerdError, Result};
use crate::types::AccessInfo;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use std::fmt;

/// Format version of the generated password secret.
pub const PASSWORD_VERSION: &str = "1";

pub const ADMIN_PASSWORD_KEY: &str = "ADMIN_PASSWORD";
pub const AGENT_PASSWORD_KEY: &str = "AGENT_PASSWORD";
pub const REPLICATION_PASSWORD_KEY: &str = "REPLICATION_PASSWORD";
pub const CLONE_DONOR_PASSWORD_KEY: &str = "CLONE_DONOR_PASSWORD";
pub const EXPORTER_PASSWORD_KEY: &str = "EXPORTER_PASSWORD";
pub const BACKUP_PASSWORD_KEY: &str = "BACKUP_PASSWORD";
pub const READ_ONLY_PASSWORD_KEY: &str = "READONLY_PASSWORD";
pub const WRITABLE_PASSWORD_KEY: &str = "WRITABLE_PASSWORD";

// Keys of the external replication source secret.
pub const SOURCE_HOST_KEY: &str = "HOST";
pub const SOURCE_PORT_KEY: &str = "PORT";
pub const SOURCE_USER_KEY: &str = "USER";
pub const SOURCE_PASSWORD_KEY: &str = "PASSWORD";
pub const SOURCE_INIT_USER_KEY: &str = "INIT_USER";
pub const SOURCE_INIT_PASSWORD_KEY: &str = "INIT_PASSWORD";

/// Passwords of the MySQL users managed for a cluster.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct MySQLPassword {
    pub admin: String,
    pub agent: String,
    pub replicator: String,
    pub donor: String,
    pub exporter: String,
    pub backup: String,
    pub read_only: String,
    pub writable: String,
}

impl fmt::Debug for MySQLPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MySQLPassword { .. }")
    }
}

impl MySQLPassword {
    /// Parse the user secret. Every key must be present.
    pub fn from_secret(secret: &Secret) -> Result<Self> {
        let name = secret.name_any();
        let version = secret.annotations().get(ANN_SECRET_VERSION);
        if version.map(String::as_str) != Some(PASSWORD_VERSION) {
            return Err(HerdError::InvalidSecret {
                name,
                reason: format!("missing or unsupported {} annotation", ANN_SECRET_VERSION),
            });
        }

        Ok(Self {
            admin: secret_value(secret, ADMIN_PASSWORD_KEY)?,
            agent: secret_value(secret, AGENT_PASSWORD_KEY)?,
            replicator: secret_value(secret, REPLICATION_PASSWORD_KEY)?,
            donor: secret_value(secret, CLONE_DONOR_PASSWORD_KEY)?,
            exporter: secret_value(secret, EXPORTER_PASSWORD_KEY)?,
            backup: secret_value(secret, BACKUP_PASSWORD_KEY)?,
            read_only: secret_value(secret, READ_ONLY_PASSWORD_KEY)?,
            writable: secret_value(secret, WRITABLE_PASSWORD_KEY)?,
        })
    }
}

/// External source of an intermediate primary, with the credentials used
/// for the initial clone.
#[derive(Clone, PartialEq, Eq)]
pub struct ReplicationSource {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub init_user: String,
    pub init_password: String,
}

impl fmt::Debug for ReplicationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicationSource")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl ReplicationSource {
    pub fn from_secret(secret: &Secret) -> Result<Self> {
        let port_str = secret_value(secret, SOURCE_PORT_KEY)?;
        let port = match port_str.trim().parse::<u16>() {
            Ok(p) if p > 0 => p,
            _ => {
                return Err(HerdError::InvalidSecret {
                    name: secret.name_any(),
                    reason: format!("bad port number {:?}", port_str),
                })
            }
        };

        Ok(Self {
            host: secret_value(secret, SOURCE_HOST_KEY)?,
            port,
            user: secret_value(secret, SOURCE_USER_KEY)?,
            password: secret_value(secret, SOURCE_PASSWORD_KEY)?,
            init_user: secret_value(secret, SOURCE_INIT_USER_KEY)?,
            init_password: secret_value(secret, SOURCE_INIT_PASSWORD_KEY)?,
        })
    }

    /// Coordinates for `CHANGE REPLICATION SOURCE`.
    pub fn access_info(&self) -> AccessInfo {
        AccessInfo {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
        }
    }
}

fn secret_value(secret: &Secret, key: &str) -> Result<String> {
    let data = secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .ok_or_else(|| HerdError::InvalidSecret {
            name: secret.name_any(),
            reason: format!("no {} in secret", key),
        })?;
    String::from_utf8(data.0.clone()).map_err(|_| HerdError::InvalidSecret {
        name: secret.name_any(),
        reason: format!("{} is not valid UTF-8", key),
    })
}
