//! Names shared with the rest of the deployment: users, ports, labels.

/// MySQL user the operator administers instances with.
pub const ADMIN_USER: &str = "sqlherd-admin";
/// MySQL user the sidecar agent connects as.
pub const AGENT_USER: &str = "sqlherd-agent";
/// MySQL user replicas authenticate with.
pub const REPLICATION_USER: &str = "sqlherd-repl";
/// MySQL user a clone recipient authenticates with on the donor.
pub const CLONE_DONOR_USER: &str = "sqlherd-clone-donor";
pub const EXPORTER_USER: &str = "sqlherd-exporter";
pub const BACKUP_USER: &str = "sqlherd-backup";
pub const READ_ONLY_USER: &str = "sqlherd-readonly";
pub const WRITABLE_USER: &str = "sqlherd-writable";

/// Users whose connections survive a connection kill.
///
/// End-user accounts (`READ_ONLY_USER`, `WRITABLE_USER`) are not listed.
pub const SYSTEM_USERS: &[&str] = &[
    ADMIN_USER,
    AGENT_USER,
    REPLICATION_USER,
    CLONE_DONOR_USER,
    EXPORTER_USER,
    BACKUP_USER,
];

pub fn is_system_user(user: &str) -> bool {
    SYSTEM_USERS.contains(&user)
}

// Ports
pub const MYSQL_PORT: u16 = 3306;
pub const MYSQL_ADMIN_PORT: u16 = 33062;
pub const AGENT_PORT: u16 = 9080;

// Labels
pub const LABEL_APP_INSTANCE: &str = "app.kubernetes.io/instance";
pub const LABEL_APP_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_APP_COMPONENT: &str = "app.kubernetes.io/component";
pub const APP_NAME: &str = "mysql";
pub const COMPONENT_MYSQLD: &str = "mysqld";

/// Role label maintained on every instance pod.
pub const LABEL_ROLE: &str = "sqlherd.io/role";
pub const ROLE_PRIMARY: &str = "primary";
pub const ROLE_REPLICA: &str = "replica";

// Annotations

/// Set to `"true"` on the primary pod to request a switchover.
pub const ANN_DEMOTE: &str = "sqlherd.io/demote";
/// Format version of the generated password secret.
pub const ANN_SECRET_VERSION: &str = "sqlherd.io/secret-version";

/// Finalizer held on every cluster object while its manager runs.
pub const FINALIZER: &str = "sqlherd.io/mysqlcluster";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_users() {
        assert!(is_system_user(ADMIN_USER));
        assert!(is_system_user(REPLICATION_USER));
        assert!(!is_system_user(WRITABLE_USER));
        assert!(!is_system_user("root"));
    }
}
