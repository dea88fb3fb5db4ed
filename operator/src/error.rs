//! Error types for the sqlherd operator

use thiserror::Error;

/// Main error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("CRD not installed. Please install the MySQLCluster CRD first.")]
    CrdNotInstalled,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Finalizer error: {0}")]
    Finalizer(#[source] Box<kube::runtime::finalizer::Error<Error>>),

    #[error("Object has no namespace: {0}")]
    MissingNamespace(String),
}

impl From<sqlherd::HerdError> for Error {
    fn from(e: sqlherd::HerdError) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}
