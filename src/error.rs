//! Error types for sqlherd.
//!
//! This module provides a unified error type [`HerdError`] for the clustering
//! core and its collaborators, along with a convenient [`Result`] type alias.
//!
//! # Error Categories
//!
//! - **Topology**: GTID divergence, missing failover candidates, purged binlogs
//! - **Resource store**: missing records, optimistic-concurrency conflicts
//! - **Instance access**: database, agent and timeout errors
//! - **Configuration**: invalid settings or malformed secrets
//!
//! # Example
//!
//! ```rust
//! use sqlherd::error::{HerdError, Result};
//!
//! fn pick(candidates: &[usize]) -> Result<usize> {
//!     candidates.first().copied().ok_or(HerdError::NoTopRunner)
//! }
//!
//! assert!(pick(&[]).is_err());
//! assert!(HerdError::Conflict("stale".into()).is_conflict());
//! ```

use thiserror::Error;

/// Main error type for sqlherd operations.
#[derive(Error, Debug)]
pub enum HerdError {
    // Topology errors
    #[error("detected errant transactions: set1={set1}, set2={set2}")]
    ErrantTransactions { set1: String, set2: String },

    #[error("unable to determine the top runner")]
    NoTopRunner,

    #[error("instance {index} cannot replicate: primary purged {purged} but the instance executed {executed}")]
    PurgedTransactions {
        index: usize,
        purged: String,
        executed: String,
    },

    #[error("too few pods; {actual} pods exist for {expected} replicas")]
    PodCountMismatch { expected: usize, actual: usize },

    #[error("bad pod name: {0}")]
    BadPodName(String),

    // Instance access errors
    #[error("timeout")]
    Timeout,

    #[error("nop")]
    Nop,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Instance {index} is unavailable: {reason}")]
    InstanceUnavailable { index: usize, reason: String },

    // Resource store errors
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Invalid secret {name}: {reason}")]
    InvalidSecret { name: String, reason: String },

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HerdError {
    /// Check if error is an optimistic-concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        match self {
            HerdError::Conflict(_) => true,
            HerdError::Kube(kube::Error::Api(ae)) => ae.code == 409,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for HerdError {
    fn from(e: serde_json::Error) -> Self {
        HerdError::Serialization(e.to_string())
    }
}

impl From<tonic::Status> for HerdError {
    fn from(s: tonic::Status) -> Self {
        HerdError::Agent(format!("{}: {}", s.code(), s.message()))
    }
}

impl From<tonic::transport::Error> for HerdError {
    fn from(e: tonic::transport::Error) -> Self {
        HerdError::Agent(e.to_string())
    }
}

/// Result type alias for sqlherd operations.
pub type Result<T> = std::result::Result<T, HerdError>;
