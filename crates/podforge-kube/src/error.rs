//! オーケストレーションバックエンドのエラー型

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("Write conflict on {kind} {namespace}/{name}: {message}")]
    Conflict {
        kind: &'static str,
        namespace: String,
        name: String,
        message: String,
    },

    #[error("Kubernetes API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Kubernetes client error: {0}")]
    Client(String),
}

impl ClusterError {
    pub fn not_found(kind: &'static str, namespace: &str, name: &str) -> Self {
        ClusterError::NotFound {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn already_exists(kind: &'static str, namespace: &str, name: &str) -> Self {
        ClusterError::AlreadyExists {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// "not found" is a distinguished, non-fatal error class
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClusterError::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Conflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, ClusterError>;
