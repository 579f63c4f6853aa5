use podforge_core::ModelError;
use podforge_kube::ClusterError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("unsupported secret type for registry authentication: {0}")]
    UnsupportedSecret(String),

    #[error("unsupported registry config map: {0}")]
    UnsupportedConfigMap(String),

    #[error("Invalid local registry hosting config: {0}")]
    RegistryHosting(String),

    #[error("Invalid build resource: {0}")]
    InvalidResource(String),

    #[error("Build {key} is locked by {holder}")]
    Locked { key: String, holder: String },

    #[error("Build {0} not found")]
    NotFound(String),

    #[error("Write conflict on build {key}: stored version {stored}, got {given}")]
    Conflict { key: String, stored: u64, given: u64 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    pub fn is_not_found(&self) -> bool {
        match self {
            BuildError::NotFound(_) => true,
            BuildError::Cluster(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// 再度 reconcile すれば成功する可能性がある
    pub fn is_retryable(&self) -> bool {
        match self {
            BuildError::Conflict { .. } | BuildError::Locked { .. } => true,
            BuildError::Cluster(e) => matches!(
                e,
                ClusterError::Conflict { .. } | ClusterError::Api { .. } | ClusterError::Client(_)
            ),
            _ => false,
        }
    }

    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            BuildError::UnsupportedSecret(name) => format!(
                "Secret {} does not hold registry credentials in a supported format.\n\
                 \n\
                 Supported keys: kaniko-secret.json, config.json, .dockercfg, .dockerconfigjson",
                name
            ),
            BuildError::Conflict { key, .. } => format!(
                "Build {} was modified concurrently. Load it again and retry.",
                key
            ),
            BuildError::Locked { key, holder } => format!(
                "Build {} is being written by {}. Retry once it finishes.",
                key, holder
            ),
            _ => format!("{}", self),
        }
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;
