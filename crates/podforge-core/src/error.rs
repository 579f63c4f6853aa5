use thiserror::Error;

use crate::model::{BuildStrategy, PublishStrategy};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("BuildStrategy {build_strategy} with PublishStrategy {publish_strategy} is not supported")]
    UnsupportedStrategy {
        build_strategy: BuildStrategy,
        publish_strategy: PublishStrategy,
    },

    #[error("Invalid build name: {0:?}")]
    InvalidName(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
