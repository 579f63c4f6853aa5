//! podforge ビルドエンジン
//!
//! コンテナイメージのビルドを Kubernetes のワーカー Pod で実行する。
//! [`Build`] は [`Builder::reconcile`] の呼び出しごとに [`Action`] 1つ分だけ
//! フェーズを進める。呼び出す頻度は呼び出し側が決める。
//!
//! [`Build`]: podforge_core::Build

pub mod action;
pub mod backoff;
pub mod builder;
pub mod error;
pub mod pod;
pub mod registry;
pub mod resources;
pub mod scheduler;
pub mod store;

pub use action::{Action, ActionContext};
pub use backoff::Backoff;
pub use builder::Builder;
pub use error::{BuildError, Result};
pub use pod::{build_pod_name, new_build_pod};
pub use resources::Resource;
pub use scheduler::Scheduler;
pub use store::{BuildStore, FileBuildStore, MemoryBuildStore};
