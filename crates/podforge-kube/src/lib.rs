//! podforge のオーケストレーションバックエンド
//!
//! The engine only needs a handful of CRUD primitives on three resource kinds
//! (Pod, Secret, ConfigMap) plus Service listing for registry discovery.
//! [`Cluster`] is that seam; [`KubeCluster`] talks to a real API server and
//! [`FakeCluster`] keeps everything in memory for tests and dry runs.

pub mod client;
pub mod cluster;
pub mod error;
pub mod fake;

// Re-exports
pub use client::KubeCluster;
pub use cluster::{Cluster, label_selector};
pub use error::{ClusterError, Result};
pub use fake::FakeCluster;
