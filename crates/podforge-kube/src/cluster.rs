//! オーケストレーションバックエンドのトレイト定義

use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret, Service};
use std::collections::BTreeMap;

/// CRUD primitives the build engine consumes, keyed by (namespace, name).
///
/// Getting or deleting a missing object fails with
/// [`ClusterError::NotFound`](crate::ClusterError::NotFound); creating an
/// existing one fails with
/// [`ClusterError::AlreadyExists`](crate::ClusterError::AlreadyExists).
#[async_trait]
pub trait Cluster: Send + Sync {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;

    async fn create_pod(&self, pod: &Pod) -> Result<Pod>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret>;

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap>;

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap>;

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()>;

    /// 指定したラベルをすべて持つ namespace 内の Service
    async fn list_services(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Service>>;
}

/// ラベルの組から `k1=v1,k2=v2` 形式のセレクタを作る
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}
