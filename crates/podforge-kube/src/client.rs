//! [`Cluster`] backed by a live Kubernetes API server

use crate::cluster::{Cluster, label_selector};
use crate::error::{ClusterError, Result};
use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret, Service};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt::Debug;

pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// クラスタ内のサービスアカウント、またはローカルの kubeconfig で接続
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| ClusterError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get<K>(&self, kind: &'static str, namespace: &str, name: &str) -> Result<K>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        self.api::<K>(namespace)
            .get(name)
            .await
            .map_err(|e| map_error(e, kind, namespace, name))
    }

    async fn create<K>(&self, kind: &'static str, object: &K) -> Result<K>
    where
        K: Resource<Scope = NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
        <K as Resource>::DynamicType: Default,
    {
        let namespace = object.meta().namespace.clone().unwrap_or_default();
        let name = object.meta().name.clone().unwrap_or_default();
        self.api::<K>(&namespace)
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| map_error(e, kind, &namespace, &name))
    }

    async fn delete<K>(&self, kind: &'static str, namespace: &str, name: &str) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        self.api::<K>(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| map_error(e, kind, namespace, name))
    }
}

/// API のステータスコードをエラー種別に変換
fn map_error(err: kube::Error, kind: &'static str, namespace: &str, name: &str) -> ClusterError {
    match err {
        kube::Error::Api(response) => match response.code {
            404 => ClusterError::not_found(kind, namespace, name),
            409 if response.reason == "AlreadyExists" => {
                ClusterError::already_exists(kind, namespace, name)
            }
            409 => ClusterError::Conflict {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
                message: response.message,
            },
            code => ClusterError::Api {
                code,
                message: response.message,
            },
        },
        other => ClusterError::Client(other.to_string()),
    }
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        self.get("Pod", namespace, name).await
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        tracing::debug!(
            "Creating pod {:?} in {:?}",
            pod.metadata.name,
            pod.metadata.namespace
        );
        self.create("Pod", pod).await
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        tracing::debug!("Deleting pod {}/{}", namespace, name);
        self.delete::<Pod>("Pod", namespace, name).await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        self.get("Secret", namespace, name).await
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap> {
        self.get("ConfigMap", namespace, name).await
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        self.create("ConfigMap", config_map).await
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete::<ConfigMap>("ConfigMap", namespace, name).await
    }

    async fn list_services(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Service>> {
        let params = ListParams::default().labels(&label_selector(labels));
        let list = self
            .api::<Service>(namespace)
            .list(&params)
            .await
            .map_err(|e| map_error(e, "Service", namespace, ""))?;
        Ok(list.items)
    }
}
