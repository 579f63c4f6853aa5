//! テストとドライラン用のインメモリ [`Cluster`]
//!
//! Behaves like an API server without controllers: objects keep whatever
//! status they were created with until a test changes it.

use crate::cluster::Cluster;
use crate::error::{ClusterError, Result};
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, PodStatus, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

type Key = (String, String);

/// 記録する呼び出しの上限 (古いものから捨てる)
pub const MAX_RECORDED_CALLS: usize = 1024;

#[derive(Default)]
struct FakeState {
    pods: BTreeMap<Key, Pod>,
    secrets: BTreeMap<Key, Secret>,
    config_maps: BTreeMap<Key, ConfigMap>,
    services: BTreeMap<Key, Service>,
    /// Deleted pods stay around as terminating until reaped
    linger_deleted_pods: bool,
    fail_next: Option<String>,
    calls: VecDeque<String>,
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<FakeState>,
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn key_of(meta: &ObjectMeta) -> Key {
    (
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    )
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_secret(self, secret: Secret) -> Self {
        self.insert_secret(secret);
        self
    }

    pub fn with_config_map(self, config_map: ConfigMap) -> Self {
        self.insert_config_map(config_map);
        self
    }

    pub fn with_service(self, service: Service) -> Self {
        self.insert_service(service);
        self
    }

    pub fn insert_secret(&self, secret: Secret) {
        let key = key_of(&secret.metadata);
        self.state().secrets.insert(key, secret);
    }

    pub fn insert_config_map(&self, config_map: ConfigMap) {
        let key = key_of(&config_map.metadata);
        self.state().config_maps.insert(key, config_map);
    }

    pub fn insert_service(&self, service: Service) {
        let key = key_of(&service.metadata);
        self.state().services.insert(key, service);
    }

    pub fn insert_pod(&self, pod: Pod) {
        let key = key_of(&pod.metadata);
        self.state().pods.insert(key, pod);
    }

    pub fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        self.state().pods.get(&key(namespace, name)).cloned()
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.state().config_maps.get(&key(namespace, name)).cloned()
    }

    /// Replace the status of a pod, as the kubelet would
    pub fn set_pod_status(&self, namespace: &str, name: &str, status: PodStatus) -> bool {
        match self.state().pods.get_mut(&key(namespace, name)) {
            Some(pod) => {
                pod.status = Some(status);
                true
            }
            None => false,
        }
    }

    pub fn set_pod_phase(&self, namespace: &str, name: &str, phase: &str) -> bool {
        self.set_pod_status(
            namespace,
            name,
            PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            },
        )
    }

    /// Keep deleted pods as terminating until [`FakeCluster::reap_pods`] runs
    pub fn set_linger_deleted_pods(&self, linger: bool) {
        self.state().linger_deleted_pods = linger;
    }

    /// 削除中の Pod をすべて消す
    pub fn reap_pods(&self) {
        self.state()
            .pods
            .retain(|_, pod| pod.metadata.deletion_timestamp.is_none());
    }

    /// 次の呼び出しを一時的な API エラーで失敗させる
    pub fn fail_next_call(&self, message: impl Into<String>) {
        self.state().fail_next = Some(message.into());
    }

    /// 直近の操作 (例: `delete_pod test/name`)。古い順
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.iter().cloned().collect()
    }

    fn record(&self, call: String) -> Result<()> {
        let mut state = self.state();
        if state.calls.len() == MAX_RECORDED_CALLS {
            state.calls.pop_front();
        }
        state.calls.push_back(call);
        match state.fail_next.take() {
            Some(message) => Err(ClusterError::Api { code: 503, message }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Cluster for FakeCluster {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        self.record(format!("get_pod {}/{}", namespace, name))?;
        self.pod(namespace, name)
            .ok_or_else(|| ClusterError::not_found("Pod", namespace, name))
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        let (namespace, name) = key_of(&pod.metadata);
        self.record(format!("create_pod {}/{}", namespace, name))?;

        let mut state = self.state();
        if state.pods.contains_key(&key(&namespace, &name)) {
            return Err(ClusterError::already_exists("Pod", &namespace, &name));
        }
        let mut created = pod.clone();
        created.metadata.creation_timestamp = Some(Time(Utc::now()));
        state.pods.insert(key(&namespace, &name), created.clone());
        Ok(created)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        self.record(format!("delete_pod {}/{}", namespace, name))?;

        let mut state = self.state();
        let linger = state.linger_deleted_pods;
        let key = key(namespace, name);
        let Some(pod) = state.pods.get_mut(&key) else {
            return Err(ClusterError::not_found("Pod", namespace, name));
        };
        if linger {
            if pod.metadata.deletion_timestamp.is_none() {
                pod.metadata.deletion_timestamp = Some(Time(Utc::now()));
            }
            return Ok(());
        }
        state.pods.remove(&key);
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        self.record(format!("get_secret {}/{}", namespace, name))?;
        self.state()
            .secrets
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ClusterError::not_found("Secret", namespace, name))
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap> {
        self.record(format!("get_config_map {}/{}", namespace, name))?;
        self.config_map(namespace, name)
            .ok_or_else(|| ClusterError::not_found("ConfigMap", namespace, name))
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        let (namespace, name) = key_of(&config_map.metadata);
        self.record(format!("create_config_map {}/{}", namespace, name))?;

        let mut state = self.state();
        if state.config_maps.contains_key(&key(&namespace, &name)) {
            return Err(ClusterError::already_exists("ConfigMap", &namespace, &name));
        }
        state
            .config_maps
            .insert(key(&namespace, &name), config_map.clone());
        Ok(config_map.clone())
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        self.record(format!("delete_config_map {}/{}", namespace, name))?;
        self.state()
            .config_maps
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| ClusterError::not_found("ConfigMap", namespace, name))
    }

    async fn list_services(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Service>> {
        self.record(format!("list_services {}", namespace))?;
        let state = self.state();
        let services = state
            .services
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .filter(|(_, service)| {
                let service_labels = service.metadata.labels.clone().unwrap_or_default();
                labels
                    .iter()
                    .all(|(k, v)| service_labels.get(k) == Some(v))
            })
            .map(|(_, service)| service.clone())
            .collect();
        Ok(services)
    }
}
