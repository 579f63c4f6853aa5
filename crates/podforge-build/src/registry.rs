//! ローカルレジストリを持つクラスタでのレジストリアドレス検出

use crate::error::{BuildError, Result};
use podforge_kube::Cluster;
use serde::Deserialize;
use std::collections::BTreeMap;

/// KEP-1755 `local-registry-hosting` ConfigMap location
pub const LOCAL_REGISTRY_HOSTING_NAMESPACE: &str = "kube-public";
pub const LOCAL_REGISTRY_HOSTING_NAME: &str = "local-registry-hosting";
const LOCAL_REGISTRY_HOSTING_KEY: &str = "localRegistryHosting.v1";

const MINIKUBE_REGISTRY_NAMESPACE: &str = "kube-system";
const MINIKUBE_ADDON_LABEL: &str = "kubernetes.io/minikube-addons";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocalRegistryHostingV1 {
    #[serde(default)]
    host: Option<String>,
}

/// `local-registry-hosting` ConfigMap に記載されたレジストリアドレス
pub async fn get_registry_address(cluster: &dyn Cluster) -> Result<Option<String>> {
    let config_map = match cluster
        .get_config_map(LOCAL_REGISTRY_HOSTING_NAMESPACE, LOCAL_REGISTRY_HOSTING_NAME)
        .await
    {
        Ok(config_map) => config_map,
        Err(e) if e.is_not_found() => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let Some(raw) = config_map
        .data
        .as_ref()
        .and_then(|data| data.get(LOCAL_REGISTRY_HOSTING_KEY))
    else {
        return Ok(None);
    };

    let hosting: LocalRegistryHostingV1 =
        serde_yaml::from_str(raw).map_err(|e| BuildError::RegistryHosting(e.to_string()))?;
    Ok(hosting.host.filter(|host| !host.is_empty()))
}

/// Minikube の registry アドオンのアドレス (`<clusterIP>[:port]`)
pub async fn find_minikube_registry(cluster: &dyn Cluster) -> Result<Option<String>> {
    let mut labels = BTreeMap::new();
    labels.insert(MINIKUBE_ADDON_LABEL.to_string(), "registry".to_string());

    let services = cluster
        .list_services(MINIKUBE_REGISTRY_NAMESPACE, &labels)
        .await?;
    let Some(service) = services.into_iter().next() else {
        return Ok(None);
    };

    let spec = service.spec.unwrap_or_default();
    let ip = spec.cluster_ip.unwrap_or_default();
    let port = spec
        .ports
        .and_then(|ports| ports.first().map(|p| p.port))
        .filter(|port| *port > 0 && *port != 80);

    Ok(Some(match port {
        Some(port) => format!("{}:{}", ip, port),
        None => ip,
    }))
}

/// 既知の検出方法を順に試す
pub async fn discover_registry_address(cluster: &dyn Cluster) -> Result<Option<String>> {
    if let Some(address) = get_registry_address(cluster).await? {
        tracing::debug!("Using registry from local-registry-hosting: {}", address);
        return Ok(Some(address));
    }
    let address = find_minikube_registry(cluster).await?;
    if let Some(address) = &address {
        tracing::debug!("Using minikube registry addon: {}", address);
    }
    Ok(address)
}
