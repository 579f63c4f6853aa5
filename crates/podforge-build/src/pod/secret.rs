//! レジストリ認証情報と CA の対応表
//!
//! ビルダーごとに扱える Secret / ConfigMap の形式は決まっている。
//! 既知のキーがあるかどうかで形式を判定し、表の最初に一致したものを使う。

use crate::error::{BuildError, Result};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, EnvVar, KeyToPath, SecretVolumeSource, Volume, VolumeMount,
};
use podforge_kube::Cluster;

const REGISTRY_SECRET_VOLUME: &str = "registry-secret";
const REGISTRY_CONFIG_VOLUME: &str = "registry-config";

/// 旧形式 `~/.dockercfg` の Secret キー
pub const DOCKER_CONFIG_KEY: &str = ".dockercfg";
/// `~/.docker/config.json` の Secret キー
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrySecret {
    /// Secret から探すキー
    pub file_name: &'static str,
    pub mount_path: &'static str,
    /// `mount_path` 配下のファイル名
    pub destination: &'static str,
    /// マウントしたファイルを指す環境変数
    pub ref_env: Option<&'static str>,
}

impl RegistrySecret {
    pub fn file_path(&self) -> String {
        format!("{}/{}", self.mount_path, self.destination)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfigMap {
    pub file_name: &'static str,
    pub mount_path: &'static str,
    pub destination: &'static str,
}

pub const GCR_KANIKO_REGISTRY_SECRET: RegistrySecret = RegistrySecret {
    file_name: "kaniko-secret.json",
    mount_path: "/secret",
    destination: "kaniko-secret.json",
    ref_env: Some("GOOGLE_APPLICATION_CREDENTIALS"),
};

pub const PLAIN_DOCKER_KANIKO_REGISTRY_SECRET: RegistrySecret = RegistrySecret {
    file_name: "config.json",
    mount_path: "/kaniko/.docker",
    destination: "config.json",
    ref_env: None,
};

pub const STANDARD_DOCKER_KANIKO_REGISTRY_SECRET: RegistrySecret = RegistrySecret {
    file_name: DOCKER_CONFIG_JSON_KEY,
    mount_path: "/kaniko/.docker",
    destination: "config.json",
    ref_env: None,
};

pub const KANIKO_REGISTRY_SECRETS: &[RegistrySecret] = &[
    GCR_KANIKO_REGISTRY_SECRET,
    PLAIN_DOCKER_KANIKO_REGISTRY_SECRET,
    STANDARD_DOCKER_KANIKO_REGISTRY_SECRET,
];

/// Needs rewriting into an `{"auths": ...}` document before Buildah can use it
pub const PLAIN_DOCKER_BUILDAH_REGISTRY_SECRET: RegistrySecret = RegistrySecret {
    file_name: DOCKER_CONFIG_KEY,
    mount_path: "/buildah/.docker",
    destination: "config.json",
    ref_env: None,
};

pub const STANDARD_DOCKER_BUILDAH_REGISTRY_SECRET: RegistrySecret = RegistrySecret {
    file_name: DOCKER_CONFIG_JSON_KEY,
    mount_path: "/buildah/.docker",
    destination: "config.json",
    ref_env: Some("REGISTRY_AUTH_FILE"),
};

pub const BUILDAH_REGISTRY_SECRETS: &[RegistrySecret] = &[
    PLAIN_DOCKER_BUILDAH_REGISTRY_SECRET,
    STANDARD_DOCKER_BUILDAH_REGISTRY_SECRET,
];

pub const SERVICE_CA_BUILDAH_REGISTRY_CONFIG_MAP: RegistryConfigMap = RegistryConfigMap {
    file_name: "service-ca.crt",
    mount_path: "/etc/containers/certs.d",
    destination: "service-ca.crt",
};

pub const BUILDAH_REGISTRY_CONFIG_MAPS: &[RegistryConfigMap] =
    &[SERVICE_CA_BUILDAH_REGISTRY_CONFIG_MAP];

/// Secret を取得し、どの認証情報の形式かを判定
pub async fn get_registry_secret(
    cluster: &dyn Cluster,
    namespace: &str,
    name: &str,
    table: &[RegistrySecret],
) -> Result<RegistrySecret> {
    let secret = cluster.get_secret(namespace, name).await?;
    let has_key = |key: &str| {
        secret.data.as_ref().is_some_and(|d| d.contains_key(key))
            || secret.string_data.as_ref().is_some_and(|d| d.contains_key(key))
    };

    table
        .iter()
        .find(|entry| has_key(entry.file_name))
        .copied()
        .ok_or_else(|| BuildError::UnsupportedSecret(format!("{}/{}", namespace, name)))
}

/// ConfigMap を取得し、どの CA バンドルの形式かを判定
pub async fn get_registry_config_map(
    cluster: &dyn Cluster,
    namespace: &str,
    name: &str,
    table: &[RegistryConfigMap],
) -> Result<RegistryConfigMap> {
    let config_map = cluster.get_config_map(namespace, name).await?;
    let has_key = |key: &str| {
        config_map.data.as_ref().is_some_and(|d| d.contains_key(key))
            || config_map
                .binary_data
                .as_ref()
                .is_some_and(|d| d.contains_key(key))
    };

    table
        .iter()
        .find(|entry| has_key(entry.file_name))
        .copied()
        .ok_or_else(|| BuildError::UnsupportedConfigMap(format!("{}/{}", namespace, name)))
}

/// 1つのビルダーコンテナ用に集めたボリューム・マウント・環境変数
#[derive(Debug, Default, Clone)]
pub struct ContainerMounts {
    pub volumes: Vec<Volume>,
    pub volume_mounts: Vec<VolumeMount>,
    pub env: Vec<EnvVar>,
}

impl ContainerMounts {
    pub fn add_env(&mut self, name: &str, value: impl Into<String>) {
        self.env.push(EnvVar {
            name: name.to_string(),
            value: Some(value.into()),
            ..Default::default()
        });
    }

    pub fn add_registry_secret(&mut self, secret_name: &str, secret: &RegistrySecret) {
        self.volumes.push(Volume {
            name: REGISTRY_SECRET_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret_name.to_string()),
                items: Some(vec![KeyToPath {
                    key: secret.file_name.to_string(),
                    path: secret.destination.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        });
        self.volume_mounts.push(VolumeMount {
            name: REGISTRY_SECRET_VOLUME.to_string(),
            mount_path: secret.mount_path.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
        if let Some(env) = secret.ref_env {
            self.add_env(env, secret.file_path());
        }
    }

    pub fn add_registry_config_map(&mut self, config_map_name: &str, config: &RegistryConfigMap) {
        self.volumes.push(Volume {
            name: REGISTRY_CONFIG_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: config_map_name.to_string(),
                items: Some(vec![KeyToPath {
                    key: config.file_name.to_string(),
                    path: config.destination.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        });
        self.volume_mounts.push(VolumeMount {
            name: REGISTRY_CONFIG_VOLUME.to_string(),
            mount_path: config.mount_path.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }
}
