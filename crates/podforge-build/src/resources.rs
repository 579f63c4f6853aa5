//! ビルドコンテキストの配置
//!
//! 入力ファイルを ConfigMap に保存し、ワーカー Pod のコンテキストディレクトリに
//! マウントする。

use crate::error::{BuildError, Result};
use crate::pod::secret::ContainerMounts;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{ConfigMap, ConfigMapVolumeSource, KeyToPath, Volume, VolumeMount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use podforge_core::Build;
use podforge_kube::Cluster;
use std::collections::BTreeMap;

pub const CONTEXT_VOLUME: &str = "build-context";
/// Annotation holding the `key -> path` mapping of the context ConfigMap
const PATHS_ANNOTATION: &str = "podforge.dev/resource-paths";
/// ConfigMap キーの最大長
const MAX_KEY_LEN: usize = 253;

/// ビルドの入力ファイル
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// コンテキストディレクトリからの相対パス
    pub target: String,
    pub content: Vec<u8>,
}

impl Resource {
    pub fn new(target: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            target: target.into(),
            content: content.into(),
        }
    }
}

/// `<prefix>-<build-name>-context`
pub fn context_config_map_name(prefix: &str, build: &Build) -> String {
    format!("{}-{}-context", prefix, build.name().to_lowercase())
}

/// ConfigMap のキーに `/` は使えないので、`_` を `__`、`/` を `_-` に置き換える。
/// `_` が必ず2文字の並びになるため、異なるパスが同じキーになることはない
pub fn resource_key(target: &str) -> String {
    let mut key = String::with_capacity(target.len());
    for c in target.chars() {
        match c {
            '_' => key.push_str("__"),
            '/' => key.push_str("_-"),
            c => key.push(c),
        }
    }
    key
}

/// リソースのパスを正規化する。空・`.`・`..` の要素や
/// ConfigMap キーに使えない文字を含むものはエラー
fn normalize_target(target: &str) -> Result<String> {
    let path = target.trim_start_matches('/');
    let valid_chars = path
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '/'));
    let valid_segments = !path.is_empty()
        && path
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    if !valid_chars || !valid_segments {
        return Err(BuildError::InvalidResource(target.to_string()));
    }
    Ok(path.to_string())
}

pub fn new_context_config_map(
    prefix: &str,
    build: &Build,
    resources: &[Resource],
) -> Result<ConfigMap> {
    let mut data = BTreeMap::new();
    let mut binary_data = BTreeMap::new();
    let mut paths = BTreeMap::new();

    for resource in resources {
        let path = normalize_target(&resource.target)?;
        let key = resource_key(&path);
        if key.len() > MAX_KEY_LEN {
            return Err(BuildError::InvalidResource(format!(
                "{}: path is longer than {} characters once encoded",
                resource.target, MAX_KEY_LEN
            )));
        }
        if paths.insert(key.clone(), path.clone()).is_some() {
            return Err(BuildError::InvalidResource(format!(
                "{}: added more than once",
                path
            )));
        }
        match std::str::from_utf8(&resource.content) {
            Ok(text) => {
                data.insert(key, text.to_string());
            }
            Err(_) => {
                binary_data.insert(key, ByteString(resource.content.clone()));
            }
        }
    }

    let mut annotations = BTreeMap::new();
    annotations.insert(PATHS_ANNOTATION.to_string(), serde_json::to_string(&paths)?);
    let mut labels = BTreeMap::new();
    labels.insert(crate::pod::LABEL_BUILD.to_string(), build.name().to_string());

    Ok(ConfigMap {
        metadata: ObjectMeta {
            namespace: Some(build.namespace().to_string()),
            name: Some(context_config_map_name(prefix, build)),
            labels: Some(labels),
            annotations: Some(annotations),
            ..Default::default()
        },
        data: (!data.is_empty()).then_some(data),
        binary_data: (!binary_data.is_empty()).then_some(binary_data),
        ..Default::default()
    })
}

/// Replace the context ConfigMap of a build with the given resources
pub async fn mount_resources_with_config_map(
    cluster: &dyn Cluster,
    prefix: &str,
    build: &Build,
    resources: &[Resource],
) -> Result<()> {
    if resources.is_empty() {
        return Ok(());
    }

    let config_map = new_context_config_map(prefix, build, resources)?;
    let name = context_config_map_name(prefix, build);
    match cluster.delete_config_map(build.namespace(), &name).await {
        Ok(()) => tracing::debug!("Replaced previous context {}", name),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e.into()),
    }
    cluster.create_config_map(&config_map).await?;

    tracing::debug!(
        "Stored {} resources for build {} in {}",
        resources.len(),
        build.reference,
        name
    );
    Ok(())
}

/// コンテキストの ConfigMap があれば `context_dir` にマウントする
pub async fn add_resources_to_volume(
    cluster: &dyn Cluster,
    prefix: &str,
    build: &Build,
    context_dir: &str,
    mounts: &mut ContainerMounts,
) -> Result<()> {
    let name = context_config_map_name(prefix, build);
    let config_map = match cluster.get_config_map(build.namespace(), &name).await {
        Ok(config_map) => config_map,
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let paths: BTreeMap<String, String> = config_map
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(PATHS_ANNOTATION))
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default();

    let keys = config_map
        .data
        .iter()
        .flat_map(|d| d.keys())
        .chain(config_map.binary_data.iter().flat_map(|d| d.keys()));
    let items = keys
        .map(|key| KeyToPath {
            key: key.clone(),
            path: paths.get(key).cloned().unwrap_or_else(|| key.clone()),
            ..Default::default()
        })
        .collect();

    mounts.volumes.push(Volume {
        name: CONTEXT_VOLUME.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name,
            items: Some(items),
            ..Default::default()
        }),
        ..Default::default()
    });
    mounts.volume_mounts.push(VolumeMount {
        name: CONTEXT_VOLUME.to_string(),
        mount_path: context_dir.to_string(),
        ..Default::default()
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use podforge_core::ObjectReference;
    use podforge_kube::FakeCluster;

    fn build() -> Build {
        Build {
            reference: ObjectReference::new("test", "Build1"),
            ..Default::default()
        }
    }

    #[test]
    fn test_context_config_map() {
        let resources = vec![
            Resource::new("Dockerfile", "FROM scratch\n"),
            Resource::new("src/greetings.sw.json", "{}"),
            Resource::new("bin/app", vec![0xff, 0xfe, 0x00]),
        ];
        let config_map = new_context_config_map("podforge", &build(), &resources).unwrap();

        assert_eq!(
            config_map.metadata.name.as_deref(),
            Some("podforge-build1-context")
        );
        let data = config_map.data.unwrap();
        assert_eq!(data["Dockerfile"], "FROM scratch\n");
        assert!(data.contains_key("src_-greetings.sw.json"));
        let binary = config_map.binary_data.unwrap();
        assert_eq!(binary["bin_-app"].0, vec![0xff, 0xfe, 0x00]);
    }

    #[test]
    fn test_resource_keys_do_not_collide() {
        let resources = vec![
            Resource::new("src/app.json", "{\"dir\": true}"),
            Resource::new("src_app.json", "{\"dir\": false}"),
            Resource::new("src/_app.json", "{}"),
            Resource::new("src_/app.json", "{}"),
        ];
        let config_map = new_context_config_map("podforge", &build(), &resources).unwrap();

        let data = config_map.data.unwrap();
        assert_eq!(data.len(), 4);
        assert_eq!(data["src_-app.json"], "{\"dir\": true}");
        assert_eq!(data["src__app.json"], "{\"dir\": false}");

        let raw = &config_map.metadata.annotations.unwrap()[PATHS_ANNOTATION];
        let paths: BTreeMap<String, String> = serde_json::from_str(raw).unwrap();
        assert_eq!(paths["src_-app.json"], "src/app.json");
        assert_eq!(paths["src__app.json"], "src_app.json");
        assert_eq!(paths["src_-__app.json"], "src/_app.json");
        assert_eq!(paths["src___-app.json"], "src_/app.json");
    }

    #[test]
    fn test_duplicate_resource_is_rejected() {
        let resources = vec![
            Resource::new("Dockerfile", "FROM a"),
            Resource::new("/Dockerfile", "FROM b"),
        ];
        let err = new_context_config_map("podforge", &build(), &resources).unwrap_err();
        assert!(matches!(err, BuildError::InvalidResource(_)));
    }

    #[test]
    fn test_invalid_resource_targets() {
        for target in ["", "/", "src//app", "../etc/passwd", "src/./app", "my app", "src/app:1", "ソース"] {
            let resources = vec![Resource::new(target, "x")];
            let err = new_context_config_map("podforge", &build(), &resources).unwrap_err();
            assert!(
                matches!(err, BuildError::InvalidResource(_)),
                "{:?} should be rejected",
                target
            );
        }

        let long = vec![Resource::new("a/".repeat(100) + "b", "x")];
        assert!(new_context_config_map("podforge", &build(), &long).is_err());
    }

    #[tokio::test]
    async fn test_mount_resources_replaces_previous() {
        let cluster = FakeCluster::new();
        let build = build();

        mount_resources_with_config_map(
            &cluster,
            "podforge",
            &build,
            &[Resource::new("Dockerfile", "FROM a")],
        )
        .await
        .unwrap();
        mount_resources_with_config_map(
            &cluster,
            "podforge",
            &build,
            &[Resource::new("Dockerfile", "FROM b")],
        )
        .await
        .unwrap();

        let stored = cluster.config_map("test", "podforge-build1-context").unwrap();
        assert_eq!(stored.data.unwrap()["Dockerfile"], "FROM b");
    }

    #[tokio::test]
    async fn test_volume_items_map_back_to_paths() {
        let cluster = FakeCluster::new();
        let build = build();
        mount_resources_with_config_map(
            &cluster,
            "podforge",
            &build,
            &[
                Resource::new("Dockerfile", "FROM scratch"),
                Resource::new("src/main.sw.json", "{}"),
            ],
        )
        .await
        .unwrap();

        let mut mounts = ContainerMounts::default();
        add_resources_to_volume(
            &cluster,
            "podforge",
            &build,
            "/builder/Build1/context",
            &mut mounts,
        )
        .await
        .unwrap();

        assert_eq!(mounts.volumes.len(), 1);
        let source = mounts.volumes[0].config_map.as_ref().unwrap();
        let items = source.items.as_ref().unwrap();
        assert!(
            items
                .iter()
                .any(|i| i.key == "src_-main.sw.json" && i.path == "src/main.sw.json")
        );
        assert_eq!(mounts.volume_mounts[0].mount_path, "/builder/Build1/context");
    }

    #[tokio::test]
    async fn test_no_resources_no_volume() {
        let cluster = FakeCluster::new();
        let mut mounts = ContainerMounts::default();
        add_resources_to_volume(&cluster, "podforge", &build(), "/ctx", &mut mounts)
            .await
            .unwrap();
        assert!(mounts.volumes.is_empty());
    }
}
