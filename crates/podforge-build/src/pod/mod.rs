//! ワーカー Pod の組み立て
//!
//! ビルドのタスクを1つの Pod spec に変換する。タスクの種類ごとに
//! コンテナ・ボリューム・環境変数を追加する。

pub mod buildah;
pub mod kaniko;
pub mod secret;

use crate::error::Result;
use k8s_openapi::api::core::v1::{Container, EnvVar, Pod, PodSpec, VolumeMount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use podforge_config::EngineConfig;
use podforge_core::{BUILDER_DIR, Build, Task};
use podforge_kube::Cluster;
use std::collections::BTreeMap;

pub const LABEL_BUILD: &str = "podforge.dev/build";
pub const LABEL_COMPONENT: &str = "podforge.dev/component";

/// ビルダーコンテナ間で共有する作業ボリューム
pub const BUILDER_VOLUME: &str = "container-builder";

const PROXY_ENV_VARS: [&str; 3] = ["HTTP_PROXY", "HTTPS_PROXY", "NO_PROXY"];

/// ワーカー Pod の組み立てに必要なもの
#[derive(Clone, Copy)]
pub struct PodContext<'a> {
    pub cluster: &'a dyn Cluster,
    pub config: &'a EngineConfig,
    pub build: &'a Build,
}

/// `<prefix>-<lowercased build name>-builder`
pub fn build_pod_name(prefix: &str, build: &Build) -> String {
    format!("{}-{}-builder", prefix, build.name().to_lowercase())
}

/// ビルドのワーカー Pod を組み立てる。Secret と ConfigMap は参照するだけで
/// 何も作成しない。
pub async fn new_build_pod(cluster: &dyn Cluster, config: &EngineConfig, build: &Build) -> Result<Pod> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_BUILD.to_string(), build.name().to_string());
    labels.insert(LABEL_COMPONENT.to_string(), "builder".to_string());

    let mut pod = Pod {
        metadata: ObjectMeta {
            namespace: Some(build.namespace().to_string()),
            name: Some(build_pod_name(&config.pod_name_prefix, build)),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PodSpec {
            restart_policy: Some("Never".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    };

    let ctx = PodContext {
        cluster,
        config,
        build,
    };
    for task in &build.spec.tasks {
        match task {
            Task::Kaniko(task) => kaniko::add_kaniko_task_to_pod(&ctx, task, &mut pod).await?,
            Task::Buildah(task) => buildah::add_buildah_task_to_pod(&ctx, task, &mut pod).await?,
        }
    }

    Ok(pod)
}

/// 現在のプロセスのプロキシ設定 (そのままコピー)
pub fn proxy_from_environment() -> Vec<EnvVar> {
    PROXY_ENV_VARS
        .iter()
        .filter_map(|name| {
            std::env::var(name).ok().map(|value| EnvVar {
                name: name.to_string(),
                value: Some(value),
                ..Default::default()
            })
        })
        .collect()
}

pub(crate) fn spec_mut(pod: &mut Pod) -> &mut PodSpec {
    pod.spec.get_or_insert_with(PodSpec::default)
}

fn has_builder_volume(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.volumes.as_ref())
        .is_some_and(|volumes| volumes.iter().any(|v| v.name == BUILDER_VOLUME))
}

/// ビルダーコンテナを init コンテナとして追加
pub(crate) fn add_container_to_pod(build: &Build, mut container: Container, pod: &mut Pod) {
    if has_builder_volume(pod) {
        container
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .push(VolumeMount {
                name: BUILDER_VOLUME.to_string(),
                mount_path: format!("{}/{}", BUILDER_DIR, build.name()),
                ..Default::default()
            });
    }
    spec_mut(pod)
        .init_containers
        .get_or_insert_with(Vec::new)
        .push(container);
}

/// 最後の init コンテナをメインコンテナに移し、
/// メインコンテナがちょうど1つになるようにする
pub(crate) fn promote_last_init_container(pod: &mut Pod) {
    let spec = spec_mut(pod);
    let Some(last) = spec.init_containers.as_mut().and_then(|c| c.pop()) else {
        return;
    };
    spec.containers = vec![last];
    if spec.init_containers.as_ref().is_some_and(|c| c.is_empty()) {
        spec.init_containers = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Volume;
    use podforge_core::ObjectReference;

    fn build(name: &str) -> Build {
        Build {
            reference: ObjectReference::new("test", name),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_pod_name() {
        assert_eq!(
            build_pod_name("podforge", &build("MyBuild")),
            "podforge-mybuild-builder"
        );
    }

    #[test]
    fn test_proxy_from_environment() {
        temp_env::with_vars(
            [
                ("HTTP_PROXY", Some("http://proxy:3128")),
                ("HTTPS_PROXY", None),
                ("NO_PROXY", Some(".svc,.cluster.local")),
            ],
            || {
                let env = proxy_from_environment();
                assert_eq!(env.len(), 2);
                assert_eq!(env[0].name, "HTTP_PROXY");
                assert_eq!(env[0].value.as_deref(), Some("http://proxy:3128"));
                assert_eq!(env[1].name, "NO_PROXY");
            },
        );
    }

    #[test]
    fn test_builder_volume_handoff() {
        let build = build("build1");
        let mut pod = Pod::default();
        spec_mut(&mut pod).volumes = Some(vec![Volume {
            name: BUILDER_VOLUME.to_string(),
            ..Default::default()
        }]);

        add_container_to_pod(
            &build,
            Container {
                name: "first".to_string(),
                ..Default::default()
            },
            &mut pod,
        );
        add_container_to_pod(
            &build,
            Container {
                name: "second".to_string(),
                ..Default::default()
            },
            &mut pod,
        );
        promote_last_init_container(&mut pod);

        let spec = pod.spec.unwrap();
        assert_eq!(spec.containers.len(), 1);
        assert_eq!(spec.containers[0].name, "second");
        let mounts = spec.containers[0].volume_mounts.as_ref().unwrap();
        assert_eq!(mounts[0].mount_path, "/builder/build1");
        assert_eq!(spec.init_containers.unwrap()[0].name, "first");
    }
}
