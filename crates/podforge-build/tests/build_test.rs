//! End-to-end build scenarios against the in-memory cluster

use chrono::{Duration, Utc};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{ConfigMap, PodStatus, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use podforge_build::{BuildStore, Builder, MemoryBuildStore, new_build_pod};
use podforge_core::{
    BuildPhase, BuilderInfo, ObjectReference, PlatformBuild, PlatformBuildSpec, PublishStrategy,
    RegistrySpec,
};
use podforge_kube::{Cluster, FakeCluster};
use std::collections::BTreeMap;
use std::sync::Arc;

const DOCKERFILE: &str = "FROM registry.access.redhat.com/ubi8/openjdk-17\nCOPY greetings.sw.json /deployments/\n";
const WORKFLOW: &str = r#"{"id": "greetings", "version": "1.0", "start": "Hello"}"#;

fn platform(publish_strategy: PublishStrategy, registry: RegistrySpec) -> PlatformBuild {
    PlatformBuild {
        reference: ObjectReference::new("test", "testPlatform"),
        spec: PlatformBuildSpec {
            publish_strategy,
            registry,
            timeout: Some(std::time::Duration::from_secs(300)),
            ..Default::default()
        },
    }
}

fn info(name: &str, platform: PlatformBuild) -> BuilderInfo {
    BuilderInfo {
        final_image_name: "quay.io/example/greetings:latest".to_string(),
        build_unique_name: name.to_string(),
        platform,
    }
}

fn meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        namespace: Some("test".to_string()),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

/// Kaniko で build1 をスケジュールし、Pod が作成されることを確認
#[tokio::test]
async fn test_new_kaniko_build() {
    let cluster = Arc::new(FakeCluster::new());
    let builder = Builder::new(cluster.clone());

    let build = builder
        .new_build(&info(
            "build1",
            platform(PublishStrategy::Kaniko, RegistrySpec::default()),
        ))
        .unwrap()
        .with_resource("Dockerfile", DOCKERFILE)
        .with_resource("greetings.sw.json", WORKFLOW)
        .schedule()
        .await
        .unwrap();
    assert_eq!(build.phase(), BuildPhase::Scheduling);

    let build = builder.reconcile(&build).await.unwrap();
    assert_eq!(build.phase(), BuildPhase::Pending);
    assert!(build.status.started_at.is_some());

    // コントローラがいないので Pod の状態は変わらない
    let build = builder.reconcile(&build).await.unwrap();
    assert_eq!(build.phase(), BuildPhase::Pending);

    let pod = cluster.pod("test", "podforge-build1-builder").unwrap();
    let spec = pod.spec.unwrap();
    assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
    let volumes = spec.volumes.unwrap();
    assert_eq!(volumes.len(), 1);
    assert_eq!(volumes[0].name, "build-context");

    let container = &spec.containers[0];
    assert_eq!(container.name, "kanikotask");
    assert_eq!(
        container.image.as_deref(),
        Some("gcr.io/kaniko-project/executor:v1.9.0")
    );
    assert_eq!(
        container.working_dir.as_deref(),
        Some("/builder/build1/context")
    );
}

#[tokio::test]
async fn test_kaniko_insecure_verbose_with_secret() {
    let mut data = BTreeMap::new();
    data.insert(".dockerconfigjson".to_string(), ByteString(b"{\"auths\":{}}".to_vec()));
    let cluster = Arc::new(FakeCluster::new().with_secret(Secret {
        metadata: meta("push-secret"),
        data: Some(data),
        ..Default::default()
    }));
    let builder = Builder::new(cluster.clone());

    let registry = RegistrySpec {
        address: Some("registry.local:5000".to_string()),
        secret: Some("push-secret".to_string()),
        insecure: true,
        ..Default::default()
    };
    let mut build = builder
        .new_build(&info("build3", platform(PublishStrategy::Kaniko, registry)))
        .unwrap()
        .with_kaniko_additional_args(vec!["--cleanup".to_string()])
        .build()
        .clone();
    build.kaniko_task_mut().unwrap().verbose = true;

    let build = builder.reconcile(&build).await.unwrap();
    let build = builder.reconcile(&build).await.unwrap();
    assert_eq!(build.phase(), BuildPhase::Pending);

    let pod = cluster.pod("test", "podforge-build3-builder").unwrap();
    let spec = pod.spec.unwrap();
    let args = spec.containers[0].args.clone().unwrap();
    assert!(args.contains(&"--insecure".to_string()));
    assert!(args.contains(&"--insecure-pull".to_string()));
    assert!(args.contains(&"-v=debug".to_string()));
    assert!(args.contains(&"--destination=registry.local:5000/quay.io/example/greetings:latest".to_string()));
    assert_eq!(args.last().map(String::as_str), Some("--cleanup"));

    let volumes = spec.volumes.unwrap();
    assert_eq!(volumes.len(), 1);
    assert_eq!(volumes[0].name, "registry-secret");
    let mounts = spec.containers[0].volume_mounts.clone().unwrap();
    assert_eq!(mounts[0].mount_path, "/kaniko/.docker");
}

#[tokio::test]
async fn test_buildah_build_with_ca() {
    let mut data = BTreeMap::new();
    data.insert("service-ca.crt".to_string(), "-----BEGIN CERTIFICATE-----".to_string());
    let cluster = Arc::new(FakeCluster::new().with_config_map(ConfigMap {
        metadata: meta("registry-ca"),
        data: Some(data),
        ..Default::default()
    }));
    let builder = Builder::new(cluster.clone());

    let registry = RegistrySpec {
        ca: Some("registry-ca".to_string()),
        insecure: true,
        ..Default::default()
    };
    let build = builder
        .new_build(&info("build2", platform(PublishStrategy::Buildah, registry)))
        .unwrap()
        .with_resource("Dockerfile", DOCKERFILE)
        .schedule()
        .await
        .unwrap();
    let build = builder.reconcile(&build).await.unwrap();
    assert_eq!(build.phase(), BuildPhase::Pending);

    let pod = cluster.pod("test", "podforge-build2-builder").unwrap();
    let spec = pod.spec.unwrap();
    assert!(spec.init_containers.is_none());
    assert_eq!(spec.containers.len(), 1);

    let container = &spec.containers[0];
    assert_eq!(
        container.image.as_deref(),
        Some("quay.io/buildah/stable:v1.23.3")
    );
    assert_eq!(
        container.command.clone().unwrap(),
        vec!["/bin/sh".to_string(), "-c".to_string()]
    );
    let script = &container.args.as_ref().unwrap()[0];
    let steps: Vec<&str> = script.split(" && ").collect();
    assert_eq!(steps.len(), 2);
    for step in &steps {
        assert!(step.contains("--cert-dir=/etc/containers/certs.d"));
        assert!(step.contains("--tls-verify=false"));
    }
    assert!(steps[0].starts_with("buildah bud"));
    assert!(steps[1].starts_with("buildah push"));
    assert!(steps[1].ends_with("docker://quay.io/example/greetings:latest"));

    let mounts = container.volume_mounts.as_ref().unwrap();
    assert!(
        mounts
            .iter()
            .any(|m| m.name == "registry-config" && m.mount_path == "/etc/containers/certs.d")
    );
}

#[tokio::test]
async fn test_buildah_legacy_docker_secret() {
    let mut data = BTreeMap::new();
    data.insert(".dockercfg".to_string(), ByteString(b"{}".to_vec()));
    let cluster = Arc::new(FakeCluster::new().with_secret(Secret {
        metadata: meta("legacy"),
        data: Some(data),
        ..Default::default()
    }));
    let builder = Builder::new(cluster.clone());

    let registry = RegistrySpec {
        secret: Some("legacy".to_string()),
        ..Default::default()
    };
    let build = builder
        .new_build(&info("build4", platform(PublishStrategy::Buildah, registry)))
        .unwrap()
        .schedule()
        .await
        .unwrap();
    builder.reconcile(&build).await.unwrap();

    let pod = cluster.pod("test", "podforge-build4-builder").unwrap();
    let container = pod.spec.unwrap().containers[0].clone();
    let script = container.args.unwrap()[0].clone();
    assert!(script.starts_with("(echo '{ \"auths\": ' ; cat /buildah/.docker/config.json ; echo \"}\") > /tmp/.dockercfg && buildah bud"));

    let env = container.env.unwrap();
    assert!(
        env.iter()
            .any(|e| e.name == "REGISTRY_AUTH_FILE" && e.value.as_deref() == Some("/tmp/.dockercfg"))
    );
}

#[tokio::test]
async fn test_unsupported_secret_aborts_reconcile() {
    let mut data = BTreeMap::new();
    data.insert("token".to_string(), ByteString(b"abc".to_vec()));
    let cluster = Arc::new(FakeCluster::new().with_secret(Secret {
        metadata: meta("opaque"),
        data: Some(data),
        ..Default::default()
    }));
    let builder = Builder::new(cluster.clone());

    let registry = RegistrySpec {
        address: Some("quay.io".to_string()),
        secret: Some("opaque".to_string()),
        ..Default::default()
    };
    let build = builder
        .new_build(&info("build5", platform(PublishStrategy::Kaniko, registry)))
        .unwrap()
        .schedule()
        .await
        .unwrap();
    assert_eq!(build.phase(), BuildPhase::Scheduling);

    let err = builder.reconcile(&build).await.unwrap_err();
    assert!(err.to_string().contains("unsupported secret type"));
    assert!(cluster.pod("test", "podforge-build5-builder").is_none());
}

#[tokio::test]
async fn test_pod_phase_mapping() {
    let cluster = Arc::new(FakeCluster::new());
    let builder = Builder::new(cluster.clone());

    let build = builder
        .new_build(&info(
            "build6",
            platform(PublishStrategy::Kaniko, RegistrySpec::default()),
        ))
        .unwrap()
        .schedule()
        .await
        .unwrap();
    let build = builder.reconcile(&build).await.unwrap();

    cluster.set_pod_phase("test", "podforge-build6-builder", "Running");
    let build = builder.reconcile(&build).await.unwrap();
    assert_eq!(build.phase(), BuildPhase::Running);

    cluster.set_pod_phase("test", "podforge-build6-builder", "Unknown");
    let build = builder.reconcile(&build).await.unwrap();
    assert_eq!(build.phase(), BuildPhase::Running);

    cluster.set_pod_phase("test", "podforge-build6-builder", "Succeeded");
    let build = builder.reconcile(&build).await.unwrap();
    assert_eq!(build.phase(), BuildPhase::Succeeded);
    assert!(build.status.duration.is_some());

    // 終端状態ではアクションは実行されない
    let again = builder.reconcile(&build).await.unwrap();
    assert_eq!(again, build);
}

#[tokio::test]
async fn test_pod_failure_reason() {
    let cluster = Arc::new(FakeCluster::new());
    let builder = Builder::new(cluster.clone());

    let build = builder
        .new_build(&info(
            "build7",
            platform(PublishStrategy::Kaniko, RegistrySpec::default()),
        ))
        .unwrap()
        .schedule()
        .await
        .unwrap();
    let build = builder.reconcile(&build).await.unwrap();

    cluster.set_pod_status(
        "test",
        "podforge-build7-builder",
        PodStatus {
            phase: Some("Failed".to_string()),
            message: Some("Pod ephemeral local storage usage exceeds the total limit".to_string()),
            ..Default::default()
        },
    );
    let build = builder.reconcile(&build).await.unwrap();
    assert_eq!(build.phase(), BuildPhase::Failed);
    assert_eq!(
        build.status.error.as_deref(),
        Some("Pod ephemeral local storage usage exceeds the total limit")
    );
}

#[tokio::test]
async fn test_timeout_fails_build() {
    let cluster = Arc::new(FakeCluster::new());
    let builder = Builder::new(cluster.clone());

    let build = builder
        .new_build(&info(
            "build8",
            platform(PublishStrategy::Kaniko, RegistrySpec::default()),
        ))
        .unwrap()
        .schedule()
        .await
        .unwrap();
    let build = builder.reconcile(&build).await.unwrap();
    let started = build.status.started_at.unwrap();

    let build = builder
        .reconcile_at(&build, started + Duration::minutes(6))
        .await
        .unwrap();
    assert_eq!(build.phase(), BuildPhase::Failed);
    assert_eq!(
        build.status.error.as_deref(),
        Some("build timed out after 300s")
    );
    assert!(cluster.pod("test", "podforge-build8-builder").is_none());
}

#[tokio::test]
async fn test_missing_pod_is_recreated_while_pending() {
    let cluster = Arc::new(FakeCluster::new());
    let builder = Builder::new(cluster.clone());

    let build = builder
        .new_build(&info(
            "build9",
            platform(PublishStrategy::Kaniko, RegistrySpec::default()),
        ))
        .unwrap()
        .schedule()
        .await
        .unwrap();
    let build = builder.reconcile(&build).await.unwrap();

    cluster.delete_pod("test", "podforge-build9-builder").await.unwrap();

    let build = builder.reconcile(&build).await.unwrap();
    assert_eq!(build.phase(), BuildPhase::Pending);
    assert!(cluster.pod("test", "podforge-build9-builder").is_some());

    cluster.set_pod_phase("test", "podforge-build9-builder", "Running");
    let build = builder.reconcile(&build).await.unwrap();
    cluster.delete_pod("test", "podforge-build9-builder").await.unwrap();
    let build = builder.reconcile(&build).await.unwrap();
    assert_eq!(build.phase(), BuildPhase::Failed);
}

#[tokio::test]
async fn test_initialize_waits_for_terminating_pod() {
    let cluster = Arc::new(FakeCluster::new());
    cluster.set_linger_deleted_pods(true);
    let builder = Builder::new(cluster.clone());

    let scheduler = builder
        .new_build(&info(
            "build10",
            platform(PublishStrategy::Kaniko, RegistrySpec::default()),
        ))
        .unwrap();
    let stale = new_build_pod(cluster.as_ref(), builder.config(), scheduler.build())
        .await
        .unwrap();
    cluster.insert_pod(stale);

    let build = scheduler.schedule().await.unwrap();
    // 削除中の Pod が残っている間は進まない
    assert_eq!(build.phase(), BuildPhase::None);

    cluster.reap_pods();
    let build = builder.reconcile(&build).await.unwrap();
    assert_eq!(build.phase(), BuildPhase::Scheduling);
}

#[tokio::test]
async fn test_reconcile_persists_changes() {
    let cluster = Arc::new(FakeCluster::new());
    let store = Arc::new(MemoryBuildStore::new());
    let builder = Builder::new(cluster).with_store(store.clone());

    let build = builder
        .new_build(&info(
            "build11",
            platform(PublishStrategy::Kaniko, RegistrySpec::default()),
        ))
        .unwrap()
        .schedule()
        .await
        .unwrap();
    // 初回保存 + Scheduling への遷移
    assert_eq!(build.resource_version, 2);

    let pending = builder.reconcile(&build).await.unwrap();
    assert_eq!(pending.resource_version, 3);
    assert_eq!(store.load("test", "build11").await.unwrap(), pending);

    // 変化がなければ保存しない
    let unchanged = builder.reconcile(&pending).await.unwrap();
    assert_eq!(unchanged.resource_version, 3);

    // 古いビルドでの reconcile は競合
    let err = builder
        .reconcile_at(&build, Utc::now())
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}
