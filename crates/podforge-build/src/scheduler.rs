use crate::builder::Builder;
use crate::error::Result;
use crate::resources::{Resource, mount_resources_with_config_map};
use k8s_openapi::api::core::v1::ResourceRequirements;
use podforge_core::{Build, KanikoTaskCache};

/// 新しいビルドの入力を集め、最初の保存を行う
pub struct Scheduler {
    builder: Builder,
    build: Build,
    resources: Vec<Resource>,
}

impl Scheduler {
    pub(crate) fn new(builder: Builder, build: Build) -> Self {
        Self {
            builder,
            build,
            resources: Vec::new(),
        }
    }

    /// The build as it will be scheduled
    pub fn build(&self) -> &Build {
        &self.build
    }

    /// ビルドコンテキストにファイルを追加 (`target` はコンテキストディレクトリからの相対パス)
    pub fn with_resource(mut self, target: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.resources.push(Resource::new(target, content));
        self
    }

    pub fn with_kaniko_cache(mut self, cache: KanikoTaskCache) -> Self {
        if let Some(task) = self.build.kaniko_task_mut() {
            task.cache = cache;
        }
        self
    }

    pub fn with_kaniko_resources(mut self, resources: ResourceRequirements) -> Self {
        if let Some(task) = self.build.kaniko_task_mut() {
            task.resources = Some(resources);
        }
        self
    }

    pub fn with_kaniko_additional_args(mut self, flags: Vec<String>) -> Self {
        if let Some(task) = self.build.kaniko_task_mut() {
            task.additional_flags = flags;
        }
        self
    }

    /// リソースを保存し、ビルドを永続化して最初の reconcile を実行
    pub async fn schedule(self) -> Result<Build> {
        let Self {
            builder,
            build,
            resources,
        } = self;

        mount_resources_with_config_map(
            builder.cluster(),
            &builder.config().pod_name_prefix,
            &build,
            &resources,
        )
        .await?;

        let build = builder.persist(build).await?;
        tracing::info!("Scheduled build {}", build.reference);
        builder.reconcile(&build).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use podforge_core::{BuildPhase, BuilderInfo, ObjectReference, PlatformBuild, Task};
    use podforge_kube::FakeCluster;
    use std::sync::Arc;

    fn info() -> BuilderInfo {
        BuilderInfo {
            final_image_name: "quay.io/example/greetings:latest".to_string(),
            build_unique_name: "build1".to_string(),
            platform: PlatformBuild {
                reference: ObjectReference::new("test", "testPlatform"),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_kaniko_options() {
        let builder = Builder::new(Arc::new(FakeCluster::new()));
        let build = builder
            .new_build(&info())
            .unwrap()
            .with_kaniko_cache(KanikoTaskCache {
                enabled: Some(true),
                persistent_volume_claim: Some("cache-pvc".to_string()),
            })
            .with_kaniko_additional_args(vec!["--snapshot-mode=redo".to_string()])
            .with_resource("Dockerfile", "FROM scratch")
            .schedule()
            .await
            .unwrap();

        assert_eq!(build.phase(), BuildPhase::Scheduling);
        let Task::Kaniko(task) = &build.spec.tasks[0] else {
            panic!("expected a kaniko task");
        };
        assert!(task.cache.is_enabled());
        assert_eq!(task.additional_flags, vec!["--snapshot-mode=redo"]);
    }
}
