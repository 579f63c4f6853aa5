use crate::action::{self, ActionContext};
use crate::error::Result;
use crate::scheduler::Scheduler;
use crate::store::BuildStore;
use chrono::{DateTime, Utc};
use podforge_config::EngineConfig;
use podforge_core::{Build, BuildPhase, BuilderInfo};
use podforge_kube::Cluster;
use std::sync::Arc;

/// エンジンのエントリポイント。ビルドを作成し、状態を進める。
///
/// ビルドごとの状態は持たないので、1つの `Builder` で複数のビルドを並行に
/// reconcile できる。同じビルドを並行に reconcile してはならない。
#[derive(Clone)]
pub struct Builder {
    cluster: Arc<dyn Cluster>,
    config: EngineConfig,
    store: Option<Arc<dyn BuildStore>>,
}

impl Builder {
    pub fn new(cluster: Arc<dyn Cluster>) -> Self {
        Self {
            cluster,
            config: EngineConfig::default(),
            store: None,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// 状態の変更をすべて `store` に保存する
    pub fn with_store(mut self, store: Arc<dyn BuildStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cluster(&self) -> &dyn Cluster {
        self.cluster.as_ref()
    }

    pub fn store(&self) -> Option<&Arc<dyn BuildStore>> {
        self.store.as_ref()
    }

    /// プラットフォーム定義から新しいビルドを開始
    pub fn new_build(&self, info: &BuilderInfo) -> Result<Scheduler> {
        let mut build = Build::from_platform(info)?;
        if build.spec.timeout.is_zero() {
            build.spec.timeout = self.config.default_timeout;
        }
        Ok(Scheduler::new(self.clone(), build))
    }

    /// `build` を最大1アクション進める
    pub async fn reconcile(&self, build: &Build) -> Result<Build> {
        self.reconcile_at(build, Utc::now()).await
    }

    /// [`Builder::reconcile`] with an explicit clock reading
    pub async fn reconcile_at(&self, build: &Build, now: DateTime<Utc>) -> Result<Build> {
        let ctx = ActionContext {
            cluster: self.cluster.as_ref(),
            config: &self.config,
            now,
        };
        let target = action::run(&ctx, build).await?;

        if target == *build {
            return Ok(target);
        }
        self.persist(target).await
    }

    /// ビルドを停止する。フェーズを Cancelled にしてワーカー Pod を削除する。
    /// 終了済みのビルドはそのまま返す。
    pub async fn cancel_build(&self, build: &Build) -> Result<Build> {
        if build.phase().is_terminal() {
            return Ok(build.clone());
        }

        let mut target = build.clone();
        target.status.phase = BuildPhase::Cancelled;
        tracing::info!(
            build = %build.reference,
            phase_from = %build.phase(),
            phase_to = %target.phase(),
            "build cancelled"
        );
        let target = self.persist(target).await?;

        // cancel アクションが次回の reconcile で削除を再試行する
        let ctx = ActionContext {
            cluster: self.cluster.as_ref(),
            config: &self.config,
            now: Utc::now(),
        };
        if let Err(e) = action::delete_builder_pod(&ctx, &target).await {
            tracing::warn!("Failed to delete pod of cancelled build {}: {}", target.reference, e);
        }
        Ok(target)
    }

    pub(crate) async fn persist(&self, build: Build) -> Result<Build> {
        match &self.store {
            Some(store) => store.save(&build).await,
            None => Ok(build),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBuildStore;
    use podforge_core::{ObjectReference, PlatformBuild, PlatformBuildSpec, PublishStrategy};
    use podforge_kube::FakeCluster;
    use std::time::Duration;

    fn info() -> BuilderInfo {
        BuilderInfo {
            final_image_name: "quay.io/example/greetings:latest".to_string(),
            build_unique_name: "build1".to_string(),
            platform: PlatformBuild {
                reference: ObjectReference::new("test", "testPlatform"),
                spec: PlatformBuildSpec {
                    publish_strategy: PublishStrategy::Kaniko,
                    ..Default::default()
                },
            },
        }
    }

    #[test]
    fn test_default_timeout_applied() {
        let builder = Builder::new(Arc::new(FakeCluster::new()));
        let scheduler = builder.new_build(&info()).unwrap();
        assert_eq!(scheduler.build().spec.timeout, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_cancel_build() {
        let cluster = Arc::new(FakeCluster::new());
        let store = Arc::new(MemoryBuildStore::new());
        let builder = Builder::new(cluster.clone()).with_store(store.clone());

        let build = builder.new_build(&info()).unwrap().schedule().await.unwrap();
        let build = builder.reconcile(&build).await.unwrap();
        assert_eq!(build.phase(), BuildPhase::Pending);
        assert!(cluster.pod("test", "podforge-build1-builder").is_some());

        let cancelled = builder.cancel_build(&build).await.unwrap();
        assert_eq!(cancelled.phase(), BuildPhase::Cancelled);
        assert!(cluster.pod("test", "podforge-build1-builder").is_none());
        assert_eq!(store.load("test", "build1").await.unwrap(), cancelled);

        // Cancelled は吸収状態
        let again = builder.reconcile(&cancelled).await.unwrap();
        assert_eq!(again, cancelled);
        assert_eq!(builder.cancel_build(&again).await.unwrap(), again);
    }
}
