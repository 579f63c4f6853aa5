use k8s_openapi::api::core::v1::ResourceRequirements;
use serde::{Deserialize, Serialize};

use super::platform::RegistrySpec;

/// 全タスク共通の識別情報
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseTask {
    pub name: String,
}

/// ビルド対象と公開先
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishTask {
    /// Dockerfile とビルドコンテキストのディレクトリ
    pub context_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_image: Option<String>,
    /// レジストリアドレスを含まないイメージ名
    pub image: String,
    #[serde(default)]
    pub registry: RegistrySpec,
}

/// Kaniko のレイヤーキャッシュ設定
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KanikoTaskCache {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// キャッシュディレクトリにマウントする PVC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim: Option<String>,
}

impl KanikoTaskCache {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KanikoTask {
    #[serde(flatten)]
    pub base: BaseTask,
    #[serde(flatten)]
    pub publish: PublishTask,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub cache: KanikoTaskCache,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_flags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_image: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildahTask {
    #[serde(flatten)]
    pub base: BaseTask,
    #[serde(flatten)]
    pub publish: PublishTask,
    /// Target platform passed to `buildah bud --platform`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_flags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_image: Option<String>,
}

/// ビルド内の作業単位 (どのビルダーをどう動かすか)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Task {
    Kaniko(KanikoTask),
    Buildah(BuildahTask),
}

impl Task {
    pub fn name(&self) -> &str {
        match self {
            Task::Kaniko(task) => &task.base.name,
            Task::Buildah(task) => &task.base.name,
        }
    }

    pub fn publish(&self) -> &PublishTask {
        match self {
            Task::Kaniko(task) => &task.publish,
            Task::Buildah(task) => &task.publish,
        }
    }

    pub fn publish_mut(&mut self) -> &mut PublishTask {
        match self {
            Task::Kaniko(task) => &mut task.publish,
            Task::Buildah(task) => &mut task.publish,
        }
    }
}
