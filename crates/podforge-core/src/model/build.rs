use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::platform::{BuildStrategy, ObjectReference, PlatformBuild, PublishStrategy};
use super::task::{BaseTask, BuildahTask, KanikoTask, KanikoTaskCache, PublishTask, Task};
use crate::error::{ModelError, Result};

/// ワーカー Pod 内のビルド作業ディレクトリのルート
pub const BUILDER_DIR: &str = "/builder";
/// ビルド作業ディレクトリ内のコンテキストディレクトリ
pub const CONTEXT_DIR: &str = "context";

/// reconcile の状態遷移におけるビルドの現在位置
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildPhase {
    /// 作成直後。まだ何も起きていない
    #[default]
    #[serde(rename = "")]
    None,
    Initialization,
    Scheduling,
    Pending,
    Running,
    Succeeded,
    Failed,
    /// リカバリを諦めた。以降は遷移しない
    Error,
    /// 要求によりキャンセル。以降は遷移しない
    Cancelled,
}

impl BuildPhase {
    /// 終了フェーズからは自動で遷移しない
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildPhase::Succeeded | BuildPhase::Error | BuildPhase::Cancelled
        )
    }
}

impl std::fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildPhase::None => write!(f, ""),
            BuildPhase::Initialization => write!(f, "Initialization"),
            BuildPhase::Scheduling => write!(f, "Scheduling"),
            BuildPhase::Pending => write!(f, "Pending"),
            BuildPhase::Running => write!(f, "Running"),
            BuildPhase::Succeeded => write!(f, "Succeeded"),
            BuildPhase::Failed => write!(f, "Failed"),
            BuildPhase::Error => write!(f, "Error"),
            BuildPhase::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// 失敗したビルドのリカバリ状況
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecovery {
    pub attempt: u32,
    pub attempt_max: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt_time: Option<DateTime<Utc>>,
}

/// ビルドの最初の失敗。以後ずっと保持される
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub reason: String,
    pub time: DateTime<Utc>,
    pub recovery: FailureRecovery,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSpec {
    /// The engine currently runs exactly one task per build
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub strategy: BuildStrategy,
    /// 0 でタイムアウトなし
    #[serde(default, with = "humantime_serde")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStatus {
    #[serde(default)]
    pub phase: BuildPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// 直近の失敗理由
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub duration: Option<Duration>,
}

/// The unit of work tracked through the phase lifecycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    #[serde(flatten)]
    pub reference: ObjectReference,
    /// ストアへの書き込みごとに増える
    #[serde(default)]
    pub resource_version: u64,
    pub spec: BuildSpec,
    #[serde(default)]
    pub status: BuildStatus,
}

/// ビルド作成の入力
#[derive(Debug, Clone, Default)]
pub struct BuilderInfo {
    /// 公開するイメージ名
    pub final_image_name: String,
    /// プラットフォームの namespace 内で一意なビルド名
    pub build_unique_name: String,
    pub platform: PlatformBuild,
}

impl Build {
    pub fn name(&self) -> &str {
        &self.reference.name
    }

    pub fn namespace(&self) -> &str {
        &self.reference.namespace
    }

    pub fn phase(&self) -> BuildPhase {
        self.status.phase
    }

    /// `/builder/<build-name>/context`
    pub fn context_dir(name: &str) -> String {
        format!("{}/{}/{}", BUILDER_DIR, name, CONTEXT_DIR)
    }

    /// プラットフォーム定義のストラテジーに応じてビルドを作成する。
    ///
    /// Pod エンジンで実行できない組み合わせはエラー。
    pub fn from_platform(info: &BuilderInfo) -> Result<Build> {
        validate_name(&info.build_unique_name)?;

        let spec = &info.platform.spec;
        match (spec.build_strategy, spec.publish_strategy) {
            (BuildStrategy::Pod, PublishStrategy::Kaniko) => Ok(Self::new_kaniko(info)),
            (BuildStrategy::Pod, PublishStrategy::Buildah) => Ok(Self::new_buildah(info)),
            (build_strategy, publish_strategy) => Err(ModelError::UnsupportedStrategy {
                build_strategy,
                publish_strategy,
            }),
        }
    }

    pub fn new_kaniko(info: &BuilderInfo) -> Build {
        let task = KanikoTask {
            base: BaseTask {
                name: "KanikoTask".to_string(),
            },
            publish: publish_task(info),
            cache: KanikoTaskCache::default(),
            ..Default::default()
        };
        Self::with_task(info, Task::Kaniko(task))
    }

    pub fn new_buildah(info: &BuilderInfo) -> Build {
        let task = BuildahTask {
            base: BaseTask {
                name: "BuildahTask".to_string(),
            },
            publish: publish_task(info),
            ..Default::default()
        };
        Self::with_task(info, Task::Buildah(task))
    }

    fn with_task(info: &BuilderInfo, task: Task) -> Build {
        Build {
            reference: ObjectReference::new(
                info.platform.reference.namespace.clone(),
                info.build_unique_name.clone(),
            ),
            resource_version: 0,
            spec: BuildSpec {
                tasks: vec![task],
                strategy: BuildStrategy::Pod,
                timeout: info.platform.spec.timeout(),
            },
            status: BuildStatus::default(),
        }
    }

    /// 最初の Kaniko タスク
    pub fn kaniko_task_mut(&mut self) -> Option<&mut KanikoTask> {
        self.spec.tasks.iter_mut().find_map(|task| match task {
            Task::Kaniko(kaniko) => Some(kaniko),
            Task::Buildah(_) => None,
        })
    }

    /// 最初の Buildah タスク
    pub fn buildah_task_mut(&mut self) -> Option<&mut BuildahTask> {
        self.spec.tasks.iter_mut().find_map(|task| match task {
            Task::Buildah(buildah) => Some(buildah),
            Task::Kaniko(_) => None,
        })
    }
}

fn publish_task(info: &BuilderInfo) -> PublishTask {
    PublishTask {
        context_dir: Build::context_dir(&info.build_unique_name),
        base_image: info.platform.spec.base_image.clone(),
        image: info.final_image_name.clone(),
        registry: info.platform.spec.registry.clone(),
    }
}

/// ビルド名のラベル値としての最大長
pub const MAX_NAME_LEN: usize = 63;

/// ビルド名は Pod 名・ConfigMap 名・ラベル値に使われるため DNS-1123 に準拠させる。
/// `.` で区切った各部分は英数字で始まり英数字で終わる
fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.split('.').all(|segment| {
            let bytes = segment.as_bytes();
            match (bytes.first(), bytes.last()) {
                (Some(first), Some(last)) => {
                    first.is_ascii_alphanumeric()
                        && last.is_ascii_alphanumeric()
                        && bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
                }
                _ => false,
            }
        });
    if valid {
        Ok(())
    } else {
        Err(ModelError::InvalidName(name.to_string()))
    }
}
