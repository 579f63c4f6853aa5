//! reconcile アクション
//!
//! 各アクションが1つのフェーズ遷移を担う。チェーンを上から評価し、条件に
//! 一致した最初のアクションだけを実行するので、1回の reconcile で進むのは
//! 最大1ステップ。

mod cancel;
mod error;
mod initialize;
mod monitor;
mod recovery;
mod schedule;

use crate::error::Result;
use chrono::{DateTime, Utc};
use podforge_config::EngineConfig;
use podforge_core::{Build, BuildPhase, BuildStrategy};
use podforge_kube::Cluster;

/// 各アクションに渡すもの
#[derive(Clone, Copy)]
pub struct ActionContext<'a> {
    pub cluster: &'a dyn Cluster,
    pub config: &'a EngineConfig,
    /// この reconcile での現在時刻
    pub now: DateTime<Utc>,
}

impl ActionContext<'_> {
    pub(crate) fn pod_name(&self, build: &Build) -> String {
        crate::pod::build_pod_name(&self.config.pod_name_prefix, build)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Initialize,
    Schedule,
    Monitor,
    ErrorRecovery,
    Error,
    Cancel,
}

/// Pod ストラテジーの評価順
pub const POD_ACTIONS: [Action; 6] = [
    Action::Initialize,
    Action::Schedule,
    Action::Monitor,
    Action::ErrorRecovery,
    Action::Error,
    Action::Cancel,
];

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Initialize => "initialize-pod",
            Action::Schedule => "schedule",
            Action::Monitor => "monitor-pod",
            Action::ErrorRecovery => "error-recovery",
            Action::Error => "error",
            Action::Cancel => "cancel",
        }
    }

    pub fn can_handle(&self, build: &Build) -> bool {
        let phase = build.phase();
        match self {
            Action::Initialize => matches!(phase, BuildPhase::None | BuildPhase::Initialization),
            Action::Schedule => phase == BuildPhase::Scheduling,
            Action::Monitor => matches!(phase, BuildPhase::Pending | BuildPhase::Running),
            Action::ErrorRecovery => phase == BuildPhase::Failed,
            Action::Error => phase == BuildPhase::Error,
            Action::Cancel => phase == BuildPhase::Cancelled,
        }
    }

    pub async fn handle(&self, ctx: &ActionContext<'_>, build: Build) -> Result<Build> {
        match self {
            Action::Initialize => initialize::handle(ctx, build).await,
            Action::Schedule => schedule::handle(ctx, build).await,
            Action::Monitor => monitor::handle(ctx, build).await,
            Action::ErrorRecovery => recovery::handle(ctx, build),
            Action::Error => error::handle(build),
            Action::Cancel => cancel::handle(ctx, build).await,
        }
    }
}

/// Actions available for a build strategy
pub fn actions_for(strategy: BuildStrategy) -> &'static [Action] {
    match strategy {
        BuildStrategy::Pod => &POD_ACTIONS,
        BuildStrategy::Routine => &[],
    }
}

/// Run the first matching action against a copy of `build`
pub async fn run(ctx: &ActionContext<'_>, build: &Build) -> Result<Build> {
    let Some(action) = actions_for(build.spec.strategy)
        .iter()
        .find(|action| action.can_handle(build))
    else {
        return Ok(build.clone());
    };

    tracing::info!("Invoking action {}", action.name());
    let target = action
        .handle(ctx, build.clone())
        .await
        .inspect_err(|e| tracing::error!("Failed to invoke action {}: {}", action.name(), e))?;

    if target.phase() != build.phase() {
        tracing::info!(
            build = %build.reference,
            phase_from = %build.phase(),
            phase_to = %target.phase(),
            "state transition"
        );
    }
    Ok(target)
}

/// ワーカー Pod を削除 (存在しなければ削除済み扱い)
pub(crate) async fn delete_builder_pod(ctx: &ActionContext<'_>, build: &Build) -> Result<()> {
    match ctx
        .cluster
        .delete_pod(build.namespace(), &ctx.pod_name(build))
        .await
    {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Failed に遷移し、理由と実行時間を記録
pub(crate) fn mark_failed(build: &mut Build, reason: impl Into<String>, now: DateTime<Utc>) {
    build.status.phase = BuildPhase::Failed;
    build.status.error = Some(reason.into());
    build.status.duration = elapsed_since_start(build, now);
}

pub(crate) fn elapsed_since_start(build: &Build, now: DateTime<Utc>) -> Option<std::time::Duration> {
    build
        .status
        .started_at
        .and_then(|started| (now - started).to_std().ok())
}
