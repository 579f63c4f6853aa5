use super::{ActionContext, delete_builder_pod};
use crate::error::Result;
use podforge_core::{Build, BuildPhase};

/// 新しい Pod を作る前に以前のワーカー Pod を片付ける
pub(super) async fn handle(ctx: &ActionContext<'_>, mut build: Build) -> Result<Build> {
    delete_builder_pod(ctx, &build).await?;

    match ctx.cluster.get_pod(build.namespace(), &ctx.pod_name(&build)).await {
        // まだ削除中: 次回の呼び出しまで待つ
        Ok(_) => {
            tracing::debug!("Waiting for pod of build {} to terminate", build.reference);
            Ok(build)
        }
        Err(e) if e.is_not_found() => {
            build.status.phase = BuildPhase::Scheduling;
            build.status.error = None;
            build.status.started_at = None;
            build.status.duration = None;
            Ok(build)
        }
        Err(e) => Err(e.into()),
    }
}
