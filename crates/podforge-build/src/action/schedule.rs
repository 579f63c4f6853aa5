use super::ActionContext;
use crate::error::Result;
use crate::pod::new_build_pod;
use podforge_core::{Build, BuildPhase};

/// ワーカー Pod を作成し、開始時刻を記録
pub(super) async fn handle(ctx: &ActionContext<'_>, mut build: Build) -> Result<Build> {
    let pod = new_build_pod(ctx.cluster, ctx.config, &build).await?;

    match ctx.cluster.create_pod(&pod).await {
        Ok(_) => tracing::debug!("Created pod {}", ctx.pod_name(&build)),
        // 前回の呼び出しで作成済み
        Err(e) if e.is_already_exists() => {}
        Err(e) => return Err(e.into()),
    }

    build.status.started_at = Some(ctx.now);
    build.status.phase = BuildPhase::Pending;
    Ok(build)
}
