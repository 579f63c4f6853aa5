use super::{ActionContext, delete_builder_pod, elapsed_since_start, mark_failed};
use crate::error::Result;
use crate::pod::new_build_pod;
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use podforge_core::{Build, BuildPhase};

/// ワーカー Pod を監視し、そのフェーズをビルドに反映する
pub(super) async fn handle(ctx: &ActionContext<'_>, mut build: Build) -> Result<Build> {
    if is_timed_out(&build, ctx) {
        delete_builder_pod(ctx, &build).await?;
        let reason = format!("build timed out after {}s", build.spec.timeout.as_secs());
        tracing::warn!("Build {}: {}", build.reference, reason);
        mark_failed(&mut build, reason, ctx.now);
        return Ok(build);
    }

    let pod = match ctx.cluster.get_pod(build.namespace(), &ctx.pod_name(&build)).await {
        Ok(pod) => pod,
        Err(e) if e.is_not_found() => return handle_missing_pod(ctx, build).await,
        Err(e) => return Err(e.into()),
    };

    let phase = pod
        .status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        .unwrap_or_default();

    match phase {
        "Pending" => build.status.phase = BuildPhase::Pending,
        "Running" => build.status.phase = BuildPhase::Running,
        "Succeeded" => {
            build.status.phase = BuildPhase::Succeeded;
            build.status.duration = elapsed_since_start(&build, ctx.now);
        }
        "Failed" => mark_failed(&mut build, failure_message(&pod), ctx.now),
        _ => {}
    }
    Ok(build)
}

fn is_timed_out(build: &Build, ctx: &ActionContext<'_>) -> bool {
    let timeout = build.spec.timeout;
    if timeout.is_zero() {
        return false;
    }
    elapsed_since_start(build, ctx.now).is_some_and(|elapsed| elapsed > timeout)
}

async fn handle_missing_pod(ctx: &ActionContext<'_>, mut build: Build) -> Result<Build> {
    if build.phase() == BuildPhase::Running {
        mark_failed(&mut build, "builder pod disappeared while running", ctx.now);
        return Ok(build);
    }

    tracing::info!("Pod of build {} is missing, recreating", build.reference);
    let pod = new_build_pod(ctx.cluster, ctx.config, &build).await?;
    match ctx.cluster.create_pod(&pod).await {
        Ok(_) => Ok(build),
        Err(e) if e.is_already_exists() => Ok(build),
        Err(e) => Err(e.into()),
    }
}

/// 失敗したワーカー Pod の理由
pub(crate) fn failure_message(pod: &Pod) -> String {
    let Some(status) = pod.status.as_ref() else {
        return "builder pod failed".to_string();
    };

    let statuses = status
        .init_container_statuses
        .iter()
        .chain(status.container_statuses.iter())
        .flatten();
    if let Some(message) = statuses.filter_map(terminated_message).next() {
        return message;
    }

    status
        .message
        .clone()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "builder pod failed".to_string())
}

fn terminated_message(status: &ContainerStatus) -> Option<String> {
    let terminated = status.state.as_ref()?.terminated.as_ref()?;
    if terminated.exit_code == 0 {
        return None;
    }

    let reason = terminated.reason.as_deref().unwrap_or("Error");
    let mut message = format!(
        "{}: {} (exit code {})",
        status.name, reason, terminated.exit_code
    );
    if let Some(detail) = terminated.message.as_deref().filter(|m| !m.is_empty()) {
        message.push_str(": ");
        message.push_str(detail.trim_end());
    }
    Some(message)
}
