use super::ActionContext;
use crate::backoff::Backoff;
use crate::error::Result;
use podforge_core::{Build, BuildPhase, Failure, FailureRecovery};

/// 失敗したビルドを指数バックオフで上限回数までリトライする。
///
/// 初回は失敗を記録するだけ。記録はリトライが成功しても残るので、
/// 上限はビルド全体のリトライ回数になる。
pub(super) fn handle(ctx: &ActionContext<'_>, mut build: Build) -> Result<Build> {
    let Some(mut failure) = build.status.failure.clone() else {
        build.status.failure = Some(Failure {
            reason: build.status.error.clone().unwrap_or_default(),
            time: ctx.now,
            recovery: FailureRecovery {
                attempt: 0,
                attempt_max: ctx.config.recovery.attempt_max,
                attempt_time: None,
            },
        });
        return Ok(build);
    };

    let recovery = &mut failure.recovery;
    if recovery.attempt >= recovery.attempt_max {
        tracing::warn!(
            "Build {} failed after {} recovery attempts",
            build.reference,
            recovery.attempt
        );
        build.status.phase = BuildPhase::Error;
        return Ok(build);
    }

    let last_attempt = recovery
        .attempt_time
        .map_or(failure.time, |time| time.max(failure.time));
    let elapsed = (ctx.now - last_attempt).to_std().unwrap_or_default();
    let wait = Backoff::from(&ctx.config.recovery).for_attempt(recovery.attempt);
    if elapsed < wait {
        tracing::debug!(
            "Build {} waits {:?} more before retrying",
            build.reference,
            wait - elapsed
        );
        return Ok(build);
    }

    recovery.attempt += 1;
    recovery.attempt_time = Some(ctx.now);
    tracing::info!("Recovery attempt ({}/{})", recovery.attempt, recovery.attempt_max);

    build.status.failure = Some(failure);
    build.status.phase = BuildPhase::Initialization;
    Ok(build)
}
