use super::{ActionContext, delete_builder_pod};
use crate::error::Result;
use podforge_core::Build;

/// キャンセルされたビルドのワーカー Pod を削除したままにする。Cancelled からは遷移しない
pub(super) async fn handle(ctx: &ActionContext<'_>, build: Build) -> Result<Build> {
    delete_builder_pod(ctx, &build).await?;
    Ok(build)
}
