use crate::utils;
use colored::Colorize;
use podforge_build::{BuildStore, Builder};

pub async fn handle_reconcile(
    builder: &Builder,
    store: &dyn BuildStore,
    namespace: &str,
    name: &str,
) -> anyhow::Result<()> {
    let build = store.load(namespace, name).await.map_err(utils::user_error)?;
    let next = builder.reconcile(&build).await.map_err(utils::user_error)?;

    if next.phase() == build.phase() {
        println!("{}", "フェーズに変化はありません".dimmed());
    } else {
        println!(
            "{} → {}",
            utils::colored_phase(build.phase()),
            utils::colored_phase(next.phase())
        );
    }
    utils::print_build(&next);
    Ok(())
}

pub async fn handle_cancel(
    builder: &Builder,
    store: &dyn BuildStore,
    namespace: &str,
    name: &str,
) -> anyhow::Result<()> {
    let build = store.load(namespace, name).await.map_err(utils::user_error)?;
    if build.phase().is_terminal() {
        println!(
            "{} {}",
            "ビルドは既に終了しています:".yellow(),
            utils::colored_phase(build.phase())
        );
        return Ok(());
    }

    let cancelled = builder.cancel_build(&build).await.map_err(utils::user_error)?;
    println!("{} {}", "✓ キャンセルしました:".green(), cancelled.reference.to_string().cyan());
    Ok(())
}
