use crate::utils;
use anyhow::Context;
use clap::Args;
use colored::Colorize;
use podforge_build::Builder;
use podforge_core::{Build, BuildPhase, BuilderInfo, PlatformBuild};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Args)]
pub struct BuildArgs {
    /// プラットフォーム定義 (YAML)
    #[arg(short, long)]
    platform: PathBuf,
    /// ビルド名 (namespace 内で一意)
    #[arg(short, long)]
    name: String,
    /// 公開するイメージ名
    #[arg(short, long)]
    image: String,
    /// ビルドコンテキストに追加するファイル (<target>=<path>)
    #[arg(short, long = "resource")]
    resources: Vec<String>,
    /// 終了フェーズまで待機
    #[arg(short, long)]
    wait: bool,
    /// 待機中の reconcile 間隔 (秒)
    #[arg(long, default_value = "5")]
    interval: u64,
}

fn load_platform(path: &PathBuf) -> anyhow::Result<PlatformBuild> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("プラットフォーム定義を読み込めません: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("プラットフォーム定義の形式が不正です: {}", path.display()))
}

pub async fn handle(builder: &Builder, args: BuildArgs) -> anyhow::Result<()> {
    let platform = load_platform(&args.platform)?;
    let info = BuilderInfo {
        final_image_name: args.image,
        build_unique_name: args.name,
        platform,
    };

    let mut scheduler = builder.new_build(&info).map_err(utils::user_error)?;
    for resource in &args.resources {
        let (target, path) = utils::parse_resource(resource)?;
        let content = std::fs::read(&path)
            .with_context(|| format!("リソースを読み込めません: {}", path.display()))?;
        tracing::debug!("Adding resource {} ({} bytes)", target, content.len());
        scheduler = scheduler.with_resource(target, content);
    }

    println!("{}", "ビルドをスケジュール中...".blue());
    let build = scheduler.schedule().await.map_err(utils::user_error)?;
    println!("{} {}", "✓ スケジュールしました:".green(), build.reference.to_string().cyan());

    if !args.wait {
        utils::print_build(&build);
        return Ok(());
    }

    let build = wait_for_build(builder, build, Duration::from_secs(args.interval.max(1))).await?;
    utils::print_build(&build);
    match build.phase() {
        BuildPhase::Succeeded => Ok(()),
        phase => anyhow::bail!(
            "ビルドが {} で終了しました: {}",
            phase,
            build.status.error.as_deref().unwrap_or("-")
        ),
    }
}

/// 終了フェーズまで reconcile を繰り返す
async fn wait_for_build(builder: &Builder, mut build: Build, interval: Duration) -> anyhow::Result<Build> {
    while !build.phase().is_terminal() {
        tokio::time::sleep(interval).await;

        match builder.reconcile(&build).await {
            Ok(next) => {
                if next.phase() != build.phase() {
                    println!(
                        "  {} → {}",
                        utils::colored_phase(build.phase()),
                        utils::colored_phase(next.phase())
                    );
                }
                build = next;
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!("Reconcile of {} failed, retrying: {}", build.reference, e);
                // 競合時は保存済みの最新版から再開
                if let Some(store) = builder.store() {
                    build = store
                        .load(build.namespace(), build.name())
                        .await
                        .map_err(utils::user_error)?;
                }
            }
            Err(e) => return Err(utils::user_error(e)),
        }
    }
    Ok(build)
}
