use anyhow::Context;
use colored::Colorize;
use podforge_build::BuildError;
use podforge_core::{Build, BuildPhase};
use std::path::PathBuf;

/// `<namespace>/<name>` を分解
pub fn parse_build_key(key: &str) -> anyhow::Result<(String, String)> {
    match key.split_once('/') {
        Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((namespace.to_string(), name.to_string()))
        }
        _ => anyhow::bail!(
            "ビルドは <namespace>/<name> の形式で指定してください: {}",
            key
        ),
    }
}

/// `<target>=<path>` を分解。target はビルドコンテキスト内の相対パス
pub fn parse_resource(spec: &str) -> anyhow::Result<(String, PathBuf)> {
    let (target, path) = spec
        .split_once('=')
        .filter(|(target, path)| !target.is_empty() && !path.is_empty())
        .with_context(|| format!("リソースは <target>=<path> の形式で指定してください: {}", spec))?;
    Ok((target.trim_start_matches('/').to_string(), PathBuf::from(path)))
}

/// エンジンのエラーをユーザー向けメッセージに変換
pub fn user_error(e: BuildError) -> anyhow::Error {
    anyhow::anyhow!(e.user_message())
}

pub fn colored_phase(phase: BuildPhase) -> String {
    let label = match phase {
        BuildPhase::None => "New".to_string(),
        other => other.to_string(),
    };
    match phase {
        BuildPhase::Succeeded => label.green().to_string(),
        BuildPhase::Failed | BuildPhase::Error => label.red().to_string(),
        BuildPhase::Cancelled => label.yellow().to_string(),
        _ => label.cyan().to_string(),
    }
}

pub fn print_build(build: &Build) {
    println!("{} {}", "ビルド:".bold(), build.reference.to_string().cyan());
    println!("  フェーズ: {}", colored_phase(build.phase()));
    if let Some(task) = build.spec.tasks.first() {
        println!("  タスク:   {}", task.name());
        println!("  イメージ: {}", task.publish().image);
    }
    if let Some(started_at) = build.status.started_at {
        println!("  開始:     {}", started_at.to_rfc3339());
    }
    if let Some(duration) = build.status.duration {
        println!("  所要時間: {}s", duration.as_secs());
    }
    if let Some(error) = &build.status.error {
        println!("  エラー:   {}", error.red());
    }
    if let Some(failure) = &build.status.failure {
        println!(
            "  リカバリ: {}/{}",
            failure.recovery.attempt, failure.recovery.attempt_max
        );
    }
}
