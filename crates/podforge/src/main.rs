mod commands;
mod utils;

use anyhow::Context;
use clap::{Parser, Subcommand};
use podforge_build::{Builder, FileBuildStore};
use podforge_kube::KubeCluster;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "podforge")]
#[command(about = "Kubernetes の Pod でコンテナイメージをビルドする", long_about = None)]
struct Cli {
    /// デバッグログを出力
    #[arg(short, long, global = true)]
    verbose: bool,
    /// ビルド状態の保存先 (デフォルト: <config_dir>/podforge/builds)
    #[arg(long, global = true, env = "PODFORGE_STORE_DIR")]
    store_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// ビルドをスケジュール
    Build(commands::build::BuildArgs),
    /// 保存済みビルドを1ステップ進める
    Reconcile {
        /// <namespace>/<name>
        build: String,
    },
    /// ビルドの状態を表示
    Status {
        /// <namespace>/<name>
        build: String,
        /// JSON で出力
        #[arg(long)]
        json: bool,
    },
    /// ビルドをキャンセル
    Cancel {
        /// <namespace>/<name>
        build: String,
    },
    /// 有効なエンジン設定を表示
    Config,
    /// バージョン情報を表示
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout はコマンド出力用なのでログは stderr へ
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if matches!(cli.command, Commands::Version) {
        println!("podforge {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = podforge_config::load().context("設定ファイルの読み込みに失敗しました")?;
    if matches!(cli.command, Commands::Config) {
        print!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    let store_dir = match cli.store_dir {
        Some(dir) => dir,
        None => podforge_config::get_config_dir()?.join("builds"),
    };
    let store = Arc::new(FileBuildStore::new(&store_dir));
    tracing::debug!("Build store: {}", store_dir.display());

    if let Commands::Status { build, json } = &cli.command {
        let (namespace, name) = utils::parse_build_key(build)?;
        return commands::status::handle(&*store, &namespace, &name, *json).await;
    }

    let cluster = KubeCluster::try_default()
        .await
        .context("Kubernetes クラスタに接続できません")?;
    let builder = Builder::new(Arc::new(cluster))
        .with_config(config)
        .with_store(store.clone());

    match cli.command {
        Commands::Build(args) => commands::build::handle(&builder, args).await,
        Commands::Reconcile { build } => {
            let (namespace, name) = utils::parse_build_key(&build)?;
            commands::reconcile::handle_reconcile(&builder, &*store, &namespace, &name).await
        }
        Commands::Cancel { build } => {
            let (namespace, name) = utils::parse_build_key(&build)?;
            commands::reconcile::handle_cancel(&builder, &*store, &namespace, &name).await
        }
        Commands::Status { .. } | Commands::Config | Commands::Version => {
            unreachable!("handled before connecting to the cluster")
        }
    }
}
