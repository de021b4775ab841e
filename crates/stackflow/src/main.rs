mod commands;
mod diagnostics;
mod docker;
mod lock;
mod prompt;
mod setup;

use clap::{ArgGroup, Parser, Subcommand};
use colored::Colorize;
use commands::health::HealthMode;
use commands::setup::{ReadinessPolicy, SetupOptions};
use stackflow_container::CleanupMode;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stackflow")]
#[command(about = "マルチサービススタックを、ビルドから起動まで一度に。", long_about = None)]
#[command(group(
    ArgGroup::new("mode")
        .args(["health_check", "status", "cleanup", "cleanup_all", "cleanup_images"])
        .multiple(false)
))]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// 既存イメージを削除してから再ビルド
    #[arg(long, global = true)]
    force: bool,
    /// サービスの準備完了を待たない
    #[arg(long, global = true)]
    no_wait: bool,
    /// ステージ内のビルドも1つずつ実行
    #[arg(long, global = true)]
    serial: bool,
    /// 準備完了待機のタイムアウトを失敗として扱う
    #[arg(long, global = true)]
    strict_readiness: bool,
    /// 設定ファイル生成時のドメイン
    #[arg(long, env = "STACKFLOW_DOMAIN", global = true)]
    domain: Option<String>,

    /// 全サービスが起動中かを確認（停止中があれば exit 1）
    #[arg(long)]
    health_check: bool,
    /// サービスの状態を表示
    #[arg(long)]
    status: bool,
    /// 対話的にクリーンアップ
    #[arg(long)]
    cleanup: bool,
    /// コンテナ・イメージ・ネットワーク・ボリュームをすべて削除
    #[arg(long)]
    cleanup_all: bool,
    /// スタックのイメージのみ削除
    #[arg(long)]
    cleanup_images: bool,
    /// 確認プロンプトをスキップ
    #[arg(short = 'y', long, global = true)]
    yes: bool,
    /// 状態を JSON で出力（--status / --health-check）
    #[arg(long)]
    json: bool,

    /// スタックマニフェストのパス
    #[arg(long, env = "STACKFLOW_MANIFEST", global = true)]
    manifest: Option<PathBuf>,
    /// 詳細なログを出力
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// ビルドから起動までを実行（デフォルト）
    Setup,
    /// バージョン情報を表示
    Version,
}

/// 実行するモード
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Setup,
    Health(HealthMode),
    Cleanup(CleanupMode),
}

impl Cli {
    fn mode(&self) -> anyhow::Result<Mode> {
        let flag_mode = if self.health_check {
            Some(Mode::Health(HealthMode::Check))
        } else if self.status {
            Some(Mode::Health(HealthMode::Status))
        } else if self.cleanup {
            Some(Mode::Cleanup(CleanupMode::Interactive))
        } else if self.cleanup_all {
            Some(Mode::Cleanup(CleanupMode::All))
        } else if self.cleanup_images {
            Some(Mode::Cleanup(CleanupMode::Images))
        } else {
            None
        };

        match (self.command, flag_mode) {
            (Some(Commands::Setup), Some(_)) => {
                anyhow::bail!("setup と --status / --health-check / --cleanup* は同時に指定できません")
            }
            (_, Some(mode)) => Ok(mode),
            _ => Ok(Mode::Setup),
        }
    }

    fn setup_options(&self) -> SetupOptions {
        SetupOptions {
            force: self.force,
            no_wait: self.no_wait,
            serial: self.serial,
            readiness: if self.strict_readiness {
                ReadinessPolicy::Strict
            } else {
                ReadinessPolicy::Warn
            },
            domain: self.domain.clone(),
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "error" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    // Versionコマンドはマニフェスト不要
    if cli.command == Some(Commands::Version) {
        println!("stackflow {}", env!("CARGO_PKG_VERSION"));
        return Ok(ExitCode::SUCCESS);
    }

    let mode = cli.mode()?;
    let manifest = commands::load_manifest(cli.manifest.as_deref())?;

    match mode {
        Mode::Setup => commands::setup::handle(&manifest, &cli.setup_options()).await,
        Mode::Health(health) => commands::health::handle(&manifest, health, cli.json).await,
        Mode::Cleanup(cleanup) => commands::cleanup::handle(&manifest, cleanup, cli.yes).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!();
            eprintln!("{} {:#}", "✗".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
