//! フォワードパイプライン
//!
//! 環境チェック → 設定生成 → イメージビルド → サービス起動 → 準備完了待機 → 状態レポート
//! の順に実行する。どこかで失敗・中断した場合は診断情報を集めて保存する。

use crate::commands::health::print_table;
use crate::diagnostics::Diagnostics;
use crate::docker;
use crate::lock::RunLock;
use crate::setup::StepLogger;
use colored::Colorize;
use stackflow_build::{BuildPipeline, DockerImageBuilder, ImageBuilder, PipelineOptions};
use stackflow_config::{ConfigMaterializer, ConfigTemplate, Origin};
use stackflow_container::{
    ComposeRuntime, DockerCompose, HostInspector, LiveProber, ReadinessCheck, SystemHost,
    run_preflight, snapshot, wait_for_readiness,
};
use stackflow_core::{Phase, RunState, StackManifest, plan_stages};
use std::process::ExitCode;

/// Ctrl-C で中断されたときの終了コード
pub const EXIT_INTERRUPTED: u8 = 130;

/// 準備完了待機がタイムアウトしたときの扱い
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadinessPolicy {
    /// 警告を出して続行
    #[default]
    Warn,
    /// 失敗として扱う
    Strict,
}

#[derive(Debug, Clone, Default)]
pub struct SetupOptions {
    pub force: bool,
    pub no_wait: bool,
    pub serial: bool,
    pub readiness: ReadinessPolicy,
    pub domain: Option<String>,
}

pub async fn handle(manifest: &StackManifest, options: &SetupOptions) -> anyhow::Result<ExitCode> {
    let _lock = RunLock::acquire(&manifest.state_dir())?;

    println!(
        "{} {}",
        "▶ セットアップを開始します:".blue().bold(),
        manifest.project.cyan()
    );
    println!();

    let docker_conn = docker::init_docker_with_error_handling().await?;
    let runtime = DockerCompose::new(docker_conn.clone(), manifest);
    let builder = DockerImageBuilder::new(docker_conn);

    let setup = Setup {
        manifest,
        options,
        host: &SystemHost,
        runtime: &runtime,
        builder: &builder,
    };
    setup.run_guarded().await
}

/// パイプラインと外部との境界
pub struct Setup<'a, H, R, B> {
    pub manifest: &'a StackManifest,
    pub options: &'a SetupOptions,
    pub host: &'a H,
    pub runtime: &'a R,
    pub builder: &'a B,
}

impl<H, R, B> Setup<'_, H, R, B>
where
    H: HostInspector,
    R: ComposeRuntime,
    B: ImageBuilder,
{
    /// パイプラインを実行し、失敗・中断時は診断情報を残す
    pub async fn run_guarded(&self) -> anyhow::Result<ExitCode> {
        self.run_until(tokio::signal::ctrl_c()).await
    }

    /// `interrupt` が先に完了したら中断として扱う
    pub async fn run_until<F>(&self, interrupt: F) -> anyhow::Result<ExitCode>
    where
        F: std::future::Future,
    {
        let mut state = RunState::new();
        let mut log = StepLogger::new();

        let outcome = tokio::select! {
            result = self.run(&mut state, &mut log) => Some(result),
            _ = interrupt => None,
        };

        match outcome {
            Some(Ok(())) => {
                log.print_summary(&self.manifest.project);
                Ok(ExitCode::SUCCESS)
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, phase = ?state.phase(), "Setup failed");
                self.capture_diagnostics(&state, &format!("{:#}", e)).await;
                log.print_summary(&self.manifest.project);
                Err(e)
            }
            None => {
                println!();
                println!("{}", "⚠ 中断されました".yellow().bold());
                tracing::warn!(phase = ?state.phase(), "Setup interrupted");
                if state.launched() {
                    println!("{}", "起動したサービスを停止しています...".yellow());
                    if let Err(e) = self.runtime.stop().await {
                        println!("{} {}", "⚠ サービスの停止に失敗しました:".yellow(), e);
                    }
                }
                self.capture_diagnostics(&state, "ユーザーによって中断されました")
                    .await;
                Ok(ExitCode::from(EXIT_INTERRUPTED))
            }
        }
    }

    async fn capture_diagnostics(&self, state: &RunState, error: &str) {
        let diagnostics =
            Diagnostics::collect(self.runtime, &self.manifest.service_names(), state, error).await;
        diagnostics.print();

        match diagnostics.save(&self.manifest.state_dir()) {
            Ok(path) => println!(
                "{} {}",
                "ℹ 診断情報を保存しました:".cyan(),
                path.display()
            ),
            Err(e) => println!("{} {}", "⚠ 診断情報を保存できませんでした:".yellow(), e),
        }
    }

    /// 各フェーズを順に実行
    pub async fn run(&self, state: &mut RunState, log: &mut StepLogger) -> anyhow::Result<()> {
        self.preflight(state, log)?;
        self.configure(state, log)?;
        self.build(state, log).await?;
        self.launch(state, log).await?;
        self.wait_ready(state, log).await?;
        self.report(state, log).await
    }

    fn preflight(&self, state: &mut RunState, log: &mut StepLogger) -> anyhow::Result<()> {
        state.enter(Phase::Preflight);
        log.start_step(Phase::Preflight);

        let report = run_preflight(self.manifest, self.host, &self.manifest.root);
        for warning in report.warnings() {
            log.log_warning(&warning.message);
        }

        if !report.passed() {
            let messages: Vec<&str> = report.failures().map(|c| c.message.as_str()).collect();
            let message = messages.join("\n");
            log.step_failed(&message);
            anyhow::bail!("環境チェックに失敗しました: {}", message);
        }

        log.step_success(None);
        Ok(())
    }

    fn configure(&self, state: &mut RunState, log: &mut StepLogger) -> anyhow::Result<()> {
        state.enter(Phase::Configure);
        log.start_step(Phase::Configure);

        let template = match &self.options.domain {
            Some(domain) => ConfigTemplate::for_domain(domain),
            None => ConfigTemplate::standard(),
        };
        let materialized = match ConfigMaterializer::new(self.manifest.env_path(), template).materialize() {
            Ok(materialized) => materialized,
            Err(e) => {
                log.step_failed(&e.to_string());
                return Err(e.into());
            }
        };

        if materialized.tightened {
            log.log_detail("設定ファイルのパーミッションを 600 に変更しました");
        }
        if !materialized.missing_keys.is_empty() {
            log.log_warning(&format!(
                "設定ファイルに無いキーがあります: {}",
                materialized.missing_keys.join(", ")
            ));
        }

        let message = match materialized.origin {
            Origin::Generated => format!("設定ファイルを生成しました: {}", materialized.path.display()),
            Origin::Reused => format!("既存の設定ファイルを使用します: {}", materialized.path.display()),
        };
        log.step_success(Some(&message));
        Ok(())
    }

    async fn build(&self, state: &mut RunState, log: &mut StepLogger) -> anyhow::Result<()> {
        state.enter(Phase::Build);
        log.start_step(Phase::Build);

        let stages = match plan_stages(&self.manifest.services) {
            Ok(stages) => stages,
            Err(e) => {
                log.step_failed(&e.to_string());
                return Err(e.into());
            }
        };
        if stages.is_empty() {
            log.step_skipped("ビルド対象のサービスがありません");
            return Ok(());
        }
        for stage in &stages {
            log.log_detail(&format!(
                "ステージ {}: {}",
                stage.index + 1,
                stage.names().join(", ")
            ));
        }

        let options = PipelineOptions {
            force: self.options.force,
            serial: self.options.serial,
        };
        let pipeline = BuildPipeline::new(self.builder, self.manifest, options);
        if let Err(e) = pipeline.run(&stages, state).await {
            log.step_failed(&e.user_message());
            return Err(e.into());
        }

        let reused = state
            .builds()
            .filter(|(_, status)| status.label() == "reused")
            .count();
        let total = state.builds().count();
        log.step_success(Some(&format!(
            "{} 個のイメージを用意しました（再利用 {}）",
            total, reused
        )));
        Ok(())
    }

    async fn launch(&self, state: &mut RunState, log: &mut StepLogger) -> anyhow::Result<()> {
        state.enter(Phase::Launch);
        log.start_step(Phase::Launch);

        if let Err(e) = self.runtime.launch().await {
            log.step_failed(&e.to_string());
            return Err(e.into());
        }
        state.mark_launched();

        log.step_success(None);
        Ok(())
    }

    async fn wait_ready(&self, state: &mut RunState, log: &mut StepLogger) -> anyhow::Result<()> {
        state.enter(Phase::Readiness);
        log.start_step(Phase::Readiness);

        if self.options.no_wait {
            log.step_skipped("--no-wait");
            return Ok(());
        }

        let checks: Vec<ReadinessCheck> = self
            .manifest
            .services
            .iter()
            .filter_map(ReadinessCheck::for_service)
            .collect();
        if checks.is_empty() {
            log.step_skipped("準備完了シグナルを持つサービスがありません");
            return Ok(());
        }
        for check in &checks {
            log.log_detail(&format!(
                "{} ({}, 最大 {}s)",
                check.target,
                check.signal.label(),
                check.timeout.as_secs()
            ));
        }

        let prober = LiveProber::new(self.runtime)?;
        let report = wait_for_readiness(&prober, checks).await;

        let timed_out = report.timed_out();
        if timed_out.is_empty() {
            log.step_success(Some(&format!(
                "{} 個のサービスが準備完了しました",
                report.checks.len()
            )));
            return Ok(());
        }

        let names: Vec<&str> = timed_out.iter().map(|c| c.target.as_str()).collect();
        match self.options.readiness {
            ReadinessPolicy::Warn => {
                for check in &timed_out {
                    log.log_warning(&format!(
                        "{} が {}s 以内に準備完了になりませんでした（{} 回確認）",
                        check.target,
                        check.timeout.as_secs(),
                        check.attempts
                    ));
                }
                log.step_success(None);
                Ok(())
            }
            ReadinessPolicy::Strict => {
                let message = format!("準備完了待機がタイムアウトしました: {}", names.join(", "));
                log.step_failed(&message);
                anyhow::bail!(message)
            }
        }
    }

    async fn report(&self, state: &mut RunState, log: &mut StepLogger) -> anyhow::Result<()> {
        state.enter(Phase::Report);
        log.start_step(Phase::Report);

        // 起動自体は成功しているので、取得できなくても失敗にはしない
        match snapshot(self.runtime, &self.manifest.service_names()).await {
            Ok(report) => {
                print_table(&report);
                if report.is_healthy() {
                    log.step_success(None);
                } else {
                    for service in report.unhealthy() {
                        log.log_warning(&format!("{} は {} です", service.name, service.state.label()));
                    }
                    log.step_success(None);
                }
            }
            Err(e) => {
                log.log_warning(&format!("状態を取得できませんでした: {}", e));
                log.step_success(None);
            }
        }
        Ok(())
    }
}
