//! 失敗時の診断情報
//!
//! パイプラインが失敗・中断したときに、各サービスの実行状態とログ末尾、
//! RunState のビルド状況をまとめて表示し、`.stackflow/` に保存する。

use chrono::{DateTime, Local};
use colored::Colorize;
use stackflow_container::{ComposeRuntime, ContainerHealth};
use stackflow_core::{Phase, RunState};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// サービスごとに取得するログの行数
pub const LOG_TAIL_LINES: usize = 50;

/// ビルド出力は末尾だけ残す
const BUILD_OUTPUT_LINES: usize = 20;

const TROUBLESHOOTING: &[&str] = &[
    "Dockerデーモンが起動しているか確認してください（docker info）",
    "ディスクの空き容量を確認してください（docker system df）",
    "ホストのポートが他のプロセスに使われていないか確認してください",
    "設定ファイル（.env）の値が正しいか確認してください",
    "stackflow --status でサービスの状態を確認してください",
    "stackflow --cleanup で環境を片付けてから再実行してください",
];

#[derive(Debug, Clone)]
pub struct BuildEntry {
    pub service: String,
    pub status: String,
    pub output_tail: Option<String>,
}

/// 収集時点のコンテナ状態
#[derive(Debug, Clone)]
pub struct ServiceStatus {
    pub service: String,
    pub health: Result<ContainerHealth, String>,
}

impl ServiceStatus {
    fn label(&self) -> String {
        match &self.health {
            Ok(health) => health.label().to_string(),
            Err(e) => format!("unknown ({})", e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceLogs {
    pub service: String,
    pub logs: Result<String, String>,
}

#[derive(Debug, Clone)]
pub struct Diagnostics {
    pub captured_at: DateTime<Local>,
    pub error: String,
    pub phase: Option<Phase>,
    pub current_stage: Option<usize>,
    pub launched: bool,
    pub builds: Vec<BuildEntry>,
    pub statuses: Vec<ServiceStatus>,
    pub logs: Vec<ServiceLogs>,
}

fn tail_lines(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

impl Diagnostics {
    /// 実行状態とサービスのログを集める
    ///
    /// 状態・ログ取得の失敗は診断に記録するだけで、収集は続ける。
    pub async fn collect<R: ComposeRuntime>(
        runtime: &R,
        services: &[String],
        state: &RunState,
        error: &str,
    ) -> Self {
        let builds = state
            .builds()
            .map(|(service, status)| BuildEntry {
                service: service.to_string(),
                status: status.label().to_string(),
                output_tail: match status {
                    stackflow_core::BuildStatus::Failed { output } if !output.trim().is_empty() => {
                        Some(tail_lines(output, BUILD_OUTPUT_LINES))
                    }
                    _ => None,
                },
            })
            .collect();

        let mut statuses = Vec::with_capacity(services.len());
        let mut logs = Vec::with_capacity(services.len());
        for service in services {
            let health = runtime
                .container_health(service)
                .await
                .map_err(|e| e.to_string());
            if let Err(e) = &health {
                tracing::debug!(service = %service, error = %e, "Failed to inspect container");
            }
            statuses.push(ServiceStatus {
                service: service.clone(),
                health,
            });

            let result = runtime
                .logs(service, LOG_TAIL_LINES)
                .await
                .map_err(|e| e.to_string());
            if let Err(e) = &result {
                tracing::debug!(service = %service, error = %e, "Failed to capture logs");
            }
            logs.push(ServiceLogs {
                service: service.clone(),
                logs: result,
            });
        }

        Self {
            captured_at: Local::now(),
            error: error.to_string(),
            phase: state.phase(),
            current_stage: state.current_stage(),
            launched: state.launched(),
            builds,
            statuses,
            logs,
        }
    }

    pub fn file_name(&self) -> String {
        format!(
            "diagnostics-{}.log",
            self.captured_at.format("%Y%m%d-%H%M%S")
        )
    }

    /// 保存用のプレーンテキスト
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "stackflow diagnostics");
        let _ = writeln!(out, "captured: {}", self.captured_at.to_rfc3339());
        let _ = writeln!(out, "error: {}", self.error);
        if let Some(phase) = self.phase {
            let _ = writeln!(out, "phase: {}", phase.name());
        }
        if let Some(stage) = self.current_stage {
            let _ = writeln!(out, "build stage: {}", stage + 1);
        }
        let _ = writeln!(out, "launched: {}", self.launched);

        let _ = writeln!(out, "\n== builds ==");
        if self.builds.is_empty() {
            let _ = writeln!(out, "(none)");
        }
        for build in &self.builds {
            let _ = writeln!(out, "{}: {}", build.service, build.status);
            if let Some(tail) = &build.output_tail {
                for line in tail.lines() {
                    let _ = writeln!(out, "    {}", line);
                }
            }
        }

        let _ = writeln!(out, "\n== services ==");
        if self.statuses.is_empty() {
            let _ = writeln!(out, "(none)");
        }
        for status in &self.statuses {
            let _ = writeln!(out, "{}: {}", status.service, status.label());
        }

        for entry in &self.logs {
            let _ = writeln!(out, "\n== logs: {} (last {} lines) ==", entry.service, LOG_TAIL_LINES);
            match &entry.logs {
                Ok(logs) if logs.trim().is_empty() => {
                    let _ = writeln!(out, "(no output)");
                }
                Ok(logs) => {
                    let _ = writeln!(out, "{}", logs.trim_end());
                }
                Err(e) => {
                    let _ = writeln!(out, "(unavailable: {})", e);
                }
            }
        }

        let _ = writeln!(out, "\n== troubleshooting ==");
        for (i, item) in TROUBLESHOOTING.iter().enumerate() {
            let _ = writeln!(out, "{}. {}", i + 1, item);
        }
        out
    }

    /// `dir/diagnostics-<timestamp>.log` に保存
    pub fn save(&self, dir: &Path) -> std::io::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        fs::write(&path, self.render())?;
        Ok(path)
    }

    /// 端末向けの要約
    pub fn print(&self) {
        println!();
        println!("{}", "━".repeat(44).red());
        println!("{}", "✗ デプロイに失敗しました".red().bold());
        println!("  {}", self.error);
        if let Some(phase) = self.phase {
            println!("  フェーズ: {}", phase.name());
        }

        if !self.builds.is_empty() {
            println!();
            println!("{}", "ビルド状況:".bold());
            for build in &self.builds {
                let status = match build.status.as_str() {
                    "failed" => build.status.red(),
                    "pending" => build.status.dimmed(),
                    _ => build.status.green(),
                };
                println!("  {:<24} {}", build.service, status);
                if let Some(tail) = &build.output_tail {
                    for line in tail.lines() {
                        println!("    {}", line.dimmed());
                    }
                }
            }
        }

        if !self.statuses.is_empty() {
            println!();
            println!("{}", "サービス状態:".bold());
            for status in &self.statuses {
                let label = status.label();
                let label = match &status.health {
                    Ok(health) if health.is_ready() => label.green(),
                    Ok(_) => label.red(),
                    Err(_) => label.dimmed(),
                };
                println!("  {:<24} {}", status.service, label);
            }
        }

        let with_logs: Vec<&ServiceLogs> = self
            .logs
            .iter()
            .filter(|l| matches!(&l.logs, Ok(text) if !text.trim().is_empty()))
            .collect();
        if !with_logs.is_empty() {
            println!();
            println!("{}", "サービスのログ（末尾）:".bold());
            for entry in with_logs {
                println!("  {}", entry.service.cyan());
                if let Ok(text) = &entry.logs {
                    for line in tail_lines(text, 10).lines() {
                        println!("    {}", line.dimmed());
                    }
                }
            }
        }

        println!();
        println!("{}", "トラブルシューティング:".yellow());
        for item in TROUBLESHOOTING {
            println!("  • {}", item);
        }
        println!("{}", "━".repeat(44).red());
    }
}
