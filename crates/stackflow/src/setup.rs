//! セットアップの進捗表示
//!
//! パイプラインの各フェーズの開始・結果・所要時間を記録して表示する。

use chrono::Local;
use colored::Colorize;
use stackflow_core::Phase;
use std::time::{Duration, Instant};

/// フェーズの実行結果
#[derive(Debug, Clone)]
pub enum StepResult {
    Success { duration: Duration },
    /// 警告付きで完了（準備完了待機のタイムアウト等）
    Warned { duration: Duration, warnings: usize },
    Skipped,
    Failed { error: String, duration: Duration },
}

impl StepResult {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::Success { duration, .. }
            | Self::Warned { duration, .. }
            | Self::Failed { duration, .. } => Some(*duration),
            Self::Skipped => None,
        }
    }
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

pub struct StepLogger {
    start_time: Instant,
    step_results: Vec<(Phase, StepResult)>,
    current_step: Option<(Phase, Instant)>,
    warnings: usize,
}

impl StepLogger {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            step_results: Vec::new(),
            current_step: None,
            warnings: 0,
        }
    }

    /// フェーズ開始をログ出力
    pub fn start_step(&mut self, phase: Phase) {
        println!("[{}] {} {}", timestamp().dimmed(), "▶".cyan(), phase.name());
        self.current_step = Some((phase, Instant::now()));
        self.warnings = 0;
    }

    /// フェーズ成功をログ出力
    pub fn step_success(&mut self, message: Option<&str>) {
        let Some((phase, start)) = self.current_step.take() else {
            return;
        };
        let duration = start.elapsed();
        let label = message.map(String::from).unwrap_or_else(|| format!("{} 完了", phase.name()));

        if self.warnings > 0 {
            println!(
                "[{}] {} {} ({}, 警告 {} 件)",
                timestamp().dimmed(),
                "⚠".yellow().bold(),
                label,
                format_duration(duration).dimmed(),
                self.warnings
            );
            self.step_results.push((
                phase,
                StepResult::Warned {
                    duration,
                    warnings: self.warnings,
                },
            ));
            return;
        }

        println!(
            "[{}] {} {} ({})",
            timestamp().dimmed(),
            "✓".green().bold(),
            label,
            format_duration(duration).dimmed()
        );
        self.step_results.push((
            phase,
            StepResult::Success { duration },
        ));
    }

    /// フェーズスキップをログ出力
    pub fn step_skipped(&mut self, reason: &str) {
        if let Some((phase, _)) = self.current_step.take() {
            println!(
                "[{}] {} {} ({})",
                timestamp().dimmed(),
                "⏭".yellow(),
                phase.name(),
                reason.dimmed()
            );
            self.step_results.push((phase, StepResult::Skipped));
        }
    }

    /// フェーズ失敗をログ出力
    pub fn step_failed(&mut self, error: &str) {
        if let Some((phase, start)) = self.current_step.take() {
            let duration = start.elapsed();
            println!(
                "[{}] {} {}: {}",
                timestamp().dimmed(),
                "✗".red().bold(),
                phase.name(),
                error.red()
            );
            self.step_results.push((
                phase,
                StepResult::Failed {
                    error: error.to_string(),
                    duration,
                },
            ));
        }
    }

    /// 詳細メッセージ
    pub fn log_detail(&self, message: &str) {
        println!("[{}]   → {}", timestamp().dimmed(), message.cyan());
    }

    /// 警告（フェーズは続行する）
    pub fn log_warning(&mut self, message: &str) {
        self.warnings += 1;
        println!("[{}]   {} {}", timestamp().dimmed(), "⚠".yellow(), message.yellow());
    }

    pub fn print_summary(&self, project: &str) {
        let total_duration = self.start_time.elapsed();
        let warning_count: usize = self
            .step_results
            .iter()
            .filter_map(|(_, result)| match result {
                StepResult::Warned { warnings, .. } => Some(*warnings),
                _ => None,
            })
            .sum();
        let failed: Vec<(&Phase, &str)> = self
            .step_results
            .iter()
            .filter_map(|(phase, result)| match result {
                StepResult::Failed { error, .. } => Some((phase, error.as_str())),
                _ => None,
            })
            .collect();
        let slowest_step = self
            .step_results
            .iter()
            .filter_map(|(phase, result)| result.duration().map(|d| (phase, d)))
            .max_by_key(|(_, d)| *d);

        println!();
        println!("{}", "═".repeat(44));
        println!("Setup Summary: {}", project.cyan().bold());
        println!("{}", "─".repeat(44));
        println!("Total time:    {}", format_duration(total_duration).green());

        if let Some((phase, duration)) = slowest_step {
            println!("Slowest step:  {} ({})", phase.name(), format_duration(duration));
        }

        if warning_count > 0 {
            println!("Warnings:      {}", warning_count.to_string().yellow());
        } else {
            println!("Warnings:      0");
        }

        if self.all_success() {
            println!("Errors:        {}", "0".green());
        } else {
            println!("Errors:        {}", failed.len().to_string().red().bold());
            for (phase, error) in &failed {
                println!("  {} {}: {}", "✗".red(), phase.name(), error);
            }
        }
        println!("{}", "═".repeat(44));
    }

    pub fn all_success(&self) -> bool {
        self.step_results
            .iter()
            .all(|(_, result)| result.is_success())
    }
}

impl Default for StepLogger {
    fn default() -> Self {
        Self::new()
    }
}

/// Duration を読みやすい形式にフォーマット
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if total_secs >= 60 {
        format!("{}m {}s", total_secs / 60, total_secs % 60)
    } else if total_secs >= 1 {
        format!("{}.{}s", total_secs, millis / 100)
    } else {
        format!("{}ms", millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(50)), "50ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
    }

    #[test]
    fn test_results_are_recorded_in_order() {
        let mut log = StepLogger::new();
        log.start_step(Phase::Preflight);
        log.step_success(None);
        log.start_step(Phase::Readiness);
        log.step_skipped("--no-wait");

        let phases: Vec<Phase> = log.step_results.iter().map(|(p, _)| *p).collect();
        assert_eq!(phases, vec![Phase::Preflight, Phase::Readiness]);
        assert!(log.all_success());
    }

    #[test]
    fn test_warnings_mark_step_as_warned() {
        let mut log = StepLogger::new();
        log.start_step(Phase::Readiness);
        log.log_warning("api: タイムアウト");
        log.step_success(None);

        assert!(matches!(
            log.step_results[0].1,
            StepResult::Warned { warnings: 1, .. }
        ));
        assert!(log.all_success());
    }

    #[test]
    fn test_failure_is_not_success() {
        let mut log = StepLogger::new();
        log.start_step(Phase::Build);
        log.step_failed("boom");

        assert!(!log.all_success());
        assert!(matches!(
            &log.step_results[0].1,
            StepResult::Failed { error, .. } if error == "boom"
        ));
    }

    #[test]
    fn test_step_success_without_start_is_ignored() {
        let mut log = StepLogger::new();
        log.step_success(None);
        assert!(log.step_results.is_empty());
    }
}
