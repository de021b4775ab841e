//! 環境チェック（アーキテクチャ・ディスク空き容量・ポート）
//!
//! 状態を一切変更しません。結果は PreflightReport として返し、
//! Fail が1つでもあればパイプラインを開始してはいけません。

use crate::port::{find_pids_by_port, is_port_bound};
use serde::Serialize;
use stackflow_core::{HostPort, StackManifest};
use std::path::Path;

const GIB: u64 = 1024 * 1024 * 1024;

/// ホスト情報の取得元
pub trait HostInspector {
    /// `uname -m` 相当の生のアーキテクチャ名
    fn arch(&self) -> String;
    fn free_bytes(&self, path: &Path) -> std::io::Result<u64>;
    fn port_in_use(&self, port: &HostPort) -> bool;
    /// ポートを使用しているプロセス（不明なら空）
    fn port_owners(&self, port: &HostPort) -> Vec<i32>;
}

/// 実際のホスト
pub struct SystemHost;

impl HostInspector for SystemHost {
    fn arch(&self) -> String {
        std::env::consts::ARCH.to_string()
    }

    fn free_bytes(&self, path: &Path) -> std::io::Result<u64> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(std::io::Error::from)?;
        Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
    }

    fn port_in_use(&self, port: &HostPort) -> bool {
        is_port_bound(port)
    }

    fn port_owners(&self, port: &HostPort) -> Vec<i32> {
        find_pids_by_port(port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub name: &'static str,
    pub outcome: Outcome,
    pub message: String,
}

impl CheckResult {
    fn new(name: &'static str, outcome: Outcome, message: impl Into<String>) -> Self {
        Self {
            name,
            outcome,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    /// Fail が無ければ true（Warn は通す）
    pub fn passed(&self) -> bool {
        !self.checks.iter().any(|c| c.outcome == Outcome::Fail)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| c.outcome == Outcome::Fail)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| c.outcome == Outcome::Warn)
    }
}

/// コンテナプラットフォームの名前に正規化
pub fn normalize_arch(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().as_str() {
        "x86_64" | "x64" | "amd64" => "amd64".to_string(),
        "aarch64" | "arm64" | "armv8" => "arm64".to_string(),
        "armv7l" | "armv7" | "arm" => "arm".to_string(),
        other => other.to_string(),
    }
}

/// 全チェックを実行
pub fn run_preflight(
    manifest: &StackManifest,
    host: &impl HostInspector,
    workdir: &Path,
) -> PreflightReport {
    let mut checks = vec![
        check_arch(manifest, host),
        check_disk(manifest, host, workdir),
    ];
    checks.extend(manifest.ports.iter().map(|port| check_port(port, host)));

    for check in &checks {
        tracing::debug!(check = check.name, outcome = ?check.outcome, message = %check.message, "Preflight check");
    }
    PreflightReport { checks }
}

fn check_arch(manifest: &StackManifest, host: &impl HostInspector) -> CheckResult {
    let detected = normalize_arch(&host.arch());
    match &manifest.arch {
        None => CheckResult::new("arch", Outcome::Pass, format!("{}（指定なし）", detected)),
        Some(expected) if normalize_arch(expected) == detected => {
            CheckResult::new("arch", Outcome::Pass, detected)
        }
        Some(expected) => CheckResult::new(
            "arch",
            Outcome::Fail,
            format!(
                "アーキテクチャが一致しません: ホストは {}、スタックは {} を要求しています",
                detected,
                normalize_arch(expected)
            ),
        ),
    }
}

fn check_disk(manifest: &StackManifest, host: &impl HostInspector, workdir: &Path) -> CheckResult {
    let free = match host.free_bytes(workdir) {
        Ok(free) => free,
        Err(e) => {
            // 測れない場合は不足と同じく中止する
            return CheckResult::new(
                "disk",
                Outcome::Fail,
                format!("空き容量を取得できません（{}）: {}", workdir.display(), e),
            );
        }
    };

    let free_gb = free as f64 / GIB as f64;
    if free < manifest.min_disk_gb.saturating_mul(GIB) {
        CheckResult::new(
            "disk",
            Outcome::Fail,
            format!(
                "空き容量が不足しています: {:.1}GB（ビルドには {}GB 必要）",
                free_gb, manifest.min_disk_gb
            ),
        )
    } else if free < manifest.recommended_disk_gb.saturating_mul(GIB) {
        CheckResult::new(
            "disk",
            Outcome::Warn,
            format!(
                "空き容量が推奨値を下回っています: {:.1}GB（推奨 {}GB）",
                free_gb, manifest.recommended_disk_gb
            ),
        )
    } else {
        CheckResult::new("disk", Outcome::Pass, format!("{:.1}GB 空き", free_gb))
    }
}

fn check_port(port: &HostPort, host: &impl HostInspector) -> CheckResult {
    if !host.port_in_use(port) {
        return CheckResult::new("port", Outcome::Pass, format!("{} は空いています", port));
    }

    let owners = host.port_owners(port);
    let message = if owners.is_empty() {
        format!("{} は既に使用されています（スタックが起動済みの可能性があります）", port)
    } else {
        let pids = owners
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        format!("{} は既に使用されています（PID: {}）", port, pids)
    };
    CheckResult::new("port", Outcome::Warn, message)
}
