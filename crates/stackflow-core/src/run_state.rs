//! 1回のデプロイ試行の実行状態
//!
//! RunState はパイプラインが所有し、各ステップに `&mut` で渡します。
//! 永続化はしません（再実行時はゼロから計算し直す）。

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

/// パイプラインのフェーズ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Preflight,
    Configure,
    Build,
    Launch,
    Readiness,
    Report,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Preflight => "環境チェック",
            Self::Configure => "設定生成",
            Self::Build => "イメージビルド",
            Self::Launch => "サービス起動",
            Self::Readiness => "準備完了待機",
            Self::Report => "状態レポート",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// サービスごとのビルド結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum BuildStatus {
    Pending,
    Succeeded { reused: bool, output: String },
    Failed { output: String },
}

impl BuildStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded { reused: true, .. } => "reused",
            Self::Succeeded { reused: false, .. } => "built",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Pending => None,
            Self::Succeeded { output, .. } | Self::Failed { output } => Some(output),
        }
    }
}

#[derive(Debug)]
pub struct RunState {
    started: Instant,
    phase: Option<Phase>,
    current_stage: Option<usize>,
    builds: BTreeMap<String, BuildStatus>,
    launched: bool,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            phase: None,
            current_stage: None,
            builds: BTreeMap::new(),
            launched: false,
        }
    }

    pub fn enter(&mut self, phase: Phase) {
        tracing::debug!(phase = ?phase, "Entering phase");
        self.phase = Some(phase);
    }

    pub fn phase(&self) -> Option<Phase> {
        self.phase
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// ビルド対象サービスを pending として登録
    pub fn register_builds<I, S>(&mut self, services: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in services {
            self.builds.entry(name.into()).or_insert(BuildStatus::Pending);
        }
    }

    pub fn begin_stage(&mut self, index: usize) {
        self.current_stage = Some(index);
    }

    pub fn current_stage(&self) -> Option<usize> {
        self.current_stage
    }

    pub fn record_build(&mut self, service: impl Into<String>, status: BuildStatus) {
        self.builds.insert(service.into(), status);
    }

    pub fn build_status(&self, service: &str) -> Option<&BuildStatus> {
        self.builds.get(service)
    }

    pub fn builds(&self) -> impl Iterator<Item = (&str, &BuildStatus)> {
        self.builds.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn failed_builds(&self) -> Vec<&str> {
        self.builds
            .iter()
            .filter(|(_, status)| matches!(status, BuildStatus::Failed { .. }))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn mark_launched(&mut self) {
        self.launched = true;
    }

    pub fn launched(&self) -> bool {
        self.launched
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
