use crate::error::Result;
use serde::Serialize;
use std::collections::HashMap;

/// compose で管理されるサービス群に対する操作
///
/// 起動コマンドの完了は「準備完了」を意味しません（待機は waiter の責務）。
/// 同じデプロイ先に対する並行実行は呼び出し側で直列化してください。
#[allow(async_fn_in_trait)]
pub trait ComposeRuntime {
    /// 全サービスを起動（`compose up -d`）
    async fn launch(&self) -> Result<()>;
    /// 全サービスを停止（`compose stop`）
    async fn stop(&self) -> Result<()>;
    /// サービスのコンテナ内でコマンドを実行
    async fn exec(&self, service: &str, command: &[String]) -> Result<CommandOutput>;
    /// 直近 `tail` 行のログ
    async fn logs(&self, service: &str, tail: usize) -> Result<String>;
    async fn container_health(&self, service: &str) -> Result<ContainerHealth>;
    /// コンテナ名ごとの CPU / メモリ使用率
    async fn resource_usage(&self) -> Result<HashMap<String, ResourceUsage>>;
}

/// 外部コマンドの実行結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout と stderr をまとめたもの（診断表示用）
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.trim_end().to_string(),
            _ => self.stderr.trim_end().to_string(),
        }
    }
}

/// コンテナの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Running,
    Stopped,
    /// コンテナが作成されていない
    Missing,
}

impl ContainerState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Missing => "missing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHealth {
    pub container: Option<String>,
    pub state: ContainerState,
    /// ヘルスチェックの結果。ヘルスチェック未設定なら None
    pub healthy: Option<bool>,
}

impl ContainerHealth {
    pub fn missing() -> Self {
        Self {
            container: None,
            state: ContainerState::Missing,
            healthy: None,
        }
    }

    /// 起動中で、ヘルスチェックがあれば healthy
    pub fn is_ready(&self) -> bool {
        self.state == ContainerState::Running && self.healthy != Some(false)
    }

    pub fn label(&self) -> &'static str {
        match (self.state, self.healthy) {
            (ContainerState::Running, Some(false)) => "running (unhealthy)",
            (ContainerState::Running, Some(true)) => "running (healthy)",
            (state, _) => state.label(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub mem_percent: f64,
}
