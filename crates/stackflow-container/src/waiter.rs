//! サービスの準備完了待機
//!
//! K8sのReadiness Probeのコンセプトを取り入れ、サービスごとに独立した
//! チェックを並行してポーリングします。タイムアウトはエラーではなく
//! チェックの最終状態の1つです（致命的かどうかは呼び出し側が決める）。

use crate::error::{ContainerError, Result};
use crate::runtime::ComposeRuntime;
use futures_util::future::join_all;
use serde::Serialize;
use stackflow_core::{ReadinessSignal, ServiceSpec};
use std::time::Duration;
use tokio::time::{Instant, sleep};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckStatus {
    Waiting,
    Ready,
    TimedOut,
}

/// 1つのサービスに対する準備完了チェック
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessCheck {
    pub target: String,
    pub signal: ReadinessSignal,
    pub interval: Duration,
    pub timeout: Duration,
    pub status: CheckStatus,
    pub attempts: u32,
    pub elapsed: Duration,
}

impl ReadinessCheck {
    pub fn new(
        target: impl Into<String>,
        signal: ReadinessSignal,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            target: target.into(),
            signal,
            interval,
            timeout,
            status: CheckStatus::Waiting,
            attempts: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// 準備完了シグナルを持つサービスならチェックを作る
    pub fn for_service(service: &ServiceSpec) -> Option<Self> {
        let readiness = &service.readiness;
        readiness.is_enabled().then(|| {
            Self::new(
                service.name.clone(),
                readiness.signal.clone(),
                readiness.interval(),
                readiness.timeout(),
            )
        })
    }
}

/// 1回分のプローブ
#[allow(async_fn_in_trait)]
pub trait Prober {
    async fn probe(&self, target: &str, signal: &ReadinessSignal) -> bool;
}

/// 1つのチェックを準備完了かタイムアウトまでポーリング
///
/// プローブ → `min(interval, 残り予算)` 待機 を繰り返す。
/// 一度も成功しないチェックは `[timeout, timeout + interval)` の間に TimedOut になる。
pub async fn poll_check<P: Prober>(prober: &P, mut check: ReadinessCheck) -> ReadinessCheck {
    let started = Instant::now();

    loop {
        check.attempts += 1;
        let budget = check.timeout.saturating_sub(started.elapsed());
        let ready = tokio::time::timeout(budget, prober.probe(&check.target, &check.signal))
            .await
            .unwrap_or(false);

        if ready {
            check.status = CheckStatus::Ready;
            break;
        }

        let elapsed = started.elapsed();
        if elapsed >= check.timeout {
            check.status = CheckStatus::TimedOut;
            break;
        }
        sleep(check.interval.min(check.timeout - elapsed)).await;
    }

    check.elapsed = started.elapsed();
    match check.status {
        CheckStatus::Ready => tracing::info!(
            service = %check.target,
            attempts = check.attempts,
            elapsed_ms = check.elapsed.as_millis() as u64,
            "Service ready"
        ),
        _ => tracing::warn!(
            service = %check.target,
            attempts = check.attempts,
            timeout_secs = check.timeout.as_secs(),
            "Readiness check timed out"
        ),
    }
    check
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReadinessReport {
    pub checks: Vec<ReadinessCheck>,
}

impl ReadinessReport {
    pub fn all_ready(&self) -> bool {
        self.checks.iter().all(|c| c.status == CheckStatus::Ready)
    }

    pub fn timed_out(&self) -> Vec<&ReadinessCheck> {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::TimedOut)
            .collect()
    }
}

/// 全チェックを並行して待機（互いにキャンセルしない）
pub async fn wait_for_readiness<P: Prober>(
    prober: &P,
    checks: Vec<ReadinessCheck>,
) -> ReadinessReport {
    let checks = join_all(checks.into_iter().map(|check| poll_check(prober, check))).await;
    ReadinessReport { checks }
}

/// compose ランタイムと HTTP クライアントを使う実際のプローブ
pub struct LiveProber<'a, R> {
    runtime: &'a R,
    http: reqwest::Client,
}

impl<'a, R: ComposeRuntime> LiveProber<'a, R> {
    pub fn new(runtime: &'a R) -> Result<Self> {
        // 自己署名証明書を許可し、リダイレクトは追わない（3xx も到達とみなす）
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ContainerError::HttpClient(e.to_string()))?;

        Ok(Self { runtime, http })
    }
}

impl<R: ComposeRuntime> Prober for LiveProber<'_, R> {
    async fn probe(&self, target: &str, signal: &ReadinessSignal) -> bool {
        match signal {
            ReadinessSignal::None => true,
            ReadinessSignal::Process => match self.runtime.container_health(target).await {
                Ok(health) => health.is_ready(),
                Err(e) => {
                    tracing::debug!(service = target, error = %e, "Process probe failed");
                    false
                }
            },
            ReadinessSignal::DataStore { command } => {
                match self.runtime.exec(target, command).await {
                    Ok(output) => output.success(),
                    Err(e) => {
                        tracing::debug!(service = target, error = %e, "Data-store probe failed");
                        false
                    }
                }
            }
            ReadinessSignal::HttpEndpoint { url } => match self.http.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    status.is_success() || status.is_redirection()
                }
                Err(e) => {
                    tracing::debug!(service = target, url = %url, error = %e, "HTTP probe failed");
                    false
                }
            },
        }
    }
}
