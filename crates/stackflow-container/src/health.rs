//! サービス状態のスナップショット
//!
//! 副作用はなく、デプロイ中かどうかに関係なくいつでも呼び出せます。

use crate::error::Result;
use crate::runtime::{ComposeRuntime, ContainerState, ResourceUsage};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct ServiceSnapshot {
    pub name: String,
    pub container: Option<String>,
    pub state: ContainerState,
    pub healthy: Option<bool>,
    pub usage: Option<ResourceUsage>,
}

impl ServiceSnapshot {
    /// 起動中で、ヘルスチェックがあれば healthy（準備完了待機と同じ判定）
    pub fn is_ready(&self) -> bool {
        self.state == ContainerState::Running && self.healthy != Some(false)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthReport {
    pub services: Vec<ServiceSnapshot>,
}

impl HealthReport {
    /// 全サービスが起動中かつ unhealthy でなければ healthy
    pub fn is_healthy(&self) -> bool {
        self.services.iter().all(ServiceSnapshot::is_ready)
    }

    pub fn running_count(&self) -> usize {
        self.services
            .iter()
            .filter(|s| s.state == ContainerState::Running)
            .count()
    }

    pub fn unhealthy(&self) -> Vec<&ServiceSnapshot> {
        self.services
            .iter()
            .filter(|s| !s.is_ready())
            .collect()
    }
}

/// 各サービスの現在の状態を取得
pub async fn snapshot<R: ComposeRuntime>(runtime: &R, services: &[String]) -> Result<HealthReport> {
    // 使用率が取れなくても状態の報告は続ける
    let usage = match runtime.resource_usage().await {
        Ok(usage) => usage,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to collect resource usage");
            HashMap::new()
        }
    };

    let mut snapshots = Vec::with_capacity(services.len());
    for name in services {
        let health = runtime.container_health(name).await?;
        let usage = health
            .container
            .as_ref()
            .and_then(|container| usage.get(container))
            .copied();

        snapshots.push(ServiceSnapshot {
            name: name.clone(),
            container: health.container,
            state: health.state,
            healthy: health.healthy,
            usage,
        });
    }

    Ok(HealthReport {
        services: snapshots,
    })
}

/// `docker stats --format "{{.Name}}\t{{.CPUPerc}}\t{{.MemPerc}}"` の出力をパース
pub fn parse_stats(output: &str) -> HashMap<String, ResourceUsage> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let name = fields.next()?.trim();
            let cpu = parse_percent(fields.next()?)?;
            let mem = parse_percent(fields.next()?)?;
            (!name.is_empty()).then(|| {
                (
                    name.to_string(),
                    ResourceUsage {
                        cpu_percent: cpu,
                        mem_percent: mem,
                    },
                )
            })
        })
        .collect()
}

fn parse_percent(value: &str) -> Option<f64> {
    value.trim().trim_end_matches('%').trim().parse().ok()
}
