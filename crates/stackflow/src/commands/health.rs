use crate::docker;
use colored::Colorize;
use stackflow_container::{ContainerState, DockerCompose, HealthReport, ServiceSnapshot, snapshot};
use stackflow_core::StackManifest;
use std::process::ExitCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthMode {
    /// 全サービスが起動中なら exit 0
    Check,
    /// 状態の一覧表示
    Status,
}

pub async fn handle(manifest: &StackManifest, mode: HealthMode, json: bool) -> anyhow::Result<ExitCode> {
    let docker_conn = docker::init_docker_with_error_handling().await?;
    let runtime = DockerCompose::new(docker_conn, manifest);
    let report = snapshot(&runtime, &manifest.service_names()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_table(&report);
    }

    match mode {
        HealthMode::Status => Ok(ExitCode::SUCCESS),
        HealthMode::Check if report.is_healthy() => {
            if !json {
                println!("{}", "✓ 全サービスが起動しています".green());
            }
            Ok(ExitCode::SUCCESS)
        }
        HealthMode::Check => {
            if !json {
                let names: Vec<&str> = report.unhealthy().iter().map(|s| s.name.as_str()).collect();
                println!("{} {}", "✗ 準備できていないサービス:".red().bold(), names.join(", "));
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

fn state_colored(snapshot: &ServiceSnapshot) -> colored::ColoredString {
    let label = match (snapshot.state, snapshot.healthy) {
        (ContainerState::Running, Some(false)) => "running (unhealthy)",
        (ContainerState::Running, Some(true)) => "running (healthy)",
        (state, _) => state.label(),
    };
    match snapshot.state {
        ContainerState::Running if snapshot.healthy == Some(false) => label.yellow(),
        ContainerState::Running => label.green(),
        ContainerState::Stopped => label.red(),
        ContainerState::Missing => label.dimmed(),
    }
}

fn percent(value: Option<f64>) -> String {
    value
        .map(|v| format!("{:.1}%", v))
        .unwrap_or_else(|| "-".to_string())
}

/// サービス状態の表を表示
pub fn print_table(report: &HealthReport) {
    println!();
    println!(
        "{}",
        format!(
            "{:<20} {:<22} {:>8} {:>8}  {:<30}",
            "SERVICE", "STATE", "CPU", "MEM", "CONTAINER"
        )
        .bold()
    );
    println!("{}", "─".repeat(92).dimmed());

    for service in &report.services {
        println!(
            "{:<20} {:<22} {:>8} {:>8}  {:<30}",
            service.name.cyan(),
            state_colored(service),
            percent(service.usage.map(|u| u.cpu_percent)),
            percent(service.usage.map(|u| u.mem_percent)),
            service.container.as_deref().unwrap_or("-").dimmed()
        );
    }

    println!();
    println!(
        "{} {}/{}",
        "起動中:".dimmed(),
        report.running_count(),
        report.services.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_formatting() {
        assert_eq!(percent(Some(12.345)), "12.3%");
        assert_eq!(percent(None), "-");
    }

    #[test]
    fn test_json_shape() {
        let report = HealthReport {
            services: vec![ServiceSnapshot {
                name: "postgres".to_string(),
                container: Some("stack-postgres-1".to_string()),
                state: ContainerState::Running,
                healthy: Some(true),
                usage: None,
            }],
        };

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["services"][0]["name"], "postgres");
        assert_eq!(value["services"][0]["state"], "running");
    }
}
