use crate::docker;
use crate::lock::RunLock;
use crate::prompt::LinePrompter;
use colored::Colorize;
use stackflow_container::{
    CleanupController, CleanupMode, CleanupPlan, CleanupReport, DockerResources, Prompter,
    ResourceKind, ResourceStore,
};
use stackflow_core::StackManifest;
use std::process::ExitCode;

pub async fn handle(manifest: &StackManifest, mode: CleanupMode, yes: bool) -> anyhow::Result<ExitCode> {
    let _lock = RunLock::acquire(&manifest.state_dir())?;

    println!("{}", "スタックのリソースを確認中...".blue());
    let docker_conn = docker::init_docker_with_error_handling().await?;
    let store = DockerResources::new(docker_conn, manifest);
    let mut prompter = LinePrompter::stdio();

    run(&store, mode, yes, &mut prompter).await
}

/// 計画 → 確認 → 実行
pub async fn run<S: ResourceStore>(
    store: &S,
    mode: CleanupMode,
    yes: bool,
    prompter: &mut impl Prompter,
) -> anyhow::Result<ExitCode> {
    let kinds = mode.resolve_kinds(&mut *prompter);
    let mut controller = CleanupController::new(store);
    let plan = controller.build_plan(&kinds).await?;

    if plan.is_empty() {
        println!("{}", "削除対象のリソースはありません".dimmed());
        return Ok(ExitCode::SUCCESS);
    }
    print_plan(plan);

    if !controller.confirm(&mut *prompter, yes)? {
        println!("{}", "クリーンアップを中止しました".yellow());
        return Ok(ExitCode::SUCCESS);
    }

    let report = controller.execute().await?;
    print_report(&report);

    if report.has_failures() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn print_plan(plan: &CleanupPlan) {
    println!();
    println!("{}", "削除するリソース:".bold());
    for kind in ResourceKind::ALL {
        let count = plan.count(kind);
        if count == 0 {
            continue;
        }
        println!("  {:<16} {}", kind.label(), count.to_string().cyan());
        for resource in plan.resources.iter().filter(|r| r.kind == kind) {
            println!("    {}", resource.name.dimmed());
        }
    }
    println!();
}

fn print_report(report: &CleanupReport) {
    println!();
    for (kind, tally) in &report.tallies {
        if tally.failed > 0 {
            println!(
                "{} {}: {} 件削除、{} 件失敗",
                "⚠".yellow(),
                kind.label(),
                tally.removed,
                tally.failed.to_string().red()
            );
        } else {
            println!("{} {}: {} 件削除", "✓".green(), kind.label(), tally.removed);
        }
    }

    for (resource, error) in &report.failures {
        println!("  {} {} {}", "✗".red(), resource.name, error.dimmed());
    }

    println!();
    if report.has_failures() {
        println!(
            "{}",
            format!(
                "✗ {} 件のリソースを削除できませんでした",
                report.total_failed()
            )
            .red()
            .bold()
        );
    } else {
        println!(
            "{}",
            format!("✓ {} 件のリソースを削除しました", report.total_removed())
                .green()
                .bold()
        );
    }
}
