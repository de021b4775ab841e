use colored::Colorize;

/// Docker接続を初期化（エラー時は原因と対処を表示）
pub async fn init_docker_with_error_handling() -> anyhow::Result<bollard::Docker> {
    match stackflow_container::init_docker().await {
        Ok(docker) => Ok(docker),
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ Docker接続エラー".red().bold());
            eprintln!();
            eprintln!("{}", "原因:".yellow());
            eprintln!("  {}", e);
            eprintln!();
            eprintln!("{}", "解決方法:".yellow());
            eprintln!("  • Dockerデーモンが起動しているか確認してください");
            eprintln!("  • 現在のユーザーが docker グループに所属しているか確認してください");
            eprintln!("  • docker ps コマンドが正常に動作するか確認してください");
            Err(anyhow::anyhow!("Docker接続に失敗しました"))
        }
    }
}
