pub mod cleanup;
pub mod health;
pub mod setup;

use colored::Colorize;
use stackflow_core::StackManifest;
use std::path::{Path, PathBuf};

/// マニフェストを読み込む
///
/// `--manifest` / `STACKFLOW_MANIFEST` が指定されていればそれを使い、
/// 無ければ標準の場所を探す。どこにも無ければ組み込みのスタック定義を
/// カレントディレクトリ基準で使う。標準出力は `--json` 用に空けておく。
pub fn load_manifest(explicit: Option<&Path>) -> anyhow::Result<StackManifest> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(stackflow_config::ConfigError::ManifestNotFound(path.to_path_buf()).into());
            }
            Some(path.to_path_buf())
        }
        None => stackflow_config::find_manifest_file()?,
    };

    let manifest = match path {
        Some(path) => {
            eprintln!("{} {}", "マニフェスト:".dimmed(), path.display());
            stackflow_core::parse_manifest_file(&path)?
        }
        None => {
            eprintln!("{}", "マニフェスト: 組み込みのスタック定義".dimmed());
            let root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            stackflow_core::default_manifest(root)?
        }
    };

    tracing::debug!(
        project = %manifest.project,
        services = manifest.services.len(),
        root = %manifest.root.display(),
        "Loaded stack manifest"
    );
    Ok(manifest)
}
