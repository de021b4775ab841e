pub mod env_file;
pub mod error;
pub mod materializer;

pub use env_file::EnvConfig;
pub use error::*;
pub use materializer::{
    ConfigMaterializer, ConfigTemplate, KeyKind, Materialized, Origin, TemplateEntry,
};

use std::path::PathBuf;

/// マニフェストの標準ファイル名
pub const MANIFEST_FILE: &str = "stack.kdl";

/// stackflowのグローバル設定ディレクトリを取得
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("stackflow");

    Ok(config_dir)
}

/// スタックマニフェストを探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 STACKFLOW_MANIFEST (直接パス指定。存在しなければエラー)
/// 2. カレントディレクトリ: stack.kdl
/// 3. ./.stackflow/stack.kdl
/// 4. ~/.config/stackflow/stack.kdl (グローバル設定)
///
/// どれも無ければ `None`（組み込みのスタック定義を使う）
pub fn find_manifest_file() -> Result<Option<PathBuf>> {
    // 1. 環境変数で直接指定
    if let Ok(manifest_path) = std::env::var("STACKFLOW_MANIFEST") {
        let path = PathBuf::from(manifest_path);
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(ConfigError::ManifestNotFound(path));
    }

    let current_dir = std::env::current_dir()?;

    // 2. カレントディレクトリ
    let path = current_dir.join(MANIFEST_FILE);
    if path.exists() {
        return Ok(Some(path));
    }

    // 3. ./.stackflow/ ディレクトリ
    let path = current_dir.join(".stackflow").join(MANIFEST_FILE);
    if path.exists() {
        return Ok(Some(path));
    }

    // 4. グローバル設定
    if let Some(config_dir) = dirs::config_dir() {
        let global = config_dir.join("stackflow").join(MANIFEST_FILE);
        if global.exists() {
            return Ok(Some(global));
        }
    }

    Ok(None)
}
