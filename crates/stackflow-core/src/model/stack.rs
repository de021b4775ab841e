//! スタック定義

use super::port::HostPort;
use super::service::ServiceSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// ビルド時に必要な最小空き容量（GB）
pub const DEFAULT_MIN_DISK_GB: u64 = 5;
/// 常用時に推奨される空き容量（GB）
pub const DEFAULT_RECOMMENDED_DISK_GB: u64 = 10;

/// StackManifest - デプロイ対象スタック全体の設計図
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackManifest {
    /// プロジェクト名（compose のプロジェクト名にも使う）
    pub project: String,
    /// マニフェストのあるディレクトリ。相対パスはここを基準に解決する
    #[serde(skip)]
    pub root: PathBuf,
    pub compose_file: PathBuf,
    pub env_file: PathBuf,
    /// 期待するCPUアーキテクチャ（amd64, arm64 ...）
    pub arch: Option<String>,
    pub min_disk_gb: u64,
    pub recommended_disk_gb: u64,
    /// スタックがbindするホストポート
    #[serde(default)]
    pub ports: Vec<HostPort>,
    /// クリーンアップ対象イメージの命名規則（リポジトリ名の接頭辞）
    pub image_prefix: Option<String>,
    /// 宣言順のサービス一覧
    pub services: Vec<ServiceSpec>,
}

impl StackManifest {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            root: PathBuf::from("."),
            compose_file: PathBuf::from("docker-compose.yml"),
            env_file: PathBuf::from(".env"),
            arch: None,
            min_disk_gb: DEFAULT_MIN_DISK_GB,
            recommended_disk_gb: DEFAULT_RECOMMENDED_DISK_GB,
            ports: Vec::new(),
            image_prefix: None,
            services: Vec::new(),
        }
    }

    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name.clone()).collect()
    }

    /// マニフェストのディレクトリを基準にパスを解決
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    pub fn compose_path(&self) -> PathBuf {
        self.resolve_path(&self.compose_file)
    }

    pub fn env_path(&self) -> PathBuf {
        self.resolve_path(&self.env_file)
    }

    /// 実行時状態（ロック・診断ログ）を置くディレクトリ
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(".stackflow")
    }

    /// このスタックが所有するイメージか（クリーンアップの命名規則）
    pub fn owns_image(&self, reference: &str) -> bool {
        if self.services.iter().any(|s| s.image == reference) {
            return true;
        }
        match &self.image_prefix {
            Some(prefix) => reference.starts_with(prefix.as_str()),
            None => false,
        }
    }
}
