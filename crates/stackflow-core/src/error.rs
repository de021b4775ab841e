use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StackError {
    #[error("KDLパースエラー: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("ファイル読み込みエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("マニフェストを読み込めません: {path}\n理由: {message}")]
    ManifestRead { path: PathBuf, message: String },

    #[error("無効な設定: {0}")]
    InvalidConfig(String),

    #[error("サービスが重複しています: {0}")]
    DuplicateService(String),

    #[error("サービスが見つかりません: {0}")]
    ServiceNotFound(String),

    #[error("サービス '{service}' が未定義のサービス '{dependency}' に依存しています")]
    UnknownDependency { service: String, dependency: String },

    #[error("循環依存が検出されました: {0}")]
    CircularDependency(String),
}

pub type Result<T> = std::result::Result<T, StackError>;
