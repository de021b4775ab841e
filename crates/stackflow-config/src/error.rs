use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("設定ディレクトリが見つかりません")]
    ConfigDirNotFound,

    #[error(
        "STACKFLOW_MANIFEST で指定されたマニフェストが見つかりません: {0}\n\
        ヒント: パスを確認するか、環境変数を外して組み込みのスタック定義を使ってください"
    )]
    ManifestNotFound(PathBuf),

    #[error("設定ファイルの {line} 行目が不正です: {path}\n理由: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
