use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Dockerfile not found: {0}")]
    DockerfileNotFound(PathBuf),

    #[error("Build context directory not found: {0}")]
    ContextNotFound(PathBuf),

    #[error("Docker connection error: {0}")]
    DockerConnection(#[from] bollard::errors::Error),

    #[error("Build of '{service}' failed: {message}")]
    BuildFailed {
        service: String,
        message: String,
        /// ビルドの出力（診断用）
        output: String,
    },

    #[error(
        "Base image reference mismatch in '{service}': found [{}], expected '{expected}'",
        .found.join(", ")
    )]
    BaseReferenceMismatch {
        service: String,
        found: Vec<String>,
        expected: String,
    },

    #[error("Invalid build configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// ユーザー向けの分かりやすいエラーメッセージ
    pub fn user_message(&self) -> String {
        match self {
            BuildError::DockerfileNotFound(path) => {
                format!(
                    "Dockerfileが見つかりません: {}\n\
                     \n\
                     解決方法:\n\
                     1. Dockerfileのパスを確認してください\n\
                     2. stack.kdl で明示的にパスを指定してください:\n\
                        build dockerfile=\"path/to/Dockerfile\"",
                    path.display()
                )
            }
            BuildError::BuildFailed {
                service, message, ..
            } => {
                format!(
                    "サービス '{}' のビルドに失敗しました: {}\n\
                     \n\
                     ビルド出力と Dockerfile の内容を確認してください。",
                    service, message
                )
            }
            BuildError::BaseReferenceMismatch {
                service,
                found,
                expected,
            } => {
                format!(
                    "サービス '{}' の Dockerfile がベースイメージを参照していません\n\
                     見つかった参照: {}\n\
                     期待される参照: {}\n\
                     \n\
                     解決方法:\n\
                     1. FROM に ${{BASE_IMAGE}} などのビルド引数を使ってください\n\
                     2. または FROM {} と直接指定してください",
                    service,
                    found.join(", "),
                    expected,
                    expected
                )
            }
            BuildError::ContextNotFound(path) => {
                format!(
                    "ビルドコンテキストが見つかりません: {}\n\
                     \n\
                     stack.kdl で context のパスを確認してください。",
                    path.display()
                )
            }
            _ => format!("{}", self),
        }
    }

    /// 診断用に残すビルド出力
    pub fn captured_output(&self) -> String {
        match self {
            BuildError::BuildFailed { output, .. } if !output.is_empty() => output.clone(),
            _ => self.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;
