use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error(
        "Dockerに接続できません: {0}\n\nヒント:\n  • Dockerが起動しているか確認してください\n  • 現在のユーザーが docker グループに所属しているか確認してください"
    )]
    DockerConnectionFailed(String),

    #[error("サービス '{container}' のコンテナが見つかりません")]
    ContainerNotFound { container: String },

    #[error("Docker API の呼び出しに失敗しました: {0}")]
    DockerApiError(String),

    #[error(
        "docker compose の実行に失敗しました（{command}）: {message}\n\nヒント:\n  • docker compose version で compose プラグインを確認してください\n  • compose ファイルと env ファイルのパスを確認してください"
    )]
    ComposeFailed { command: String, message: String },

    #[error("コマンド '{program}' を起動できません: {source}")]
    CommandSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTPクライアントの初期化に失敗しました: {0}")]
    HttpClient(String),

    #[error("クリーンアップの状態遷移が不正です: {from} から {action} はできません")]
    InvalidTransition { from: &'static str, action: &'static str },

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

impl From<bollard::errors::Error> for ContainerError {
    fn from(err: bollard::errors::Error) -> Self {
        if let bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } = &err
        {
            // 404 の扱いは呼び出し側が決める
            return ContainerError::DockerApiError(format!("{} (HTTP {})", message, status_code));
        }

        let message = err.to_string();
        let unreachable = ["Connection refused", "No such file or directory", "socket"]
            .iter()
            .any(|needle| message.contains(needle));
        if unreachable {
            ContainerError::DockerConnectionFailed(message)
        } else {
            ContainerError::DockerApiError(message)
        }
    }
}

pub type Result<T> = std::result::Result<T, ContainerError>;
