//! サービス定義

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// ベースイメージ参照を注入するビルド引数のデフォルト名
pub const DEFAULT_BASE_ARG: &str = "BASE_IMAGE";

/// デプロイ単位となるサービス
///
/// KDL形式：
/// ```kdl
/// service "dashboard" {
///     image "openwisp/openwisp-dashboard:latest"
///     depends-on "base"
///     build context="images" dockerfile="images/openwisp_dashboard/Dockerfile"
///     ready "http" url="https://dashboard.example.com/admin/login/" timeout=120
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    /// 起動・ビルドに使うイメージタグ
    pub image: String,
    /// ビルド依存（このサービスのイメージが参照する他サービス）
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// ビルド設定。None の場合は compose 側で pull されるイメージ
    #[serde(default)]
    pub build: Option<BuildSpec>,
    /// 準備完了シグナル
    #[serde(default)]
    pub readiness: ReadinessSpec,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            depends_on: Vec::new(),
            build: None,
            readiness: ReadinessSpec::default(),
        }
    }

    pub fn is_buildable(&self) -> bool {
        self.build.is_some()
    }
}

/// ビルド設定（ビルドコマンドのテンプレート）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
    /// ビルドコンテキスト（マニフェストのディレクトリからの相対パス）
    pub context: PathBuf,
    /// Dockerfileのパス。未指定なら `{context}/Dockerfile`
    pub dockerfile: Option<PathBuf>,
    /// ビルド引数
    #[serde(default)]
    pub args: BTreeMap<String, String>,
    /// マルチステージビルドのターゲット
    pub target: Option<String>,
    /// 依存イメージを受け取るビルド引数名
    #[serde(default = "default_base_arg")]
    pub base_arg: String,
}

fn default_base_arg() -> String {
    DEFAULT_BASE_ARG.to_string()
}

impl BuildSpec {
    pub fn new(context: impl Into<PathBuf>) -> Self {
        Self {
            context: context.into(),
            dockerfile: None,
            args: BTreeMap::new(),
            target: None,
            base_arg: default_base_arg(),
        }
    }

    /// Dockerfileの実パス
    pub fn dockerfile_path(&self) -> PathBuf {
        self.dockerfile
            .clone()
            .unwrap_or_else(|| self.context.join("Dockerfile"))
    }
}

/// 準備完了シグナルの種類
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ReadinessSignal {
    /// 待機しない
    #[default]
    None,
    /// コンテナが起動中（ヘルスチェックがあれば healthy）
    Process,
    /// コンテナ内でコマンドを実行し、終了コード0で準備完了
    DataStore { command: Vec<String> },
    /// HTTPエンドポイントが 2xx/3xx を返したら準備完了
    HttpEndpoint { url: String },
}

impl ReadinessSignal {
    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Process => "process",
            Self::DataStore { .. } => "data-store",
            Self::HttpEndpoint { .. } => "http-endpoint",
        }
    }

    pub fn default_interval(&self) -> Duration {
        match self {
            Self::DataStore { .. } => Duration::from_secs(2),
            _ => Duration::from_secs(5),
        }
    }

    pub fn default_timeout(&self) -> Duration {
        match self {
            Self::HttpEndpoint { .. } => Duration::from_secs(120),
            _ => Duration::from_secs(60),
        }
    }
}

/// 準備完了待機の設定
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessSpec {
    pub signal: ReadinessSignal,
    /// ポーリング間隔。未指定ならシグナルごとのデフォルト
    pub interval: Option<Duration>,
    /// タイムアウト予算。未指定ならシグナルごとのデフォルト
    pub timeout: Option<Duration>,
}

impl ReadinessSpec {
    pub fn new(signal: ReadinessSignal) -> Self {
        Self {
            signal,
            interval: None,
            timeout: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.signal != ReadinessSignal::None
    }

    pub fn interval(&self) -> Duration {
        self.interval
            .unwrap_or_else(|| self.signal.default_interval())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or_else(|| self.signal.default_timeout())
    }
}
