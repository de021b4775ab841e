//! ランタイム設定（env ファイル）の生成
//!
//! 既存のファイルがあればそのまま再利用し、絶対に書き換えません。
//! 新規生成時はシークレットを OS の乱数源から作り、所有者のみ読み書き可能な
//! パーミッションで書き出します。

use crate::env_file::EnvConfig;
use crate::error::Result;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

/// シークレット1つあたりのエントロピー（バイト）
pub const SECRET_BYTES: usize = 24;

/// デフォルトのベースドメイン
pub const DEFAULT_DOMAIN: &str = "example.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Domain,
    Secret,
    User,
    /// アプリケーション側が解釈するチューニング値（中身は関知しない）
    Tuning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateEntry {
    pub key: String,
    pub kind: KeyKind,
    /// シークレットの場合は空（生成時に乱数で埋める）
    pub default: String,
}

impl TemplateEntry {
    fn new(key: &str, kind: KeyKind, default: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            kind,
            default: default.into(),
        }
    }
}

/// 認識するキーとデフォルト値の一覧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigTemplate {
    entries: Vec<TemplateEntry>,
}

impl ConfigTemplate {
    /// 標準のキーセット
    pub fn standard() -> Self {
        Self::for_domain(DEFAULT_DOMAIN)
    }

    /// ドメイン系のキーを `domain` から導出したテンプレート
    pub fn for_domain(domain: &str) -> Self {
        use KeyKind::*;

        let entries = vec![
            TemplateEntry::new("DASHBOARD_DOMAIN", Domain, format!("dashboard.{domain}")),
            TemplateEntry::new("API_DOMAIN", Domain, format!("api.{domain}")),
            TemplateEntry::new("VPN_DOMAIN", Domain, format!("vpn.{domain}")),
            TemplateEntry::new("EMAIL_DJANGO_DEFAULT", Domain, format!("noreply@{domain}")),
            TemplateEntry::new("DJANGO_SECRET_KEY", Secret, ""),
            TemplateEntry::new("DB_PASS", Secret, ""),
            TemplateEntry::new("INFLUXDB_PASS", Secret, ""),
            TemplateEntry::new("REDIS_PASS", Secret, ""),
            TemplateEntry::new("RABBITMQ_DEFAULT_PASS", Secret, ""),
            TemplateEntry::new("FREERADIUS_SECRET", Secret, ""),
            TemplateEntry::new("DB_USER", User, "admin"),
            TemplateEntry::new("INFLUXDB_USER", User, "admin"),
            TemplateEntry::new("UWSGI_PROCESSES", Tuning, "2"),
            TemplateEntry::new("UWSGI_THREADS", Tuning, "2"),
            TemplateEntry::new("UWSGI_LISTEN", Tuning, "100"),
            TemplateEntry::new("CELERY_WORKER_CONCURRENCY", Tuning, "1"),
            TemplateEntry::new("TZ", Tuning, "UTC"),
        ];

        Self { entries }
    }

    pub fn entries(&self) -> &[TemplateEntry] {
        &self.entries
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.as_str())
    }
}

impl Default for ConfigTemplate {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// 今回新しく生成した
    Generated,
    /// 既存のファイルをそのまま使った
    Reused,
}

#[derive(Debug, Clone)]
pub struct Materialized {
    pub path: PathBuf,
    pub config: EnvConfig,
    pub origin: Origin,
    /// 既存ファイルに無かった認識済みキー（補完はしない）
    pub missing_keys: Vec<String>,
    /// 既存ファイルのパーミッションを絞ったか
    pub tightened: bool,
}

pub struct ConfigMaterializer {
    path: PathBuf,
    template: ConfigTemplate,
}

impl ConfigMaterializer {
    pub fn new(path: impl Into<PathBuf>, template: ConfigTemplate) -> Self {
        Self {
            path: path.into(),
            template,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 設定を用意する
    ///
    /// ファイルが既にあれば読み込んで返すだけ。無ければ生成して書き出す。
    pub fn materialize(&self) -> Result<Materialized> {
        if self.path.exists() {
            return self.reuse();
        }

        let config = self.generate();
        if !self.write_new(&config)? {
            // 書き込みの直前に別のプロセスが作成した
            return self.reuse();
        }

        tracing::info!(path = %self.path.display(), "Generated runtime configuration");
        Ok(Materialized {
            path: self.path.clone(),
            config,
            origin: Origin::Generated,
            missing_keys: Vec::new(),
            tightened: false,
        })
    }

    /// テンプレートから新しい設定を組み立てる（書き出しはしない）
    pub fn generate(&self) -> EnvConfig {
        let mut config = EnvConfig::new();
        let mut used = HashSet::new();

        for entry in self.template.entries() {
            let value = match entry.kind {
                KeyKind::Secret => loop {
                    let secret = generate_secret();
                    if used.insert(secret.clone()) {
                        break secret;
                    }
                },
                _ => entry.default.clone(),
            };
            config.set(entry.key.as_str(), value);
        }

        config
    }

    fn reuse(&self) -> Result<Materialized> {
        let config = EnvConfig::load(&self.path)?;
        let missing_keys: Vec<String> = self
            .template
            .keys()
            .filter(|key| !config.contains_key(key))
            .map(str::to_string)
            .collect();

        for key in &missing_keys {
            tracing::warn!(path = %self.path.display(), key = %key, "Recognized key missing from existing configuration");
        }

        let tightened = tighten_permissions(&self.path)?;

        tracing::debug!(path = %self.path.display(), keys = config.len(), "Reusing existing configuration");
        Ok(Materialized {
            path: self.path.clone(),
            config,
            origin: Origin::Reused,
            missing_keys,
            tightened,
        })
    }

    /// 一時ファイル経由でアトミックに書き出す。既にファイルがあれば false
    fn write_new(&self, config: &EnvConfig) -> Result<bool> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        tmp.write_all(config.render().as_bytes())?;
        tmp.as_file().sync_all()?;

        match tmp.persist_noclobber(&self.path) {
            Ok(_) => Ok(true),
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.error.into()),
        }
    }
}

fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// グループ・その他に権限があれば 0600 に絞る
#[cfg(unix)]
fn tighten_permissions(path: &Path) -> Result<bool> {
    use std::os::unix::fs::PermissionsExt;

    let mode = std::fs::metadata(path)?.permissions().mode();
    if mode & 0o077 == 0 {
        return Ok(false);
    }

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    tracing::warn!(
        path = %path.display(),
        mode = %format_args!("{:o}", mode & 0o777),
        "Configuration was readable by other users; permissions tightened to 600"
    );
    Ok(true)
}

#[cfg(not(unix))]
fn tighten_permissions(_path: &Path) -> Result<bool> {
    Ok(false)
}
