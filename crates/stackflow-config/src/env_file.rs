//! フラットな `KEY=value` 形式の設定ファイル

use crate::error::{ConfigError, Result};
use std::fmt::Write as _;
use std::path::Path;

/// 設定キーと値（書き出し順を保持）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvConfig {
    entries: Vec<(String, String)>,
}

impl EnvConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// 値を設定（既存キーは上書き、位置は維持）
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// ファイル内容をパース
    ///
    /// - 空行と `#` で始まる行は無視
    /// - 値が同じ引用符（' または "）で囲まれていれば外す
    /// - `=` のない行やキーが空の行はエラー
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let mut config = Self::new();

        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line = line.strip_prefix("export ").unwrap_or(line);

            let (key, value) = line.split_once('=').ok_or_else(|| ConfigError::Parse {
                path: path.to_path_buf(),
                line: idx + 1,
                message: "KEY=value 形式ではありません".to_string(),
            })?;

            let key = key.trim();
            if key.is_empty() || key.contains(char::is_whitespace) {
                return Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    line: idx + 1,
                    message: format!("キー名が不正です: '{}'", key),
                });
            }

            config.set(key, unquote(value.trim()));
        }

        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, path)
    }

    /// `KEY=value` 形式で書き出す
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.entries {
            let _ = writeln!(out, "{}={}", key, value);
        }
        out
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Result<EnvConfig> {
        EnvConfig::parse(content, Path::new(".env"))
    }

    #[test]
    fn test_parse_basic_lines() {
        let config = parse(
            "# domains\n\
             DASHBOARD_DOMAIN=dashboard.example.com\n\
             \n\
             DB_PASS=\"s3cr=t\"\n\
             export TZ='UTC'\n\
             EMPTY=\n",
        )
        .unwrap();

        assert_eq!(config.len(), 4);
        assert_eq!(config.get("DASHBOARD_DOMAIN"), Some("dashboard.example.com"));
        assert_eq!(config.get("DB_PASS"), Some("s3cr=t"));
        assert_eq!(config.get("TZ"), Some("UTC"));
        assert_eq!(config.get("EMPTY"), Some(""));
        assert_eq!(config.get("MISSING"), None);
    }

    #[test]
    fn test_parse_reports_line_number() {
        let err = parse("A=1\nthis line is broken\n").unwrap_err();
        match err {
            ConfigError::Parse { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_empty_key() {
        assert!(matches!(parse("=value"), Err(ConfigError::Parse { line: 1, .. })));
    }

    #[test]
    fn test_set_keeps_position() {
        let mut config = EnvConfig::new();
        config.set("A", "1");
        config.set("B", "2");
        config.set("A", "3");

        assert_eq!(config.render(), "A=3\nB=2\n");
    }

    #[test]
    fn test_render_then_parse_preserves_entries() {
        let mut config = EnvConfig::new();
        config.set("UWSGI_PROCESSES", "2");
        config.set("DJANGO_SECRET_KEY", "abc-DEF_123");

        let reparsed = parse(&config.render()).unwrap();
        assert_eq!(reparsed, config);
    }
}
