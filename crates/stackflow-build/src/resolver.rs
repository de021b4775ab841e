//! ベースイメージ参照の解決
//!
//! 依存サービスのイメージタグを1回だけ計算し、依存側のビルド引数
//! （デフォルト `BASE_IMAGE`）として注入します。Dockerfile の FROM 参照は
//! 次のように扱います:
//!
//! - `${ARG}` 参照 → 注入されたタグが使われる
//! - 期待するタグと完全一致 → そのまま
//! - 依存イメージの命名規則に一致するが古いタグ・名前 → メモリ上で修正して警告
//! - どれにも当たらない → `BaseReferenceMismatch`
//!
//! ディスク上の Dockerfile は一切変更しません。

use crate::error::{BuildError, Result};
use std::collections::{BTreeMap, HashSet};

/// Dockerfile の FROM 行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromRef {
    /// 0 始まりの行番号
    pub line: usize,
    pub reference: String,
    /// `AS name` のステージ名
    pub alias: Option<String>,
}

/// Dockerfile から FROM 参照を取り出す
pub fn from_references(dockerfile: &str) -> Vec<FromRef> {
    dockerfile
        .lines()
        .enumerate()
        .filter_map(|(line, raw)| {
            let mut tokens = raw.split_whitespace();
            if !tokens.next()?.eq_ignore_ascii_case("FROM") {
                return None;
            }
            // --platform=... などのフラグを読み飛ばす
            let reference = tokens.by_ref().find(|t| !t.starts_with("--"))?.to_string();
            let alias = match (tokens.next(), tokens.next()) {
                (Some(kw), Some(name)) if kw.eq_ignore_ascii_case("AS") => Some(name.to_string()),
                _ => None,
            };
            Some(FromRef {
                line,
                reference,
                alias,
            })
        })
        .collect()
}

/// タグ・ダイジェストを除いたリポジトリ名
pub fn repository(reference: &str) -> &str {
    let without_digest = reference.split('@').next().unwrap_or(reference);
    match without_digest.rfind(':') {
        // レジストリのポート（host:5000/repo）はタグではない
        Some(idx) if !without_digest[idx..].contains('/') => &without_digest[..idx],
        _ => without_digest,
    }
}

/// 比較用に正規化したイメージ名（最後のパス要素、`_` は `-` 扱い）
fn image_name(reference: &str) -> String {
    let repo = repository(reference);
    repo.rsplit('/')
        .next()
        .unwrap_or(repo)
        .to_ascii_lowercase()
        .replace('_', "-")
}

/// 依存イメージ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseImage {
    pub service: String,
    pub tag: String,
}

impl BaseImage {
    pub fn new(service: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            tag: tag.into(),
        }
    }

    /// 古い参照（イメージ名は一致するがタグや名前空間が違う）か
    ///
    /// `python-base` のような部分一致は別イメージとして扱う。
    fn is_stale_reference(&self, reference: &str) -> bool {
        if reference.contains('$') {
            return false;
        }
        let found = image_name(reference);
        let service = self.service.to_ascii_lowercase().replace('_', "-");
        found == image_name(&self.tag) || found == service
    }
}

/// FROM 参照の修正記録
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correction {
    pub line: usize,
    pub found: String,
    pub expected: String,
}

/// 解決済みのビルド定義
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBuild {
    /// ビルダーに渡す Dockerfile の内容（修正済み）
    pub dockerfile: String,
    pub args: BTreeMap<String, String>,
    pub corrections: Vec<Correction>,
}

/// 依存イメージへの参照を解決する
///
/// `bases` が空なら Dockerfile とビルド引数をそのまま返す。
/// 先頭の依存イメージのタグを `base_arg` に注入する。
pub fn resolve_base_references(
    service: &str,
    dockerfile: &str,
    base_arg: &str,
    args: &BTreeMap<String, String>,
    bases: &[BaseImage],
) -> Result<ResolvedBuild> {
    let mut resolved = ResolvedBuild {
        dockerfile: dockerfile.to_string(),
        args: args.clone(),
        corrections: Vec::new(),
    };
    let Some(primary) = bases.first() else {
        return Ok(resolved);
    };
    resolved
        .args
        .insert(base_arg.to_string(), primary.tag.clone());

    let refs = from_references(dockerfile);
    let aliases: HashSet<&str> = refs.iter().filter_map(|r| r.alias.as_deref()).collect();
    let arg_forms = [format!("${{{}}}", base_arg), format!("${}", base_arg)];
    let mut satisfied: HashSet<&str> = HashSet::new();
    let mut lines: Vec<String> = dockerfile.lines().map(str::to_string).collect();

    // ステージ別名への FROM を除く
    let external: Vec<&FromRef> = refs
        .iter()
        .filter(|r| !aliases.contains(r.reference.as_str()))
        .collect();

    for from in &external {
        if arg_forms.iter().any(|form| from.reference.contains(form.as_str())) {
            satisfied.insert(primary.service.as_str());
        } else if let Some(base) = bases.iter().find(|b| b.tag == from.reference) {
            satisfied.insert(base.service.as_str());
        }
    }

    // 未解決の依存だけを古い参照から探して修正する
    for base in bases {
        if satisfied.contains(base.service.as_str()) {
            continue;
        }
        let Some(from) = external
            .iter()
            .find(|r| r.reference != base.tag && base.is_stale_reference(&r.reference))
        else {
            continue;
        };
        tracing::warn!(
            service = service,
            found = %from.reference,
            expected = %base.tag,
            "Stale base image reference corrected"
        );
        lines[from.line] = lines[from.line].replacen(&from.reference, &base.tag, 1);
        resolved.corrections.push(Correction {
            line: from.line,
            found: from.reference.clone(),
            expected: base.tag.clone(),
        });
        satisfied.insert(base.service.as_str());
    }

    if let Some(missing) = bases.iter().find(|b| !satisfied.contains(b.service.as_str())) {
        return Err(BuildError::BaseReferenceMismatch {
            service: service.to_string(),
            found: refs.iter().map(|r| r.reference.clone()).collect(),
            expected: missing.tag.clone(),
        });
    }

    if !resolved.corrections.is_empty() {
        let mut content = lines.join("\n");
        if dockerfile.ends_with('\n') {
            content.push('\n');
        }
        resolved.dockerfile = content;
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Vec<BaseImage> {
        vec![BaseImage::new("base", "openwisp/openwisp-base:latest")]
    }

    fn resolve(dockerfile: &str) -> Result<ResolvedBuild> {
        resolve_base_references("dashboard", dockerfile, "BASE_IMAGE", &BTreeMap::new(), &base())
    }

    #[test]
    fn test_from_references() {
        let refs = from_references(
            "# syntax=docker/dockerfile:1\n\
             FROM --platform=linux/amd64 node:20 AS assets\n\
             from ${BASE_IMAGE}\n\
             COPY --from=assets /dist /srv\n",
        );

        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].reference, "node:20");
        assert_eq!(refs[0].alias.as_deref(), Some("assets"));
        assert_eq!(refs[0].line, 1);
        assert_eq!(refs[1].reference, "${BASE_IMAGE}");
        assert_eq!(refs[1].alias, None);
    }

    #[test]
    fn test_repository() {
        assert_eq!(repository("openwisp/openwisp-base:latest"), "openwisp/openwisp-base");
        assert_eq!(repository("localhost:5000/base"), "localhost:5000/base");
        assert_eq!(repository("localhost:5000/base:1.0"), "localhost:5000/base");
        assert_eq!(repository("alpine@sha256:abc"), "alpine");
    }

    #[test]
    fn test_arg_reference_is_injected() {
        let dockerfile = "ARG BASE_IMAGE\nFROM ${BASE_IMAGE}\nRUN true\n";
        let resolved = resolve(dockerfile).unwrap();

        assert_eq!(resolved.dockerfile, dockerfile);
        assert_eq!(
            resolved.args.get("BASE_IMAGE").map(String::as_str),
            Some("openwisp/openwisp-base:latest")
        );
        assert!(resolved.corrections.is_empty());
    }

    #[test]
    fn test_exact_reference_is_kept() {
        let dockerfile = "FROM openwisp/openwisp-base:latest\n";
        let resolved = resolve(dockerfile).unwrap();

        assert_eq!(resolved.dockerfile, dockerfile);
        assert!(resolved.corrections.is_empty());
    }

    #[test]
    fn test_stale_reference_is_corrected_in_memory() {
        let dockerfile = "FROM openwisp/openwisp-base:0.9 AS runtime\nCOPY . /opt\n";
        let resolved = resolve(dockerfile).unwrap();

        assert_eq!(
            resolved.dockerfile,
            "FROM openwisp/openwisp-base:latest AS runtime\nCOPY . /opt\n"
        );
        assert_eq!(
            resolved.corrections,
            vec![Correction {
                line: 0,
                found: "openwisp/openwisp-base:0.9".to_string(),
                expected: "openwisp/openwisp-base:latest".to_string(),
            }]
        );
    }

    #[test]
    fn test_name_drift_is_corrected() {
        // 名前空間なし・アンダースコア区切りの旧名
        let resolved = resolve("FROM openwisp_base\n").unwrap();
        assert_eq!(resolved.dockerfile, "FROM openwisp/openwisp-base:latest\n");
    }

    #[test]
    fn test_unrelated_literal_is_a_mismatch() {
        let err = resolve("FROM python:3.11-slim\n").unwrap_err();

        match err {
            BuildError::BaseReferenceMismatch {
                service,
                found,
                expected,
            } => {
                assert_eq!(service, "dashboard");
                assert_eq!(found, vec!["python:3.11-slim".to_string()]);
                assert_eq!(expected, "openwisp/openwisp-base:latest");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_external_builder_stage_is_allowed_alongside_base() {
        let dockerfile = "FROM node:20 AS assets\nFROM ${BASE_IMAGE}\nCOPY --from=assets /a /b\n";
        assert!(resolve(dockerfile).is_ok());
    }

    #[test]
    fn test_similarly_named_external_stage_is_not_rewritten() {
        let dockerfile = "FROM docker.io/library/python-base:3.11 AS deps\n\
                          FROM ${BASE_IMAGE}\n\
                          COPY --from=deps /venv /venv\n";
        let resolved = resolve(dockerfile).unwrap();

        assert_eq!(resolved.dockerfile, dockerfile);
        assert!(resolved.corrections.is_empty());
    }

    #[test]
    fn test_similarly_named_image_does_not_satisfy_base() {
        let err = resolve("FROM python-base:3.11\n").unwrap_err();
        assert!(matches!(err, BuildError::BaseReferenceMismatch { .. }));
    }

    #[test]
    fn test_satisfied_base_leaves_other_stale_lookalikes_alone() {
        let dockerfile = "FROM openwisp/openwisp-base:0.9 AS legacy\nFROM openwisp/openwisp-base:latest\n";
        let resolved = resolve(dockerfile).unwrap();

        assert_eq!(resolved.dockerfile, dockerfile);
        assert!(resolved.corrections.is_empty());
    }

    #[test]
    fn test_no_dependencies_leaves_build_untouched() {
        let args = BTreeMap::from([("PY".to_string(), "3.11".to_string())]);
        let resolved =
            resolve_base_references("base", "FROM python:3.11\n", "BASE_IMAGE", &args, &[]).unwrap();

        assert_eq!(resolved.args, args);
        assert_eq!(resolved.dockerfile, "FROM python:3.11\n");
    }

    #[test]
    fn test_custom_base_arg_name() {
        let resolved = resolve_base_references(
            "api",
            "FROM $PARENT\n",
            "PARENT",
            &BTreeMap::new(),
            &base(),
        )
        .unwrap();

        assert_eq!(
            resolved.args.get("PARENT").map(String::as_str),
            Some("openwisp/openwisp-base:latest")
        );
    }
}
