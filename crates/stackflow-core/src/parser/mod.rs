//! KDLパーサー
//!
//! stackflowのマニフェスト（stack.kdl）をパースします。

mod service;

use service::parse_service;

use crate::error::{Result, StackError};
use crate::model::{HostPort, Protocol, StackManifest};
use kdl::{KdlDocument, KdlNode};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// 組み込みのデフォルトマニフェスト
pub const DEFAULT_MANIFEST: &str = include_str!("../default_stack.kdl");

/// マニフェストファイルをパース
///
/// 相対パスはマニフェストのあるディレクトリを基準に解決される
pub fn parse_manifest_file<P: AsRef<Path>>(path: P) -> Result<StackManifest> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| StackError::ManifestRead {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let root = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    parse_manifest_str(&content, root)
}

/// 組み込みマニフェストを指定ディレクトリ基準でパース
pub fn default_manifest(root: PathBuf) -> Result<StackManifest> {
    parse_manifest_str(DEFAULT_MANIFEST, root)
}

/// KDL文字列をパース
pub fn parse_manifest_str(content: &str, root: PathBuf) -> Result<StackManifest> {
    let doc: KdlDocument = content.parse()?;

    let mut manifest = StackManifest::new("");
    manifest.root = root;
    let mut seen = HashSet::new();

    for node in doc.nodes() {
        match node.name().value() {
            "project" => {
                if let Some(name) = first_arg(node) {
                    manifest.project = name.to_string();
                }
            }
            "compose-file" => {
                if let Some(path) = first_arg(node) {
                    manifest.compose_file = PathBuf::from(path);
                }
            }
            "env-file" => {
                if let Some(path) = first_arg(node) {
                    manifest.env_file = PathBuf::from(path);
                }
            }
            "arch" => {
                manifest.arch = first_arg(node).map(|s| s.to_string());
            }
            "image-prefix" => {
                manifest.image_prefix = first_arg(node).map(|s| s.to_string());
            }
            "disk" => {
                if let Some(min) = integer_prop(node, "min")? {
                    manifest.min_disk_gb = min;
                }
                if let Some(recommended) = integer_prop(node, "recommended")? {
                    manifest.recommended_disk_gb = recommended;
                }
            }
            "ports" => {
                if let Some(children) = node.children() {
                    for port_node in children.nodes() {
                        if port_node.name().value() == "port" {
                            manifest.ports.push(parse_port(port_node)?);
                        }
                    }
                }
            }
            "service" => {
                let service = parse_service(node, &manifest.project)?;
                if !seen.insert(service.name.clone()) {
                    return Err(StackError::DuplicateService(service.name));
                }
                manifest.services.push(service);
            }
            other => {
                tracing::debug!("Ignoring unknown manifest node: {}", other);
            }
        }
    }

    if manifest.project.is_empty() {
        return Err(StackError::InvalidConfig(
            "project ノードでプロジェクト名を指定してください".to_string(),
        ));
    }

    if manifest.recommended_disk_gb < manifest.min_disk_gb {
        return Err(StackError::InvalidConfig(format!(
            "disk: recommended ({}GB) は min ({}GB) 以上にしてください",
            manifest.recommended_disk_gb, manifest.min_disk_gb
        )));
    }

    Ok(manifest)
}

/// port ノードをパース
///
/// - 位置引数: port 80
/// - プロトコル指定: port 1812 protocol="udp"
fn parse_port(node: &KdlNode) -> Result<HostPort> {
    let port = node
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
        .and_then(|v| u16::try_from(v).ok())
        .ok_or_else(|| StackError::InvalidConfig("port requires a number (1-65535)".to_string()))?;

    let protocol = match node.get("protocol").and_then(|v| v.as_string()) {
        Some(s) => Protocol::parse(s)
            .ok_or_else(|| StackError::InvalidConfig(format!("unknown protocol: {}", s)))?,
        None => Protocol::Tcp,
    };

    Ok(HostPort { port, protocol })
}

/// 最初の位置引数（文字列）
pub(crate) fn first_arg(node: &KdlNode) -> Option<&str> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
}

/// すべての位置引数（文字列）
pub(crate) fn string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string().map(|s| s.to_string()))
        .collect()
}

/// 非負整数プロパティ
pub(crate) fn integer_prop(node: &KdlNode, key: &str) -> Result<Option<u64>> {
    match node.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_integer()
            .and_then(|v| u64::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| {
                StackError::InvalidConfig(format!(
                    "{}: {} は0以上の整数で指定してください",
                    node.name().value(),
                    key
                ))
            }),
    }
}

#[cfg(test)]
mod tests;
