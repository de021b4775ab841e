use crate::error::{BuildError, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::path::Path;
use tar::{Builder, Header};

/// アーカイブ内での Dockerfile のパス
///
/// コンテキスト内の Dockerfile と衝突しないよう別名で追加する。
pub const DOCKERFILE_ENTRY: &str = ".stackflow.Dockerfile";

/// これを超えたら .dockerignore の見直しを促す
const LARGE_CONTEXT_BYTES: usize = 500 * 1024 * 1024;

pub struct ContextBuilder;

impl ContextBuilder {
    /// コンテキストディレクトリと解決済みの Dockerfile を tar.gz にまとめる
    ///
    /// ディスク上の Dockerfile は読まない（内容は呼び出し側が渡す）。
    pub fn create_context(context_path: &Path, dockerfile: &[u8]) -> Result<Vec<u8>> {
        if !context_path.is_dir() {
            return Err(BuildError::ContextNotFound(context_path.to_path_buf()));
        }

        let mut archive = Vec::new();
        {
            let mut tar = Builder::new(GzEncoder::new(&mut archive, Compression::default()));
            tar.append_dir_all(".", context_path)?;
            tar.append(&Self::dockerfile_header(dockerfile.len())?, dockerfile)?;
            tar.into_inner()?.finish()?;
        }

        tracing::debug!(
            context = %context_path.display(),
            bytes = archive.len(),
            "Build context archived"
        );
        if archive.len() > LARGE_CONTEXT_BYTES {
            tracing::warn!(
                context = %context_path.display(),
                megabytes = archive.len() / 1024 / 1024,
                "Build context is very large; consider a .dockerignore"
            );
        }

        Ok(archive)
    }

    fn dockerfile_header(size: usize) -> Result<Header> {
        let mut header = Header::new_gnu();
        header
            .set_path(DOCKERFILE_ENTRY)
            .map_err(|e| BuildError::InvalidConfig(format!("invalid Dockerfile entry: {}", e)))?;
        header.set_size(size as u64);
        header.set_mode(0o644);
        header.set_cksum();
        Ok(header)
    }
}
