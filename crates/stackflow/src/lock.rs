//! 実行ロック
//!
//! 同じスタックに対してパイプラインやクリーンアップが同時に走らないよう、
//! `.stackflow/run.lock` に PID を書いたファイルで排他する。

use stackflow_container::port::is_process_alive;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

pub const LOCK_FILE: &str = "run.lock";

/// 保持している間だけ有効なロック（drop で解放）
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(state_dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(state_dir)?;
        let path = state_dir.join(LOCK_FILE);

        // 古いロックを回収したら1回だけ取り直す
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    writeln!(file, "{}", std::process::id())?;
                    tracing::debug!(path = %path.display(), "Acquired run lock");
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let holder = read_holder(&path);
                    match holder {
                        Some(pid) if is_process_alive(pid) => {
                            anyhow::bail!(
                                "別の stackflow（PID {}）が実行中です\n\
                                 終了を待つか、プロセスが存在しない場合は {} を削除してください",
                                pid,
                                path.display()
                            );
                        }
                        _ => {
                            tracing::warn!(path = %path.display(), pid = ?holder, "Reclaiming stale run lock");
                            match fs::remove_file(&path) {
                                Ok(()) => {}
                                Err(e) if e.kind() == ErrorKind::NotFound => {}
                                Err(e) => return Err(e.into()),
                            }
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        anyhow::bail!("実行ロックを取得できませんでした: {}", path.display())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release run lock");
        }
    }
}

/// ロックファイルの PID（読めない・不正なら None）
fn read_holder(path: &Path) -> Option<i32> {
    fs::read_to_string(path)
        .ok()?
        .trim()
        .parse::<i32>()
        .ok()
        .filter(|pid| *pid > 0)
}
