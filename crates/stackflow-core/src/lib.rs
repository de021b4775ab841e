//! stackflow core
//!
//! スタックマニフェストのモデルとパーサー、ビルドステージの計画、
//! デプロイ1回分の実行状態（RunState）を提供します。

pub mod error;
pub mod model;
pub mod parser;
pub mod planner;
pub mod run_state;

pub use error::{Result, StackError};
pub use model::*;
pub use parser::{DEFAULT_MANIFEST, default_manifest, parse_manifest_file, parse_manifest_str};
pub use planner::{BuildStage, plan_stages};
pub use run_state::{BuildStatus, Phase, RunState};
