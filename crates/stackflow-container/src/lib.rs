//! stackflow container
//!
//! compose ランタイムとの境界、環境チェック、準備完了待機、
//! 状態スナップショット、クリーンアップを提供します。

pub mod cleanup;
pub mod docker;
pub mod error;
pub mod health;
pub mod port;
pub mod preflight;
pub mod runtime;
pub mod waiter;

pub use cleanup::*;
pub use docker::*;
pub use error::*;
pub use health::*;
pub use preflight::*;
pub use runtime::*;
pub use waiter::*;
