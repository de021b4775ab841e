//! モデル定義
//!
//! stackflowで使用されるデータモデルを定義します。

mod port;
mod service;
mod stack;

// Re-exports
pub use port::*;
pub use service::*;
pub use stack::*;
