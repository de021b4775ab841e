//! stackflow image build
//!
//! ビルドステージを順に実行するパイプライン、ベースイメージ参照の解決、
//! Docker Engine API によるイメージビルドを提供します。

pub mod builder;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod resolver;

pub use builder::{BuildRequest, DockerImageBuilder, ImageBuilder};
pub use context::ContextBuilder;
pub use error::{BuildError, Result};
pub use pipeline::{BuildPipeline, PipelineOptions};
pub use progress::BuildProgress;
pub use resolver::{BaseImage, Correction, ResolvedBuild, resolve_base_references};
