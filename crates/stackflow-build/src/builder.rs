use crate::context::{ContextBuilder, DOCKERFILE_ENTRY};
use crate::error::{BuildError, Result};
use crate::progress::BuildProgress;
use bollard::Docker;
use futures_util::stream::StreamExt;
use indicatif::MultiProgress;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// 1サービス分のビルド要求（ベース参照は解決済み）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub service: String,
    pub tag: String,
    pub context: PathBuf,
    /// 解決済みの Dockerfile の内容
    pub dockerfile: String,
    pub args: BTreeMap<String, String>,
    pub target: Option<String>,
}

/// イメージのビルド境界
#[allow(async_fn_in_trait)]
pub trait ImageBuilder {
    async fn image_exists(&self, tag: &str) -> Result<bool>;
    /// イメージを削除（存在しなければ何もしない）
    async fn remove_image(&self, tag: &str) -> Result<()>;
    /// ビルドして出力を返す
    async fn build(&self, request: &BuildRequest) -> Result<String>;
}

/// Docker Engine API でビルドする
pub struct DockerImageBuilder {
    docker: Docker,
    progress: MultiProgress,
}

impl DockerImageBuilder {
    pub fn new(docker: Docker) -> Self {
        Self {
            docker,
            progress: MultiProgress::new(),
        }
    }

    /// ビルド出力の処理
    fn handle_build_output(
        output: bollard::models::BuildInfo,
        log: &mut String,
        progress: &BuildProgress,
    ) -> std::result::Result<(), String> {
        if let Some(stream) = output.stream {
            // ビルドステップの出力
            log.push_str(&stream);
            if let Some(line) = stream.lines().rev().find(|l| !l.trim().is_empty()) {
                progress.set_message(line.trim());
            }
        }

        if let Some(error_detail) = output.error_detail {
            // 詳細なエラー情報
            let error_msg = error_detail
                .message
                .or(output.error)
                .unwrap_or_else(|| "Unknown build error".to_string());
            return Err(error_msg);
        }

        if let Some(error) = output.error {
            return Err(error);
        }

        if let Some(status) = output.status {
            // ステータスメッセージ（pull等）
            log.push_str(&status);
            log.push('\n');
        }

        Ok(())
    }
}

impl ImageBuilder for DockerImageBuilder {
    /// イメージの存在確認
    async fn image_exists(&self, tag: &str) -> Result<bool> {
        match self.docker.inspect_image(tag).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(BuildError::DockerConnection(e)),
        }
    }

    async fn remove_image(&self, tag: &str) -> Result<()> {
        match self
            .docker
            .remove_image(tag, None::<bollard::query_parameters::RemoveImageOptions>, None)
            .await
        {
            Ok(_) => {
                tracing::info!(image = tag, "Removed image before rebuild");
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(BuildError::DockerConnection(e)),
        }
    }

    async fn build(&self, request: &BuildRequest) -> Result<String> {
        tracing::info!(service = %request.service, image = %request.tag, "Building image");

        let context_data =
            ContextBuilder::create_context(&request.context, request.dockerfile.as_bytes())?;

        // build_argsを&str型に変換
        let build_args: HashMap<&str, &str> = request
            .args
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        // 依存イメージはローカルにしか無いので pull しない
        #[allow(deprecated)]
        let options = bollard::image::BuildImageOptions {
            dockerfile: DOCKERFILE_ENTRY,
            t: request.tag.as_str(),
            buildargs: build_args,
            target: request.target.as_deref().unwrap_or(""),
            rm: true,      // 中間コンテナを削除
            forcerm: true, // ビルド失敗時も中間コンテナを削除
            pull: false,
            ..Default::default()
        };

        // ビルドストリームの開始
        use bytes::Bytes;
        use http_body_util::{Either, Full};
        let body = Full::new(Bytes::from(context_data));
        let mut stream = self
            .docker
            .build_image(options, None, Some(Either::Left(body)));

        let progress = BuildProgress::new_in(&self.progress, &request.service);
        let mut log = String::new();

        // ビルド進捗の表示
        while let Some(msg) = stream.next().await {
            let result = match msg {
                Ok(output) => Self::handle_build_output(output, &mut log, &progress),
                Err(e) => Err(e.to_string()),
            };
            if let Err(message) = result {
                progress.finish_error(&message);
                return Err(BuildError::BuildFailed {
                    service: request.service.clone(),
                    message,
                    output: log,
                });
            }
        }

        progress.finish_success();
        tracing::info!(image = %request.tag, "Successfully built");
        Ok(log)
    }
}
