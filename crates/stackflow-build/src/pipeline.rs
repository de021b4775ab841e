//! ステージ順のビルドパイプライン
//!
//! ステージ i+1 はステージ i の全ビルドが成功してから始まります。
//! ステージ内のビルドは並行に走り、結果はパイプラインのループが
//! RunState に書き込みます（ビルド同士で可変状態は共有しない）。
//! 最初の失敗で中断し、実行中の兄弟ビルドはキャンセルされて pending のまま残ります。

use crate::builder::{BuildRequest, ImageBuilder};
use crate::error::{BuildError, Result};
use crate::resolver::{BaseImage, resolve_base_references};
use futures_util::stream::{FuturesUnordered, StreamExt};
use stackflow_core::{BuildStage, BuildStatus, RunState, ServiceSpec, StackManifest};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOptions {
    /// 既存イメージを削除してからビルドする
    pub force: bool,
    /// ステージ内でも1つずつビルドする
    pub serial: bool,
}

pub struct BuildPipeline<'a, B> {
    builder: &'a B,
    manifest: &'a StackManifest,
    options: PipelineOptions,
    /// サービス名 → イメージタグ（1回だけ計算）
    tags: HashMap<&'a str, &'a str>,
}

impl<'a, B: ImageBuilder> BuildPipeline<'a, B> {
    pub fn new(builder: &'a B, manifest: &'a StackManifest, options: PipelineOptions) -> Self {
        let tags = manifest
            .services
            .iter()
            .map(|s| (s.name.as_str(), s.image.as_str()))
            .collect();
        Self {
            builder,
            manifest,
            options,
            tags,
        }
    }

    /// 全ステージを順にビルド
    pub async fn run(&self, stages: &[BuildStage], state: &mut RunState) -> Result<()> {
        state.register_builds(stages.iter().flat_map(|s| s.names()));

        for stage in stages {
            state.begin_stage(stage.index);
            tracing::info!(stage = stage.index, services = ?stage.names(), "Starting build stage");

            // ビルドを1つも始める前にステージ全体の参照を解決する
            let mut requests = Vec::with_capacity(stage.services.len());
            for service in &stage.services {
                match self.prepare(service) {
                    Ok(request) => requests.push(request),
                    Err(e) => {
                        state.record_build(
                            service.name.clone(),
                            BuildStatus::Failed {
                                output: e.captured_output(),
                            },
                        );
                        return Err(e);
                    }
                }
            }

            if self.options.serial {
                for request in requests {
                    let (name, result) = self.build_service(request).await;
                    Self::record(state, name, result)?;
                }
            } else {
                let mut in_flight: FuturesUnordered<_> = requests
                    .into_iter()
                    .map(|request| self.build_service(request))
                    .collect();

                while let Some((name, result)) = in_flight.next().await {
                    // 失敗したら残りの future は drop（キャンセル）される
                    Self::record(state, name, result)?;
                }
            }
        }

        Ok(())
    }

    fn record(state: &mut RunState, name: String, result: Result<BuildStatus>) -> Result<()> {
        match result {
            Ok(status) => {
                state.record_build(name, status);
                Ok(())
            }
            Err(e) => {
                tracing::error!(service = %name, error = %e, "Build failed, aborting pipeline");
                state.record_build(
                    name,
                    BuildStatus::Failed {
                        output: e.captured_output(),
                    },
                );
                Err(e)
            }
        }
    }

    /// Dockerfile を読み込み、ベースイメージ参照を解決したビルド要求を作る
    pub fn prepare(&self, service: &ServiceSpec) -> Result<BuildRequest> {
        let build = service.build.as_ref().ok_or_else(|| {
            BuildError::InvalidConfig(format!("service '{}' has no build definition", service.name))
        })?;

        let context = self.manifest.resolve_path(&build.context);
        if !context.is_dir() {
            return Err(BuildError::ContextNotFound(context));
        }
        let dockerfile_path = self.manifest.resolve_path(&build.dockerfile_path());
        if !dockerfile_path.is_file() {
            return Err(BuildError::DockerfileNotFound(dockerfile_path));
        }
        let dockerfile = std::fs::read_to_string(&dockerfile_path)?;

        let bases: Vec<BaseImage> = service
            .depends_on
            .iter()
            .filter(|dep| self.manifest.service(dep).is_some_and(ServiceSpec::is_buildable))
            .filter_map(|dep| {
                self.tags
                    .get(dep.as_str())
                    .map(|tag| BaseImage::new(dep.clone(), *tag))
            })
            .collect();

        let resolved = resolve_base_references(
            &service.name,
            &dockerfile,
            &build.base_arg,
            &build.args,
            &bases,
        )?;
        for correction in &resolved.corrections {
            tracing::warn!(
                service = %service.name,
                dockerfile = %dockerfile_path.display(),
                line = correction.line + 1,
                found = %correction.found,
                expected = %correction.expected,
                "Using corrected base image reference"
            );
        }

        Ok(BuildRequest {
            service: service.name.clone(),
            tag: service.image.clone(),
            context,
            dockerfile: resolved.dockerfile,
            args: resolved.args,
            target: build.target.clone(),
        })
    }

    async fn build_service(&self, request: BuildRequest) -> (String, Result<BuildStatus>) {
        let result = self.build_or_reuse(&request).await;
        (request.service, result)
    }

    async fn build_or_reuse(&self, request: &BuildRequest) -> Result<BuildStatus> {
        if self.options.force {
            self.builder.remove_image(&request.tag).await?;
        } else if self.builder.image_exists(&request.tag).await? {
            tracing::info!(service = %request.service, image = %request.tag, "Reusing existing image");
            return Ok(BuildStatus::Succeeded {
                reused: true,
                output: format!("reused existing image {}", request.tag),
            });
        }

        let output = self.builder.build(request).await?;
        Ok(BuildStatus::Succeeded {
            reused: false,
            output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackflow_core::{BuildSpec, plan_stages};
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeBuilder {
        existing: Mutex<HashSet<String>>,
        failing: HashSet<String>,
        slow: HashSet<String>,
        requests: Mutex<Vec<BuildRequest>>,
        removed: Mutex<Vec<String>>,
        finished: Mutex<Vec<String>>,
    }

    impl FakeBuilder {
        fn request_for(&self, service: &str) -> Option<BuildRequest> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.service == service)
                .cloned()
        }

        fn started(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.service.clone())
                .collect()
        }
    }

    impl ImageBuilder for FakeBuilder {
        async fn image_exists(&self, tag: &str) -> Result<bool> {
            Ok(self.existing.lock().unwrap().contains(tag))
        }

        async fn remove_image(&self, tag: &str) -> Result<()> {
            self.removed.lock().unwrap().push(tag.to_string());
            self.existing.lock().unwrap().remove(tag);
            Ok(())
        }

        async fn build(&self, request: &BuildRequest) -> Result<String> {
            self.requests.lock().unwrap().push(request.clone());
            if self.slow.contains(&request.service) {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            if self.failing.contains(&request.service) {
                return Err(BuildError::BuildFailed {
                    service: request.service.clone(),
                    message: "exit code 1".to_string(),
                    output: "Step 3/7 : RUN pip install\nERROR".to_string(),
                });
            }
            self.finished.lock().unwrap().push(request.service.clone());
            self.existing.lock().unwrap().insert(request.tag.clone());
            Ok(format!("built {}", request.tag))
        }
    }

    /// base → (dashboard, api) と独立した nginx のスタック
    fn stack(root: &Path, dashboard_from: &str) -> StackManifest {
        let write = |name: &str, content: &str| {
            let dir = root.join("images").join(name);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("Dockerfile"), content).unwrap();
        };
        write("base", "FROM python:3.11-slim\n");
        write("dashboard", dashboard_from);
        write("api", "ARG BASE_IMAGE\nFROM ${BASE_IMAGE}\n");
        write("nginx", "FROM nginx:alpine\n");

        let service = |name: &str, deps: &[&str]| {
            let mut spec = ServiceSpec::new(name, format!("demo/demo-{name}:latest"));
            let mut build = BuildSpec::new("images");
            build.dockerfile = Some(format!("images/{name}/Dockerfile").into());
            spec.build = Some(build);
            spec.depends_on = deps.iter().map(|d| d.to_string()).collect();
            spec
        };

        let mut manifest = StackManifest::new("demo");
        manifest.root = root.to_path_buf();
        manifest.services = vec![
            service("base", &[]),
            service("dashboard", &["base"]),
            service("api", &["base"]),
            service("nginx", &[]),
            ServiceSpec::new("redis", "redis:7-alpine"),
        ];
        manifest
    }

    #[tokio::test]
    async fn test_builds_every_stage_in_order() {
        let temp_dir = tempfile::tempdir().unwrap();
        let manifest = stack(temp_dir.path(), "FROM ${BASE_IMAGE}\n");
        let stages = plan_stages(&manifest.services).unwrap();
        let builder = FakeBuilder::default();
        let mut state = RunState::new();

        BuildPipeline::new(&builder, &manifest, PipelineOptions::default())
            .run(&stages, &mut state)
            .await
            .unwrap();

        let started = builder.started();
        assert_eq!(started.len(), 4);
        let pos = |name: &str| started.iter().position(|s| s == name).unwrap();
        assert!(pos("base") < pos("dashboard"));
        assert!(pos("base") < pos("api"));
        assert_eq!(state.current_stage(), Some(1));
        assert!(state.failed_builds().is_empty());
        assert_eq!(state.build_status("api").unwrap().label(), "built");
        assert!(state.build_status("redis").is_none());

        let api = builder.request_for("api").unwrap();
        assert_eq!(
            api.args.get("BASE_IMAGE").map(String::as_str),
            Some("demo/demo-base:latest")
        );
        assert!(api.context.ends_with("images"));
    }

    #[tokio::test]
    async fn test_stale_base_reference_is_what_the_builder_receives() {
        let temp_dir = tempfile::tempdir().unwrap();
        let manifest = stack(temp_dir.path(), "FROM demo/demo-base:0.1.0\nRUN true\n");
        let stages = plan_stages(&manifest.services).unwrap();
        let builder = FakeBuilder::default();
        let mut state = RunState::new();

        BuildPipeline::new(&builder, &manifest, PipelineOptions::default())
            .run(&stages, &mut state)
            .await
            .unwrap();

        let dashboard = builder.request_for("dashboard").unwrap();
        assert_eq!(dashboard.dockerfile, "FROM demo/demo-base:latest\nRUN true\n");
        // ディスク上の Dockerfile は変更しない
        assert_eq!(
            std::fs::read_to_string(temp_dir.path().join("images/dashboard/Dockerfile")).unwrap(),
            "FROM demo/demo-base:0.1.0\nRUN true\n"
        );
    }

    #[tokio::test]
    async fn test_mismatched_base_fails_before_stage_builds() {
        let temp_dir = tempfile::tempdir().unwrap();
        let manifest = stack(temp_dir.path(), "FROM ubuntu:24.04\n");
        let stages = plan_stages(&manifest.services).unwrap();
        let builder = FakeBuilder::default();
        let mut state = RunState::new();

        let err = BuildPipeline::new(&builder, &manifest, PipelineOptions::default())
            .run(&stages, &mut state)
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::BaseReferenceMismatch { ref found, .. } if found == &vec!["ubuntu:24.04".to_string()]));
        // ステージ0はビルド済み、ステージ1は1つも始まらない
        assert!(builder.request_for("dashboard").is_none());
        assert!(builder.request_for("api").is_none());
        assert_eq!(state.failed_builds(), vec!["dashboard"]);
        assert_eq!(state.build_status("api"), Some(&BuildStatus::Pending));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_cancels_siblings_and_skips_later_stages() {
        let temp_dir = tempfile::tempdir().unwrap();
        let manifest = stack(temp_dir.path(), "FROM ${BASE_IMAGE}\n");
        let stages = plan_stages(&manifest.services).unwrap();
        let builder = FakeBuilder {
            failing: HashSet::from(["base".to_string()]),
            slow: HashSet::from(["nginx".to_string()]),
            ..Default::default()
        };
        let mut state = RunState::new();

        let err = BuildPipeline::new(&builder, &manifest, PipelineOptions::default())
            .run(&stages, &mut state)
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::BuildFailed { ref service, .. } if service == "base"));
        assert_eq!(state.failed_builds(), vec!["base"]);
        assert_eq!(
            state.build_status("base").and_then(BuildStatus::output),
            Some("Step 3/7 : RUN pip install\nERROR")
        );
        // nginx は開始したが完了前にキャンセルされた
        assert_eq!(state.build_status("nginx"), Some(&BuildStatus::Pending));
        assert!(builder.finished.lock().unwrap().is_empty());
        assert!(builder.request_for("dashboard").is_none());
    }

    #[tokio::test]
    async fn test_existing_images_are_reused_unless_forced() {
        let temp_dir = tempfile::tempdir().unwrap();
        let manifest = stack(temp_dir.path(), "FROM ${BASE_IMAGE}\n");
        let stages = plan_stages(&manifest.services).unwrap();
        let builder = FakeBuilder::default();
        builder
            .existing
            .lock()
            .unwrap()
            .insert("demo/demo-base:latest".to_string());

        let mut state = RunState::new();
        BuildPipeline::new(&builder, &manifest, PipelineOptions::default())
            .run(&stages, &mut state)
            .await
            .unwrap();
        assert_eq!(state.build_status("base").unwrap().label(), "reused");
        assert!(builder.request_for("base").is_none());

        let mut state = RunState::new();
        let options = PipelineOptions {
            force: true,
            serial: true,
        };
        BuildPipeline::new(&builder, &manifest, options)
            .run(&stages, &mut state)
            .await
            .unwrap();
        assert_eq!(state.build_status("base").unwrap().label(), "built");
        assert!(
            builder
                .removed
                .lock()
                .unwrap()
                .contains(&"demo/demo-base:latest".to_string())
        );
    }

    #[tokio::test]
    async fn test_missing_dockerfile_is_reported() {
        let temp_dir = tempfile::tempdir().unwrap();
        let manifest = stack(temp_dir.path(), "FROM ${BASE_IMAGE}\n");
        std::fs::remove_file(temp_dir.path().join("images/nginx/Dockerfile")).unwrap();
        let stages = plan_stages(&manifest.services).unwrap();
        let builder = FakeBuilder::default();
        let mut state = RunState::new();

        let err = BuildPipeline::new(&builder, &manifest, PipelineOptions::default())
            .run(&stages, &mut state)
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::DockerfileNotFound(_)));
        assert!(builder.started().is_empty());
    }
}
