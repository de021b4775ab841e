//! Docker 実装（bollard + docker compose CLI）

use crate::cleanup::{Resource, ResourceKind, ResourceStore};
use crate::error::{ContainerError, Result};
use crate::health::parse_stats;
use crate::runtime::{CommandOutput, ComposeRuntime, ContainerHealth, ContainerState, ResourceUsage};
use bollard::Docker;
use bollard::models::{ContainerSummary, HealthStatusEnum};
use bollard::query_parameters::{
    InspectContainerOptions, ListContainersOptions, ListImagesOptions, ListNetworksOptions,
    ListVolumesOptions, RemoveContainerOptions, RemoveImageOptions, RemoveVolumeOptions,
};
use stackflow_core::StackManifest;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::process::Command;

/// compose が付与するラベル
const PROJECT_LABEL: &str = "com.docker.compose.project";
const SERVICE_LABEL: &str = "com.docker.compose.service";

/// Docker接続を初期化
pub async fn init_docker() -> Result<Docker> {
    let docker = Docker::connect_with_local_defaults()
        .map_err(|e| ContainerError::DockerConnectionFailed(e.to_string()))?;

    // 接続テスト
    docker
        .ping()
        .await
        .map_err(|e| ContainerError::DockerConnectionFailed(e.to_string()))?;

    Ok(docker)
}

fn label_filter(labels: &[String]) -> HashMap<String, Vec<String>> {
    HashMap::from([("label".to_string(), labels.to_vec())])
}

/// `docker compose` で管理されるスタック
pub struct DockerCompose {
    docker: Docker,
    project: String,
    compose_file: PathBuf,
    env_file: PathBuf,
    workdir: PathBuf,
}

impl DockerCompose {
    pub fn new(docker: Docker, manifest: &StackManifest) -> Self {
        Self {
            docker,
            project: manifest.project.clone(),
            compose_file: manifest.compose_path(),
            env_file: manifest.env_path(),
            workdir: manifest.root.clone(),
        }
    }

    fn compose(&self) -> Command {
        let mut cmd = Command::new("docker");
        cmd.arg("compose")
            .arg("-p")
            .arg(&self.project)
            .arg("-f")
            .arg(&self.compose_file);
        if self.env_file.exists() {
            cmd.arg("--env-file").arg(&self.env_file);
        }
        cmd.current_dir(&self.workdir);
        cmd
    }

    async fn run(mut cmd: Command, shown: String) -> Result<CommandOutput> {
        tracing::debug!(command = %shown, "Running command");
        let output = cmd
            .output()
            .await
            .map_err(|source| ContainerError::CommandSpawn {
                program: shown,
                source,
            })?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// 成功しなければ ComposeFailed にする
    async fn run_checked(&self, args: &[&str]) -> Result<CommandOutput> {
        let mut cmd = self.compose();
        cmd.args(args);
        let shown = format!("docker compose {}", args.join(" "));

        let output = Self::run(cmd, shown.clone()).await?;
        if !output.success() {
            return Err(ContainerError::ComposeFailed {
                command: shown,
                message: output.combined(),
            });
        }
        Ok(output)
    }

    async fn find_container(&self, service: &str) -> Result<Option<ContainerSummary>> {
        let filters = label_filter(&[
            format!("{}={}", PROJECT_LABEL, self.project),
            format!("{}={}", SERVICE_LABEL, service),
        ]);
        let options = ListContainersOptions {
            all: true,
            filters: Some(filters),
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(options)).await?;
        Ok(containers.into_iter().next())
    }
}

impl ComposeRuntime for DockerCompose {
    async fn launch(&self) -> Result<()> {
        tracing::info!(project = %self.project, "Starting services");
        self.run_checked(&["up", "-d"]).await?;
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        tracing::info!(project = %self.project, "Stopping services");
        self.run_checked(&["stop"]).await?;
        Ok(())
    }

    async fn exec(&self, service: &str, command: &[String]) -> Result<CommandOutput> {
        let mut cmd = self.compose();
        cmd.args(["exec", "-T", service]).args(command);
        Self::run(cmd, format!("docker compose exec {} {}", service, command.join(" "))).await
    }

    async fn logs(&self, service: &str, tail: usize) -> Result<String> {
        let tail = tail.to_string();
        let output = self
            .run_checked(&["logs", "--no-color", "--tail", &tail, service])
            .await?;
        Ok(output.combined())
    }

    async fn container_health(&self, service: &str) -> Result<ContainerHealth> {
        let Some(summary) = self.find_container(service).await? else {
            return Ok(ContainerHealth::missing());
        };
        let name = summary
            .names
            .as_ref()
            .and_then(|n| n.first())
            .map(|n| n.trim_start_matches('/').to_string());
        let Some(id) = summary.id.or_else(|| name.clone()) else {
            return Ok(ContainerHealth::missing());
        };

        let inspect = self
            .docker
            .inspect_container(&id, None::<InspectContainerOptions>)
            .await?;
        let Some(state) = inspect.state else {
            return Ok(ContainerHealth::missing());
        };

        let running = state.running.unwrap_or(false);
        // ヘルスチェックが設定されている場合、そのステータスを確認
        let healthy = state
            .health
            .and_then(|h| h.status)
            .and_then(|status| match status {
                HealthStatusEnum::HEALTHY => Some(true),
                HealthStatusEnum::NONE | HealthStatusEnum::EMPTY => None,
                _ => Some(false),
            });

        Ok(ContainerHealth {
            container: name,
            state: if running {
                ContainerState::Running
            } else {
                ContainerState::Stopped
            },
            healthy,
        })
    }

    async fn resource_usage(&self) -> Result<HashMap<String, ResourceUsage>> {
        let mut cmd = Command::new("docker");
        cmd.args([
            "stats",
            "--no-stream",
            "--format",
            "{{.Name}}\t{{.CPUPerc}}\t{{.MemPerc}}",
        ]);
        let output = Self::run(cmd, "docker stats --no-stream".to_string()).await?;
        if !output.success() {
            return Err(ContainerError::ComposeFailed {
                command: "docker stats --no-stream".to_string(),
                message: output.combined(),
            });
        }
        Ok(parse_stats(&output.stdout))
    }
}

/// スタックに属する Docker リソース（クリーンアップ対象）
pub struct DockerResources {
    docker: Docker,
    manifest: StackManifest,
}

impl DockerResources {
    pub fn new(docker: Docker, manifest: &StackManifest) -> Self {
        Self {
            docker,
            manifest: manifest.clone(),
        }
    }

    fn project_filter(&self) -> HashMap<String, Vec<String>> {
        label_filter(&[format!("{}={}", PROJECT_LABEL, self.manifest.project)])
    }
}

impl ResourceStore for DockerResources {
    async fn discover(&self, kind: ResourceKind) -> Result<Vec<Resource>> {
        let resources = match kind {
            ResourceKind::Container => {
                let options = ListContainersOptions {
                    all: true,
                    filters: Some(self.project_filter()),
                    ..Default::default()
                };
                self.docker
                    .list_containers(Some(options))
                    .await?
                    .into_iter()
                    .filter_map(|c| {
                        let name = c
                            .names
                            .as_ref()
                            .and_then(|n| n.first())
                            .map(|n| n.trim_start_matches('/').to_string());
                        let id = c.id.or_else(|| name.clone())?;
                        Some(Resource::new(kind, id.clone(), name.unwrap_or(id)))
                    })
                    .collect()
            }
            ResourceKind::Image => {
                // タグ単位で削除する（複数タグのイメージはID指定だと失敗する）
                let images = self
                    .docker
                    .list_images(Some(ListImagesOptions::default()))
                    .await?;
                images
                    .into_iter()
                    .flat_map(|image| image.repo_tags)
                    .filter(|tag| self.manifest.owns_image(tag))
                    .map(|tag| Resource::new(kind, tag.clone(), tag))
                    .collect()
            }
            ResourceKind::DanglingImage => {
                let options = ListImagesOptions {
                    filters: Some(HashMap::from([(
                        "dangling".to_string(),
                        vec!["true".to_string()],
                    )])),
                    ..Default::default()
                };
                self.docker
                    .list_images(Some(options))
                    .await?
                    .into_iter()
                    .map(|image| {
                        let short = image.id.trim_start_matches("sha256:");
                        let name = short.chars().take(12).collect::<String>();
                        Resource::new(kind, image.id.clone(), name)
                    })
                    .collect()
            }
            ResourceKind::Network => {
                let options = ListNetworksOptions {
                    filters: Some(self.project_filter()),
                    ..Default::default()
                };
                self.docker
                    .list_networks(Some(options))
                    .await?
                    .into_iter()
                    .filter_map(|n| n.name)
                    .map(|name| Resource::new(kind, name.clone(), name))
                    .collect()
            }
            ResourceKind::Volume => {
                let options = ListVolumesOptions {
                    filters: Some(self.project_filter()),
                    ..Default::default()
                };
                self.docker
                    .list_volumes(Some(options))
                    .await?
                    .volumes
                    .unwrap_or_default()
                    .into_iter()
                    .map(|v| Resource::new(kind, v.name.clone(), v.name))
                    .collect()
            }
        };

        Ok(resources)
    }

    async fn remove(&self, resource: &Resource) -> Result<()> {
        match resource.kind {
            ResourceKind::Container => {
                self.docker
                    .remove_container(
                        &resource.id,
                        Some(RemoveContainerOptions {
                            force: true,
                            ..Default::default()
                        }),
                    )
                    .await?
            }
            ResourceKind::Image | ResourceKind::DanglingImage => {
                self.docker
                    .remove_image(&resource.id, None::<RemoveImageOptions>, None)
                    .await?;
            }
            ResourceKind::Network => self.docker.remove_network(&resource.id).await?,
            ResourceKind::Volume => {
                self.docker
                    .remove_volume(&resource.id, None::<RemoveVolumeOptions>)
                    .await?
            }
        }
        Ok(())
    }
}
