//! Docker implementation of [`ContainerRuntime`]

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, InspectContainerOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use bollard::network::{CreateNetworkOptions, InspectNetworkOptions};
use bollard::Docker;
use futures_util::stream::StreamExt;
use tracing::{debug, error, info, warn};

use super::{ContainerRuntime, ContainerSpec, ExecOutput, JobSpec};
use crate::error::{HarnessError, Result};

/// Seconds docker waits for a graceful stop before killing the node
const STOP_TIMEOUT_SECONDS: i64 = 30;

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the local Docker socket
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_socket_defaults()?;
        Ok(Self { docker })
    }

    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }

    /// Create a bridge network named `name` unless it already exists; returns its id
    pub async fn ensure_network(&self, name: &str) -> Result<String> {
        match self
            .docker
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
        {
            Ok(network) => {
                debug!("Docker network {} already exists", name);
                return Ok(network.id.unwrap_or_else(|| name.to_string()));
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {}
            Err(e) => return Err(e.into()),
        }

        info!("Creating Docker network: {}", name);
        let response = self
            .docker
            .create_network(CreateNetworkOptions {
                name: name.to_string(),
                driver: "bridge".to_string(),
                check_duplicate: true,
                ..Default::default()
            })
            .await?;

        Ok(response.id.unwrap_or_else(|| name.to_string()))
    }

    async fn collect_logs(&self, id: &str) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut output = self.docker.logs(
            id,
            Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                follow: false,
                ..Default::default()
            }),
        );

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        while let Some(msg) = output.next().await {
            match msg {
                Ok(LogOutput::StdOut { message }) => stdout.extend_from_slice(&message),
                Ok(LogOutput::StdErr { message }) => stderr.extend_from_slice(&message),
                Ok(_) => {}
                Err(e) => {
                    error!("Error reading container output: {}", e);
                    return Err(e.into());
                }
            }
        }

        Ok((stdout, stderr))
    }

    async fn force_remove(&self, id: &str) {
        if let Err(e) = self
            .docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            warn!("Failed to remove job container {}: {}", id, e);
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ensure_image(&self, image: &str) -> Result<()> {
        info!("Ensuring Docker image is available: {}", image);

        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image.to_string(),
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(result) = stream.next().await {
            match result {
                Ok(info_msg) => {
                    if let Some(status) = info_msg.status {
                        debug!("Docker: {}", status);
                    }
                }
                Err(e) => {
                    error!("Failed to pull Docker image: {}", e);
                    return Err(e.into());
                }
            }
        }

        info!("Docker image ready: {}", image);
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        info!("Creating Docker container: {}", spec.name);

        let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
            .exposed_ports
            .iter()
            .map(|p| (p.clone(), HashMap::new()))
            .collect();

        // Empty host port = ephemeral binding, read back after start
        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
            .exposed_ports
            .iter()
            .map(|p| {
                (
                    p.clone(),
                    Some(vec![PortBinding {
                        host_ip: Some("0.0.0.0".to_string()),
                        host_port: Some(String::new()),
                    }]),
                )
            })
            .collect();

        let container_config = ContainerConfig {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            env: Some(spec.env.clone()),
            hostname: Some(spec.hostname.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                network_mode: Some(spec.network.clone()),
                binds: Some(spec.binds.clone()),
                port_bindings: Some(port_bindings),
                ..Default::default()
            }),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    ..Default::default()
                }),
                container_config,
            )
            .await?;

        for warning in &response.warnings {
            warn!("Docker create warning for {}: {}", spec.name, warning);
        }

        info!("Container created: {}", response.id);
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker.start_container::<String>(id, None).await?;
        info!("Container started: {}", id);
        Ok(())
    }

    async fn pause_container(&self, id: &str) -> Result<()> {
        self.docker.pause_container(id).await?;
        Ok(())
    }

    async fn unpause_container(&self, id: &str) -> Result<()> {
        self.docker.unpause_container(id).await?;
        Ok(())
    }

    async fn stop_container(&self, id: &str) -> Result<()> {
        self.docker
            .stop_container(id, Some(StopContainerOptions { t: STOP_TIMEOUT_SECONDS }))
            .await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        info!("Removing container: {}", id);
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }

    async fn host_ports(&self, id: &str, ports: &[&str]) -> Result<Vec<String>> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;

        let bindings = inspect
            .network_settings
            .and_then(|n| n.ports)
            .unwrap_or_default();

        ports
            .iter()
            .map(|port| {
                let binding = bindings
                    .get(*port)
                    .and_then(|b| b.as_ref())
                    .and_then(|b| b.first())
                    .ok_or_else(|| {
                        HarnessError::NotFound(format!("no host binding for {} on {}", port, id))
                    })?;

                let host_ip = match binding.host_ip.as_deref() {
                    None | Some("") | Some("0.0.0.0") => "127.0.0.1",
                    Some(ip) => ip,
                };
                let host_port = binding.host_port.as_deref().unwrap_or_default();
                Ok(format!("{}:{}", host_ip, host_port))
            })
            .collect()
    }

    async fn run_job(&self, job: &JobSpec) -> Result<ExecOutput> {
        let name = format!("{}-{}", job.name, &uuid::Uuid::new_v4().simple().to_string()[..8]);
        debug!("Running job {}: {}", name, job.cmd.join(" "));

        let container_config = ContainerConfig {
            image: Some(job.image.clone()),
            cmd: Some(job.cmd.clone()),
            env: Some(job.env.clone()),
            host_config: Some(HostConfig {
                network_mode: Some(job.network.clone()),
                binds: Some(job.binds.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    ..Default::default()
                }),
                container_config,
            )
            .await?;
        let id = response.id;

        if let Err(e) = self.docker.start_container::<String>(&id, None).await {
            self.force_remove(&id).await;
            return Err(e.into());
        }

        let mut exit_code = 0;
        let mut wait = self.docker.wait_container(
            &id,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );
        while let Some(result) = wait.next().await {
            match result {
                Ok(status) => exit_code = status.status_code,
                // bollard reports a non-zero exit as an error
                Err(bollard::errors::Error::DockerContainerWaitError { code, .. }) => {
                    exit_code = code
                }
                Err(e) => {
                    self.force_remove(&id).await;
                    return Err(e.into());
                }
            }
        }

        let logs = self.collect_logs(&id).await;
        self.force_remove(&id).await;
        let (stdout, stderr) = logs?;

        for line in String::from_utf8_lossy(&stderr).lines() {
            debug!("📦 [stderr] {}", line);
        }
        if exit_code != 0 {
            warn!("❌ Job {} exited with code {}", name, exit_code);
        }

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code,
        })
    }
}
