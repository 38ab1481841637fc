//! Container runtime boundary
//!
//! The harness only needs a handful of container operations. They sit behind
//! [`ContainerRuntime`] so node logic can be driven against Docker
//! ([`DockerRuntime`]) or an in-memory fake in tests.

use async_trait::async_trait;

use crate::error::{HarnessError, Result};

mod docker;

pub use docker::DockerRuntime;

/// Long-running node container
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub network: String,
    pub hostname: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    /// `host:container` bind mounts
    pub binds: Vec<String>,
    /// Ports in `26657/tcp` form, each published on an ephemeral host port
    pub exposed_ports: Vec<String>,
}

/// One-shot command run in a throwaway container sharing the node's image,
/// network and bind mount
#[derive(Debug, Clone, Default)]
pub struct JobSpec {
    /// Prefix for the throwaway container name
    pub name: String,
    pub image: String,
    pub network: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub binds: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i64,
}

impl ExecOutput {
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Turn a non-zero exit into [`HarnessError::Exec`]
    pub fn check(self, cmd: &[String]) -> Result<Self> {
        if self.exit_code == 0 {
            return Ok(self);
        }
        Err(HarnessError::Exec {
            command: cmd.join(" "),
            exit_code: self.exit_code,
            stderr: self.stderr_str().trim().to_string(),
        })
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull `image` if it is not present locally
    async fn ensure_image(&self, image: &str) -> Result<()>;

    /// Create (but do not start) a container; returns its id
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start_container(&self, id: &str) -> Result<()>;

    async fn pause_container(&self, id: &str) -> Result<()>;

    async fn unpause_container(&self, id: &str) -> Result<()>;

    async fn stop_container(&self, id: &str) -> Result<()>;

    async fn remove_container(&self, id: &str) -> Result<()>;

    /// Host-side `ip:port` bound to each of `ports`, in the same order
    async fn host_ports(&self, id: &str, ports: &[&str]) -> Result<Vec<String>>;

    /// Run a command to completion and collect its output
    async fn run_job(&self, job: &JobSpec) -> Result<ExecOutput>;
}
