use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::retry::RetryPolicy;
use crate::rpc::RpcConnector;
use crate::runtime::ContainerRuntime;
use crate::volume::VolumeStore;

/// Container path every node's home directory lives under
pub const CONTAINER_MOUNT_DIR: &str = "/var/cosmos-chain";

/// Shared handles passed explicitly to every node of a test topology.
///
/// Cloning is cheap; all clones share the same runtime, store, connector and
/// cancellation token.
#[derive(Clone)]
pub struct HarnessContext {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub volumes: Arc<dyn VolumeStore>,
    pub rpc: Arc<dyn RpcConnector>,
    /// Docker network all node and job containers join
    pub network: String,
    /// Host side of the `/var/cosmos-chain` bind mount
    pub host_mount_dir: String,
    pub readiness: RetryPolicy,
    pub readiness_grace: Duration,
    /// Cancelling this aborts every retry loop and in-flight wait
    pub cancel: CancellationToken,
}

impl HarnessContext {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        volumes: Arc<dyn VolumeStore>,
        rpc: Arc<dyn RpcConnector>,
        network: impl Into<String>,
    ) -> Self {
        Self {
            runtime,
            volumes,
            rpc,
            network: network.into(),
            host_mount_dir: "/tmp".to_string(),
            readiness: RetryPolicy::readiness(),
            readiness_grace: Duration::from_secs(5),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_host_mount_dir(mut self, dir: impl Into<String>) -> Self {
        self.host_mount_dir = dir.into();
        self
    }

    pub fn with_readiness(mut self, policy: RetryPolicy, grace: Duration) -> Self {
        self.readiness = policy;
        self.readiness_grace = grace;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// `host:container` bind for the shared mount
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host_mount_dir, CONTAINER_MOUNT_DIR)
    }
}
