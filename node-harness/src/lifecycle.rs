use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::error::{HarnessError, Result};
use crate::runtime::{ContainerRuntime, ContainerSpec};

/// Owns the container of a single node across create/start/stop/remove cycles.
///
/// Operations on a container that does not exist fail with
/// [`HarnessError::NotFound`]; callers tearing down a topology can ignore it.
pub struct ContainerLifecycle {
    runtime: Arc<dyn ContainerRuntime>,
    name: String,
    container_id: Mutex<Option<String>>,
}

impl ContainerLifecycle {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, name: impl Into<String>) -> Self {
        Self {
            runtime,
            name: name.into(),
            container_id: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn container_id(&self) -> Option<String> {
        self.container_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_container_id(&self, id: Option<String>) {
        *self.container_id.lock().unwrap_or_else(|e| e.into_inner()) = id;
    }

    fn require_id(&self) -> Result<String> {
        self.container_id()
            .ok_or_else(|| HarnessError::NotFound(format!("container {} has not been created", self.name)))
    }

    /// Pull the image and create the container, replacing any container this
    /// lifecycle created before.
    pub async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        if let Some(old) = self.container_id() {
            warn!("Replacing existing container {} ({})", self.name, old);
            match self.runtime.remove_container(&old).await {
                Ok(()) | Err(HarnessError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
            self.set_container_id(None);
        }

        self.runtime.ensure_image(&spec.image).await?;
        let id = self.runtime.create_container(spec).await?;
        info!("Created container {} ({})", self.name, id);
        self.set_container_id(Some(id.clone()));
        Ok(id)
    }

    pub async fn start(&self) -> Result<()> {
        let id = self.require_id()?;
        self.runtime.start_container(&id).await
    }

    /// Host addresses bound to `ports`, in order
    pub async fn host_ports(&self, ports: &[&str]) -> Result<Vec<String>> {
        let id = self.require_id()?;
        self.runtime.host_ports(&id, ports).await
    }

    pub async fn pause(&self) -> Result<()> {
        let id = self.require_id()?;
        self.runtime.pause_container(&id).await
    }

    pub async fn unpause(&self) -> Result<()> {
        let id = self.require_id()?;
        self.runtime.unpause_container(&id).await
    }

    pub async fn stop(&self) -> Result<()> {
        let id = self.require_id()?;
        self.runtime.stop_container(&id).await
    }

    /// Remove the container. The handle is forgotten even when the runtime
    /// reports it already gone.
    pub async fn remove(&self) -> Result<()> {
        let id = self.require_id()?;
        let result = self.runtime.remove_container(&id).await;
        if matches!(result, Ok(()) | Err(HarnessError::NotFound(_))) {
            self.set_container_id(None);
        }
        result
    }
}
