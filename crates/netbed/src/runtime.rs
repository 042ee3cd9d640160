//! Container runtime seam.
//!
//! Nodes are backed by long-running privileged containers. The
//! [`ContainerRuntime`] trait is what the node controller consumes; the
//! [`DockerRuntime`] implementation talks to the local Docker daemon.

use std::path::PathBuf;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::service::HostConfig;
use netbed_common::{NetbedError, NetbedResult};

use crate::topology::Node;

/// Host directory mounted read-write into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    /// Path on the host.
    pub source: PathBuf,
    /// Path inside the container.
    pub target: PathBuf,
}

impl BindMount {
    /// Docker `-v` style `source:target:rw`.
    #[must_use]
    pub fn to_bind_string(&self) -> String {
        format!("{}:{}:rw", self.source.display(), self.target.display())
    }
}

/// What to run for a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Run with full privileges.
    pub privileged: bool,
    /// Bind mounts.
    pub binds: Vec<BindMount>,
}

impl ContainerSpec {
    /// Container for a topology node: named after it, privileged.
    #[must_use]
    pub fn for_node(node: &Node) -> Self {
        Self {
            name: node.name.clone(),
            image: node.image.clone(),
            privileged: true,
            binds: node
                .volume
                .iter()
                .map(|v| BindMount {
                    source: v.host_path.clone(),
                    target: v.container_path.clone(),
                })
                .collect(),
        }
    }
}

/// Container lifecycle operations used by the node controller.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create and start a detached container.
    ///
    /// A name already in use is a [`NetbedError::State`] error and leaves
    /// the existing container alone. A container that was created but
    /// failed to start is removed again.
    async fn run(&self, spec: &ContainerSpec) -> NetbedResult<()>;

    /// Process id of a running container's init process.
    async fn pid(&self, name: &str) -> NetbedResult<u32>;

    /// Stop a container with no grace period. Returns whether it existed.
    async fn stop(&self, name: &str) -> NetbedResult<bool>;

    /// Remove a container. Returns whether it existed.
    async fn remove(&self, name: &str) -> NetbedResult<bool>;
}

/// [`ContainerRuntime`] backed by the Docker Engine API.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the local defaults (`DOCKER_HOST` or the unix socket).
    pub fn connect() -> NetbedResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| NetbedError::runtime("docker", "connect to daemon", e))?;
        Ok(Self { docker })
    }

    /// Wrap an existing client.
    #[must_use]
    pub const fn with_client(docker: Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn run(&self, spec: &ContainerSpec) -> NetbedResult<()> {
        let binds: Vec<String> = spec.binds.iter().map(BindMount::to_bind_string).collect();
        let host_config = HostConfig {
            privileged: Some(spec.privileged),
            binds: (!binds.is_empty()).then_some(binds),
            ..Default::default()
        };
        // keeps shell-entrypoint images alive while detached
        let config = Config {
            image: Some(spec.image.clone()),
            hostname: Some(spec.name.clone()),
            tty: Some(true),
            open_stdin: Some(true),
            host_config: Some(host_config),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let response = match self.docker.create_container(Some(options), config).await {
            Ok(response) => response,
            Err(DockerError::DockerResponseServerError {
                status_code: 409, ..
            }) => {
                return Err(NetbedError::state(
                    &spec.name,
                    "a container with this name already exists",
                ));
            }
            Err(e) => return Err(NetbedError::runtime(&spec.name, "create container", e)),
        };
        tracing::debug!(container = %spec.name, id = %response.id, "Created container");

        if let Err(e) = self
            .docker
            .start_container(&spec.name, None::<StartContainerOptions<String>>)
            .await
        {
            if let Err(cleanup) = self.remove(&spec.name).await {
                tracing::warn!(
                    container = %spec.name,
                    error = %cleanup,
                    "Failed to remove unstarted container"
                );
            }
            return Err(NetbedError::runtime(&spec.name, "start container", e));
        }
        tracing::debug!(container = %spec.name, "Started container");
        Ok(())
    }

    async fn pid(&self, name: &str) -> NetbedResult<u32> {
        let inspect = self
            .docker
            .inspect_container(name, None)
            .await
            .map_err(|e| NetbedError::runtime(name, "inspect container", e))?;

        let pid = inspect.state.and_then(|s| s.pid).unwrap_or_default();
        u32::try_from(pid)
            .ok()
            .filter(|&pid| pid > 0)
            .ok_or_else(|| NetbedError::runtime(name, "inspect container", "container is not running"))
    }

    async fn stop(&self, name: &str) -> NetbedResult<bool> {
        match self
            .docker
            .stop_container(name, Some(StopContainerOptions { t: 0 }))
            .await
        {
            Ok(()) => Ok(true),
            // 304: already stopped
            Err(DockerError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(true),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(NetbedError::runtime(name, "stop container", e)),
        }
    }

    async fn remove(&self, name: &str) -> NetbedResult<bool> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => Ok(true),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(NetbedError::runtime(name, "remove container", e)),
        }
    }
}
