//! Explicit provisioning context.

use std::future::Future;
use std::sync::Arc;

use netbed_common::{NetbedError, NetbedResult};
use netbed_network::{FsNamespaceRegistry, NamespaceRegistry, NetworkControl, RtnetlinkControl};

use crate::config::NetbedConfig;
use crate::runtime::{ContainerRuntime, DockerRuntime};

/// Collaborators and settings handed to every controller.
#[derive(Clone)]
pub struct Context {
    runtime: Arc<dyn ContainerRuntime>,
    network: Arc<dyn NetworkControl>,
    registry: Arc<dyn NamespaceRegistry>,
    config: NetbedConfig,
}

impl Context {
    /// Assemble a context from explicit collaborators.
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        network: Arc<dyn NetworkControl>,
        registry: Arc<dyn NamespaceRegistry>,
        config: NetbedConfig,
    ) -> Self {
        Self {
            runtime,
            network,
            registry,
            config,
        }
    }

    /// Connect to Docker and netlink on this host.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(config: NetbedConfig) -> NetbedResult<Self> {
        let runtime = DockerRuntime::connect()?;
        let network = RtnetlinkControl::connect()?;
        let registry = FsNamespaceRegistry::new(config.paths.clone());
        tracing::debug!(netns = %config.paths.netns.display(), "Connected to host services");
        Ok(Self::new(
            Arc::new(runtime),
            Arc::new(network),
            Arc::new(registry),
            config,
        ))
    }

    /// Container runtime.
    #[must_use]
    pub fn runtime(&self) -> &dyn ContainerRuntime {
        self.runtime.as_ref()
    }

    /// Kernel network control.
    #[must_use]
    pub fn network(&self) -> &dyn NetworkControl {
        self.network.as_ref()
    }

    /// Namespace registry.
    #[must_use]
    pub fn registry(&self) -> &dyn NamespaceRegistry {
        self.registry.as_ref()
    }

    /// Configuration.
    #[must_use]
    pub const fn config(&self) -> &NetbedConfig {
        &self.config
    }

    /// Run one OS-level call under the configured deadline.
    ///
    /// Failures are attributed to `entity`.
    pub async fn call<T, F>(&self, entity: &str, operation: &str, fut: F) -> NetbedResult<T>
    where
        F: Future<Output = NetbedResult<T>>,
    {
        match tokio::time::timeout(self.config.timeout, fut).await {
            Ok(result) => result.map_err(|e| e.within(entity)),
            Err(_) => Err(NetbedError::Timeout {
                entity: entity.to_string(),
                operation: operation.to_string(),
                seconds: self.config.timeout.as_secs(),
            }),
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
