//! In-memory stand-in for Docker, netlink and the namespace registry.
//!
//! One `FakeHost` implements all three collaborator traits over a shared
//! kernel model, so tests can inspect exactly what a run left behind.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use netbed::config::NetbedConfig;
use netbed::context::Context;
use netbed::runtime::{ContainerRuntime, ContainerSpec};
use netbed_common::{DeviceName, IpNet, NetbedError, NetbedResult};
use netbed_network::{LinkScope, NamespaceHandle, NamespaceRegistry, NetworkControl};
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Place {
    Host,
    Netns(u32),
}

/// A network device as the fake kernel sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub bridge: bool,
    pub up: bool,
    pub addresses: Vec<IpNet>,
    pub master: Option<String>,
    pair: Option<u64>,
}

/// A container as the fake daemon sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub spec: ContainerSpec,
    pub pid: u32,
    pub running: bool,
}

#[derive(Debug, Default)]
struct Kernel {
    containers: BTreeMap<String, Container>,
    registry: BTreeMap<String, u32>,
    devices: BTreeMap<(Place, String), Device>,
    next_pid: u32,
    next_pair: u64,
}

impl Kernel {
    fn running_pid(&self, pid: u32) -> bool {
        self.containers.values().any(|c| c.running && c.pid == pid)
    }

    fn place(&self, scope: &LinkScope, subject: &str) -> NetbedResult<Place> {
        match scope {
            LinkScope::Host => Ok(Place::Host),
            LinkScope::Namespace(ns) => match self.registry.get(ns.name()) {
                Some(&pid) if self.running_pid(pid) => Ok(Place::Netns(pid)),
                _ => Err(NetbedError::runtime(subject, "enter namespace", "no such namespace")),
            },
        }
    }

    fn device_mut(&mut self, place: Place, name: &str, op: &str) -> NetbedResult<&mut Device> {
        self.devices
            .get_mut(&(place, name.to_string()))
            .ok_or_else(|| NetbedError::runtime(name, op, "no such device"))
    }

    fn delete(&mut self, place: Place, name: &str) -> bool {
        let Some(device) = self.devices.remove(&(place, name.to_string())) else {
            return false;
        };
        if let Some(pair) = device.pair {
            self.devices.retain(|_, d| d.pair != Some(pair));
        }
        if device.bridge {
            for port in self.devices.values_mut() {
                if port.master.as_deref() == Some(name) {
                    port.master = None;
                }
            }
        }
        true
    }

    /// A namespace going away takes its devices, and their veth peers, with it.
    fn destroy_namespace(&mut self, pid: u32) {
        let doomed: Vec<String> = self
            .devices
            .keys()
            .filter(|(place, _)| *place == Place::Netns(pid))
            .map(|(_, name)| name.clone())
            .collect();
        for name in doomed {
            self.delete(Place::Netns(pid), &name);
        }
    }
}

/// Fake container runtime, netlink and namespace registry.
#[derive(Debug, Default)]
pub struct FakeHost {
    kernel: Mutex<Kernel>,
    failures: Mutex<BTreeSet<(String, String)>>,
    hangs: Mutex<BTreeSet<(String, String)>>,
    late_failures: Mutex<BTreeSet<(String, String)>>,
    late_hangs: Mutex<BTreeSet<(String, String)>>,
    calls: Mutex<Vec<String>>,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `operation` on `subject` fail.
    pub fn fail(&self, operation: &str, subject: &str) {
        self.failures
            .lock()
            .insert((operation.to_string(), subject.to_string()));
    }

    /// Make `operation` on `subject` never complete.
    pub fn hang(&self, operation: &str, subject: &str) {
        self.hangs
            .lock()
            .insert((operation.to_string(), subject.to_string()));
    }

    /// Let `operation` on `subject` take effect, then fail.
    pub fn fail_after(&self, operation: &str, subject: &str) {
        self.late_failures
            .lock()
            .insert((operation.to_string(), subject.to_string()));
    }

    /// Let `operation` on `subject` take effect, then never return.
    pub fn hang_after(&self, operation: &str, subject: &str) {
        self.late_hangs
            .lock()
            .insert((operation.to_string(), subject.to_string()));
    }

    /// A container some other tool already runs under `name`.
    pub fn add_foreign_container(&self, name: &str) {
        let mut kernel = self.kernel.lock();
        kernel.next_pid += 1;
        let pid = 1000 + kernel.next_pid;
        kernel.containers.insert(
            name.to_string(),
            Container {
                spec: ContainerSpec {
                    name: name.to_string(),
                    image: "foreign".to_string(),
                    privileged: false,
                    binds: Vec::new(),
                },
                pid,
                running: true,
            },
        );
    }

    /// A host device netbed did not create.
    pub fn add_host_device(&self, name: &str) {
        self.kernel.lock().devices.insert(
            (Place::Host, name.to_string()),
            Device {
                bridge: false,
                up: true,
                addresses: Vec::new(),
                master: None,
                pair: None,
            },
        );
    }

    /// Every call made so far, as `operation subject`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn container(&self, name: &str) -> Option<Container> {
        self.kernel.lock().containers.get(name).cloned()
    }

    pub fn host_device(&self, name: &str) -> Option<Device> {
        self.kernel
            .lock()
            .devices
            .get(&(Place::Host, name.to_string()))
            .cloned()
    }

    /// Device inside the namespace registered for `node`.
    pub fn node_device(&self, node: &str, name: &str) -> Option<Device> {
        let kernel = self.kernel.lock();
        let pid = *kernel.registry.get(node)?;
        kernel.devices.get(&(Place::Netns(pid), name.to_string())).cloned()
    }

    pub fn registry_entries(&self) -> Vec<String> {
        self.kernel.lock().registry.keys().cloned().collect()
    }

    /// Nothing created by a run remains.
    pub fn is_baseline(&self) -> bool {
        let kernel = self.kernel.lock();
        kernel.containers.is_empty() && kernel.registry.is_empty() && kernel.devices.is_empty()
    }

    pub fn context(self: &Arc<Self>) -> Context {
        self.context_with(NetbedConfig::default().keep_bridge_netfilter())
    }

    pub fn context_with(self: &Arc<Self>, config: NetbedConfig) -> Context {
        Context::new(self.clone(), self.clone(), self.clone(), config)
    }

    pub fn context_with_timeout(self: &Arc<Self>, timeout: Duration) -> Context {
        self.context_with(
            NetbedConfig::default()
                .keep_bridge_netfilter()
                .with_timeout(timeout),
        )
    }

    async fn enter(&self, operation: &str, subject: &str) -> NetbedResult<()> {
        self.calls.lock().push(format!("{operation} {subject}"));
        let key = (operation.to_string(), subject.to_string());
        if self.hangs.lock().contains(&key) {
            std::future::pending::<()>().await;
        }
        if self.failures.lock().contains(&key) {
            return Err(NetbedError::runtime(subject, operation, "injected failure"));
        }
        Ok(())
    }

    async fn leave(&self, operation: &str, subject: &str) -> NetbedResult<()> {
        let key = (operation.to_string(), subject.to_string());
        if self.late_hangs.lock().contains(&key) {
            std::future::pending::<()>().await;
        }
        if self.late_failures.lock().contains(&key) {
            return Err(NetbedError::runtime(subject, operation, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for FakeHost {
    async fn run(&self, spec: &ContainerSpec) -> NetbedResult<()> {
        self.enter("run container", &spec.name).await?;
        {
            let mut kernel = self.kernel.lock();
            if kernel.containers.contains_key(&spec.name) {
                return Err(NetbedError::state(&spec.name, "name already in use"));
            }
            // a late fault leaves the container created but not started
            let running = !self
                .late_failures
                .lock()
                .contains(&("run container".to_string(), spec.name.clone()));
            kernel.next_pid += 1;
            let pid = 1000 + kernel.next_pid;
            kernel.containers.insert(
                spec.name.clone(),
                Container {
                    spec: spec.clone(),
                    pid,
                    running,
                },
            );
        }
        self.leave("run container", &spec.name).await
    }

    async fn pid(&self, name: &str) -> NetbedResult<u32> {
        self.enter("inspect container", name).await?;
        match self.kernel.lock().containers.get(name) {
            Some(c) if c.running => Ok(c.pid),
            _ => Err(NetbedError::runtime(name, "inspect container", "container is not running")),
        }
    }

    async fn stop(&self, name: &str) -> NetbedResult<bool> {
        self.enter("stop container", name).await?;
        let mut kernel = self.kernel.lock();
        let Some(container) = kernel.containers.get_mut(name) else {
            return Ok(false);
        };
        container.running = false;
        let pid = container.pid;
        kernel.destroy_namespace(pid);
        Ok(true)
    }

    async fn remove(&self, name: &str) -> NetbedResult<bool> {
        self.enter("remove container", name).await?;
        let mut kernel = self.kernel.lock();
        let Some(container) = kernel.containers.remove(name) else {
            return Ok(false);
        };
        kernel.destroy_namespace(container.pid);
        Ok(true)
    }
}

#[async_trait]
impl NetworkControl for FakeHost {
    async fn create_bridge(&self, name: &DeviceName) -> NetbedResult<()> {
        self.enter("create bridge", name.as_str()).await?;
        {
            let mut kernel = self.kernel.lock();
            let key = (Place::Host, name.to_string());
            if kernel.devices.contains_key(&key) {
                return Err(NetbedError::runtime(name.as_str(), "create bridge", "File exists"));
            }
            kernel.devices.insert(
                key,
                Device {
                    bridge: true,
                    up: false,
                    addresses: Vec::new(),
                    master: None,
                    pair: None,
                },
            );
        }
        self.leave("create bridge", name.as_str()).await
    }

    async fn create_veth(&self, name: &DeviceName, peer: &DeviceName) -> NetbedResult<()> {
        self.enter("create veth", name.as_str()).await?;
        {
            let mut kernel = self.kernel.lock();
            for end in [name, peer] {
                if kernel.devices.contains_key(&(Place::Host, end.to_string())) {
                    return Err(NetbedError::runtime(end.as_str(), "create veth pair", "File exists"));
                }
            }
            kernel.next_pair += 1;
            let pair = kernel.next_pair;
            for end in [name, peer] {
                kernel.devices.insert(
                    (Place::Host, end.to_string()),
                    Device {
                        bridge: false,
                        up: false,
                        addresses: Vec::new(),
                        master: None,
                        pair: Some(pair),
                    },
                );
            }
        }
        self.leave("create veth", name.as_str()).await
    }

    async fn delete_link(&self, scope: &LinkScope, name: &DeviceName) -> NetbedResult<bool> {
        self.enter("delete link", name.as_str()).await?;
        let mut kernel = self.kernel.lock();
        let place = match kernel.place(scope, name.as_str()) {
            Ok(place) => place,
            Err(_) => return Ok(false),
        };
        Ok(kernel.delete(place, name.as_str()))
    }

    async fn set_up(&self, scope: &LinkScope, name: &DeviceName) -> NetbedResult<()> {
        self.enter("set up", name.as_str()).await?;
        let mut kernel = self.kernel.lock();
        let place = kernel.place(scope, name.as_str())?;
        kernel.device_mut(place, name.as_str(), "set device up")?.up = true;
        Ok(())
    }

    async fn set_master(&self, name: &DeviceName, master: &DeviceName) -> NetbedResult<()> {
        self.enter("set master", name.as_str()).await?;
        let mut kernel = self.kernel.lock();
        let is_bridge = kernel
            .devices
            .get(&(Place::Host, master.to_string()))
            .is_some_and(|d| d.bridge);
        if !is_bridge {
            return Err(NetbedError::runtime(master.as_str(), "attach to bridge", "no such bridge"));
        }
        kernel.device_mut(Place::Host, name.as_str(), "attach to bridge")?.master =
            Some(master.to_string());
        Ok(())
    }

    async fn move_to_namespace(
        &self,
        name: &DeviceName,
        namespace: &NamespaceHandle,
    ) -> NetbedResult<()> {
        self.enter("move", name.as_str()).await?;
        let mut kernel = self.kernel.lock();
        let place = kernel.place(&LinkScope::Namespace(namespace.clone()), name.as_str())?;
        let device = kernel
            .devices
            .remove(&(Place::Host, name.to_string()))
            .ok_or_else(|| NetbedError::runtime(name.as_str(), "move to namespace", "no such device"))?;
        kernel.devices.insert((place, name.to_string()), device);
        Ok(())
    }

    async fn add_address(
        &self,
        scope: &LinkScope,
        name: &DeviceName,
        address: IpNet,
    ) -> NetbedResult<()> {
        self.enter("add address", name.as_str()).await?;
        let mut kernel = self.kernel.lock();
        let place = kernel.place(scope, name.as_str())?;
        kernel
            .device_mut(place, name.as_str(), "assign address")?
            .addresses
            .push(address);
        Ok(())
    }
}

impl NamespaceRegistry for FakeHost {
    fn bind(&self, name: &str, pid: u32) -> NetbedResult<NamespaceHandle> {
        self.calls.lock().push(format!("bind {name}"));
        if self
            .failures
            .lock()
            .contains(&("bind".to_string(), name.to_string()))
        {
            return Err(NetbedError::runtime(name, "register namespace", "injected failure"));
        }
        self.kernel.lock().registry.insert(name.to_string(), pid);
        Ok(NamespaceHandle::new(name, format!("/fake/netns/{name}")))
    }

    fn unbind(&self, name: &str) -> NetbedResult<bool> {
        self.calls.lock().push(format!("unbind {name}"));
        Ok(self.kernel.lock().registry.remove(name).is_some())
    }

    fn lookup(&self, name: &str) -> NetbedResult<Option<NamespaceHandle>> {
        let kernel = self.kernel.lock();
        Ok(kernel
            .registry
            .get(name)
            .filter(|&&pid| kernel.running_pid(pid))
            .map(|_| NamespaceHandle::new(name, format!("/fake/netns/{name}"))))
    }
}
