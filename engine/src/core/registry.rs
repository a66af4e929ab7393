//! The container registry: authoritative in-memory records, recovery
//! from the state store, and the housekeeping shared by the lifecycle
//! operations in `lifecycle.rs` and the exit monitors in `monitor.rs`.

use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
        Weak,
    },
    time::Duration,
};

use chrono::Utc;
use tokio::sync::{oneshot, Mutex};

use super::{
    attach::PendingAttach,
    container::{
        Attachment,
        Container,
        ContainerDetails,
        ContainerState,
        ContainerSummary,
        DockerId,
    },
    Error,
    Result,
    DAEMON_SHUTDOWN_EXIT_CODE,
};
use crate::{
    diff::RootfsInspector,
    guest::GuestGateway,
    hooks::{ContainerEvent, EventAction, EventSink, HealthMonitor, PortPublisher},
    image::ImageStore,
    network::NetworkCore,
    stdio::LogFanout,
    store::{AttachmentRecord, StateStore},
    vm::{ContainerVm, VmLauncher, VmRegistry},
    volume::VolumeStore,
};

/// Tunables of the container core.
#[derive(Debug, Clone)]
pub struct CoreOptions {
    /// Kernel image booted in every container VM.
    pub kernel_path: PathBuf,
    /// Default platform requested from the image store.
    pub platform: String,
    /// Grace given to the guest on `stop` before it is killed.
    pub stop_timeout: Duration,
    /// Drain interval on graceful shutdown.
    pub shutdown_grace: Duration,
}

impl Default for CoreOptions {
    fn default() -> Self {
        CoreOptions {
            kernel_path: PathBuf::from("/var/lib/arca/kernel/vmlinux"),
            platform: "linux/arm64".to_string(),
            stop_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_millis(200),
        }
    }
}

pub(crate) struct Entry {
    pub container: Container,
    pub vm: Option<Arc<dyn ContainerVm>>,
}

pub(crate) struct MonitorHandle {
    pub cancel: oneshot::Sender<()>,
    pub task: tokio::task::JoinHandle<()>,
}

#[derive(Default)]
pub(crate) struct CoreState {
    pub containers: HashMap<String, Entry>,
    /// name -> docker id
    pub names: HashMap<String, String>,
    /// Deferred-create markers; the configs themselves are persisted.
    pub deferred: HashSet<String>,
    pub pending_attach: HashMap<String, PendingAttach>,
    pub exit_signals: HashMap<String, oneshot::Sender<i64>>,
    pub monitors: HashMap<String, MonitorHandle>,
    /// `on-failure` attempt counts, per daemon lifetime.
    pub restart_counts: HashMap<String, u32>,
}

pub struct ContainerCore {
    /// Self-handle for the tasks the core spawns (monitors, restarts);
    /// weak so a dropped core lets them wind down.
    pub(crate) self_ref: Weak<ContainerCore>,
    pub(crate) store: Arc<StateStore>,
    pub(crate) images: Arc<dyn ImageStore>,
    pub(crate) volumes: Arc<dyn VolumeStore>,
    pub(crate) network: Arc<NetworkCore>,
    pub(crate) launcher: Arc<dyn VmLauncher>,
    pub(crate) guests: Arc<dyn GuestGateway>,
    pub(crate) fanout: Arc<LogFanout>,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) ports: Arc<dyn PortPublisher>,
    pub(crate) health: Arc<dyn HealthMonitor>,
    pub(crate) inspector: Arc<dyn RootfsInspector>,
    pub(crate) vms: Arc<VmRegistry>,
    pub(crate) opts: CoreOptions,
    pub(crate) state: Mutex<CoreState>,
    pub(crate) initialized: AtomicBool,
    pub(crate) shutting_down: AtomicBool,
}

/// Wires the core to its collaborators.
pub struct ContainerCoreBuilder {
    store: Arc<StateStore>,
    images: Arc<dyn ImageStore>,
    volumes: Arc<dyn VolumeStore>,
    network: Arc<NetworkCore>,
    launcher: Arc<dyn VmLauncher>,
    guests: Arc<dyn GuestGateway>,
    fanout: Arc<LogFanout>,
    events: Arc<dyn EventSink>,
    ports: Arc<dyn PortPublisher>,
    health: Arc<dyn HealthMonitor>,
    inspector: Arc<dyn RootfsInspector>,
    vms: Arc<VmRegistry>,
    opts: CoreOptions,
}

impl ContainerCoreBuilder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<StateStore>,
        images: Arc<dyn ImageStore>,
        volumes: Arc<dyn VolumeStore>,
        network: Arc<NetworkCore>,
        launcher: Arc<dyn VmLauncher>,
        guests: Arc<dyn GuestGateway>,
        fanout: Arc<LogFanout>,
        vms: Arc<VmRegistry>,
    ) -> ContainerCoreBuilder {
        ContainerCoreBuilder {
            store,
            images,
            volumes,
            network,
            launcher,
            guests,
            fanout,
            events: Arc::new(crate::hooks::LogEventSink),
            ports: Arc::new(crate::hooks::NullPortPublisher),
            health: Arc::new(crate::hooks::NullHealthMonitor),
            inspector: Arc::new(crate::diff::Ext4Inspector),
            vms,
            opts: CoreOptions::default(),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_ports(mut self, ports: Arc<dyn PortPublisher>) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_health(mut self, health: Arc<dyn HealthMonitor>) -> Self {
        self.health = health;
        self
    }

    pub fn with_inspector(
        mut self,
        inspector: Arc<dyn RootfsInspector>,
    ) -> Self {
        self.inspector = inspector;
        self
    }

    pub fn with_options(mut self, opts: CoreOptions) -> Self {
        self.opts = opts;
        self
    }

    pub fn build(self) -> Arc<ContainerCore> {
        Arc::new_cyclic(|self_ref| ContainerCore {
            self_ref: self_ref.clone(),
            store: self.store,
            images: self.images,
            volumes: self.volumes,
            network: self.network,
            launcher: self.launcher,
            guests: self.guests,
            fanout: self.fanout,
            events: self.events,
            ports: self.ports,
            health: self.health,
            inspector: self.inspector,
            vms: self.vms,
            opts: self.opts,
            state: Mutex::new(CoreState::default()),
            initialized: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
        })
    }
}

fn is_lower_hex(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_digit() || (b'a' ..= b'f').contains(&b))
}

impl ContainerCore {
    pub(crate) fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::NotInitialized {})
        }
    }

    /// Resolution rules: exact 64-char id, then a unique lowercase hex
    /// prefix of at least 4 chars (ties resolve to the ascending-sorted
    /// first, logged), then name with or without the leading `/`.
    pub(crate) fn resolve_locked(
        state: &CoreState,
        id_or_name: &str,
    ) -> Result<String> {
        if id_or_name.len() == 64 && state.containers.contains_key(id_or_name)
        {
            return Ok(id_or_name.to_string());
        }

        if id_or_name.len() >= 4 && is_lower_hex(id_or_name) {
            let mut hits: Vec<&String> = state
                .containers
                .keys()
                .filter(|id| id.starts_with(id_or_name))
                .collect();
            if !hits.is_empty() {
                hits.sort();
                if hits.len() > 1 {
                    warn!(
                        prefix = id_or_name,
                        matches = hits.len(),
                        chosen = %hits[0],
                        "ambiguous id prefix"
                    );
                }
                return Ok(hits[0].clone());
            }
        }

        let name = id_or_name.strip_prefix('/').unwrap_or(id_or_name);
        if let Some(id) = state.names.get(name) {
            return Ok(id.clone());
        }

        Err(Error::ContainerNotFound {
            id: id_or_name.to_string(),
        })
    }

    /// Public id/name resolution.
    pub async fn resolve(&self, id_or_name: &str) -> Result<DockerId> {
        self.ensure_initialized()?;
        let state = self.state.lock().await;
        let id = Self::resolve_locked(&state, id_or_name)?;
        Ok(state.containers[&id].container.id.clone())
    }

    pub(crate) fn emit(&self, action: EventAction, container: &Container) {
        self.events.emit(ContainerEvent {
            action,
            id: container.id.as_str().to_string(),
            name: container.name.clone(),
            attributes: container.config.labels.clone(),
        });
    }

    pub(crate) async fn persist(&self, container: &Container) -> Result<()> {
        self.store
            .upsert_container(container)
            .await
            .map_err(|source| Error::Store { source })
    }

    /// Load every persisted container. Rows that were `running` when the
    /// daemon died are rewritten as exited with code 137; VMs and
    /// monitors are rebuilt lazily on the next start. Log paths are
    /// re-registered without truncation.
    pub async fn recover(&self) -> Result<()> {
        let rows = self
            .store
            .all_containers()
            .await
            .map_err(|source| Error::Store { source })?;

        let mut state = self.state.lock().await;
        for mut container in rows {
            let id = container.id.as_str().to_string();

            if container.state.has_vm() {
                info!(
                    container = container.id.short(),
                    was = %container.state,
                    "recovering container killed by daemon shutdown"
                );
                container.state = ContainerState::Exited;
                container.exit_code = Some(DAEMON_SHUTDOWN_EXIT_CODE);
                container.finished_at = Some(Utc::now());
                container.pid = None;
                self.persist(&container).await?;
            }

            if let Err(error) = self.fanout.reregister(&id).await {
                warn!(
                    container = container.id.short(),
                    %error,
                    "failed to re-register log writers"
                );
            }

            container.attachments =
                self.attachment_views(&id).await.unwrap_or_default();

            if container.needs_create {
                state.deferred.insert(id.clone());
            }
            state.names.insert(container.name.clone(), id.clone());
            state.containers.insert(
                id,
                Entry {
                    container,
                    vm: None,
                },
            );
        }
        info!(containers = state.containers.len(), "container registry restored");
        drop(state);

        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub(crate) async fn attachment_views(
        &self,
        container_id: &str,
    ) -> Result<HashMap<String, Attachment>> {
        let pairs = self
            .network
            .attachments_of(container_id)
            .await
            .map_err(|source| Error::Network { source })?;
        Ok(pairs
            .into_iter()
            .map(|(network, record)| {
                (network.id.clone(), view_of(&network, &record))
            })
            .collect())
    }

    /// Kick restarts for containers whose policy wants them back after a
    /// daemon restart. Runs once NetworkCore and VolumeStore are wired.
    pub async fn apply_restart_policies(&self) {
        let candidates: Vec<String> = {
            let state = self.state.lock().await;
            state
                .containers
                .values()
                .filter(|e| e.container.state == ContainerState::Exited)
                .filter(|e| {
                    use super::container::RestartPolicy::*;
                    match &e.container.config.host.restart_policy {
                        Always => true,
                        UnlessStopped => !e.container.stopped_by_user,
                        _ => false,
                    }
                })
                .map(|e| e.container.id.as_str().to_string())
                .collect()
        };
        for id in candidates {
            info!(container = &id[.. 12], "restart policy resuming container");
            let Some(core) = self.self_ref.upgrade() else {
                return;
            };
            tokio::spawn(async move {
                if let Err(error) = core.start_internal(&id, false).await {
                    warn!(
                        container = &id[.. 12],
                        %error,
                        "restart policy start failed"
                    );
                }
            });
        }
    }

    /// Graceful shutdown: cancel every monitor, then wait a bounded
    /// grace interval for in-flight port unpublishing and guest calls to
    /// drain.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let monitors: Vec<(String, MonitorHandle)> = {
            let mut state = self.state.lock().await;
            state.monitors.drain().collect()
        };
        let mut joins = Vec::with_capacity(monitors.len());
        for (id, handle) in monitors {
            let _ = handle.cancel.send(());
            joins.push(async move {
                if let Err(error) = handle.task.await {
                    warn!(container = &id[.. 12], %error, "monitor join failed");
                }
            });
        }
        futures::future::join_all(joins).await;
        tokio::time::sleep(self.opts.shutdown_grace).await;
        info!("container core drained");
    }

    /// `docker ps`. Containers labelled `com.arca.internal=true` stay
    /// hidden unless the label filter asks for them.
    pub async fn list(
        &self,
        all: bool,
        filters: &HashMap<String, Vec<String>>,
    ) -> Result<Vec<ContainerSummary>> {
        self.ensure_initialized()?;
        let show_internal = filters
            .get("label")
            .map(|ls| ls.iter().any(|l| l == "com.arca.internal=true"))
            .unwrap_or(false);

        let state = self.state.lock().await;
        let mut rows: Vec<ContainerSummary> = state
            .containers
            .values()
            .map(|e| &e.container)
            .filter(|c| {
                all || matches!(
                    c.state,
                    ContainerState::Running
                        | ContainerState::Paused
                        | ContainerState::Restarting
                )
            })
            .filter(|c| show_internal || !c.is_internal())
            .filter(|c| matches_filters(c, filters))
            .map(summarize)
            .collect();
        rows.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(rows)
    }

    /// `docker inspect`.
    pub async fn inspect(&self, id_or_name: &str) -> Result<ContainerDetails> {
        self.ensure_initialized()?;
        let state = self.state.lock().await;
        let id = Self::resolve_locked(&state, id_or_name)?;
        let container = &state.containers[&id].container;
        Ok(ContainerDetails {
            id: container.id.as_str().to_string(),
            name: format!("/{}", container.name),
            created: container.created_at,
            state: container.state,
            running: container.state == ContainerState::Running,
            paused: container.state == ContainerState::Paused,
            restarting: container.state == ContainerState::Restarting,
            pid: container.pid.unwrap_or(0),
            exit_code: container.exit_code.unwrap_or(0),
            started_at: container.started_at,
            finished_at: container.finished_at,
            image: container.config.image.clone(),
            image_id: container.config.image_id.clone(),
            entrypoint: container.config.entrypoint.clone(),
            cmd: container.config.cmd.clone(),
            env: container.config.env.clone(),
            working_dir: container.config.working_dir.clone(),
            user: container.config.user.clone(),
            tty: container.config.tty,
            labels: container.config.labels.clone(),
            host_config: container.config.host.clone(),
            mounts: container.config.mounts.clone(),
            networks: container.attachments.clone(),
            health: self.health.status(container.id.as_str()),
        })
    }
}

pub(crate) fn view_of(
    network: &crate::network::NetworkRecord,
    record: &AttachmentRecord,
) -> Attachment {
    Attachment {
        network_id: network.id.clone(),
        network_name: network.name.clone(),
        ip: record.ip.to_string(),
        mac: record.mac.clone(),
        gateway: network.gateway.clone(),
        subnet: network.subnet.clone(),
        aliases: record.aliases.clone(),
        index: record.index,
    }
}

fn summarize(container: &Container) -> ContainerSummary {
    let status = match container.state {
        ContainerState::Running => match container.started_at {
            Some(at) => format!("Up since {}", at.format("%Y-%m-%d %H:%M:%S")),
            None => "Up".to_string(),
        },
        ContainerState::Exited => format!(
            "Exited ({})",
            container.exit_code.unwrap_or_default()
        ),
        other => other.to_string(),
    };
    ContainerSummary {
        id: container.id.as_str().to_string(),
        names: vec![format!("/{}", container.name)],
        image: container.config.image.clone(),
        image_id: container.config.image_id.clone(),
        command: container.config.command().join(" "),
        created: container.created_at.timestamp(),
        state: container.state,
        status,
        labels: container.config.labels.clone(),
    }
}

fn matches_filters(
    container: &Container,
    filters: &HashMap<String, Vec<String>>,
) -> bool {
    for (key, values) in filters {
        if values.is_empty() {
            continue;
        }
        let hit = match key.as_str() {
            "id" => values
                .iter()
                .any(|v| container.id.as_str().starts_with(v.as_str())),
            "name" => values.iter().any(|v| {
                container.name.contains(v.trim_start_matches('/'))
            }),
            "status" => values
                .iter()
                .any(|v| *v == container.state.to_string()),
            "label" => values.iter().all(|v| match v.split_once('=') {
                Some((k, val)) => {
                    container.config.labels.get(k).map(String::as_str)
                        == Some(val)
                }
                None => container.config.labels.contains_key(v),
            }),
            // unknown filters never exclude
            _ => true,
        };
        if !hit {
            return false;
        }
    }
    true
}
