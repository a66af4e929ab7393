//! The lifecycle operations: create, start, stop, kill, pause/unpause,
//! wait, remove, update, rename, top, diff and attach registration.

use std::{
    collections::HashMap,
    path::Path,
    sync::Arc,
    time::Duration,
};

use chrono::Utc;

use super::{
    attach::{exit_signal, AttachStreams, ExitWaiter, PendingAttach},
    caps::resolve_capabilities,
    config::{
        self,
        effective_env,
        effective_process,
        CreateOpts,
        UpdateOpts,
    },
    container::{
        Container,
        ContainerConfig,
        ContainerState,
        DockerId,
        MountSource,
        MountSpec,
    },
    registry::{ContainerCore, Entry},
    signal::parse_signal,
    Error,
    Result,
};
use crate::{
    diff::{compare, DiffEntry},
    hooks::EventAction,
    stdio::ContainerStreams,
    store::{StoreError, VolumeMountRecord},
    vm::{ContainerVm, NativeContainerConfig, OutputSink, StdinSource},
    volume::VolumeBacking,
};

/// `networkMode` normalisation: empty and `default` mean the default
/// bridge; `none` and `host` opt out of overlay networking entirely.
fn normalize_network_mode(mode: &str) -> Option<&str> {
    match mode {
        "" | "default" | "bridge" => Some("bridge"),
        "none" | "host" => None,
        other => Some(other),
    }
}

/// Attach/IP problems fail a start; anything else downgrades to a
/// warning and the container comes up without that network.
fn network_error_fails_start(error: &crate::network::NetworkError) -> bool {
    use crate::network::NetworkError::*;
    matches!(
        error,
        InvalidIPAddress { .. } | IpAlreadyInUse { .. } | AlreadyConnected { .. }
    )
}

struct TranslatedMounts {
    mounts: Vec<MountSpec>,
    rows: Vec<VolumeMountRecord>,
    anonymous: Vec<String>,
}

impl ContainerCore {
    // === create ===

    pub async fn create(&self, opts: CreateOpts) -> Result<DockerId> {
        self.ensure_initialized()?;

        if let Some(name) = &opts.name {
            config::validate_name(name)?;
        }
        config::validate_host_config(&opts.host)?;
        // surfaces unknown capability names before anything is built
        resolve_capabilities(
            opts.host.privileged,
            &opts.host.cap_add,
            &opts.host.cap_drop,
        )?;

        let image = self.images.get_image(&opts.image).await?;
        let platform = if opts.platform.is_empty() {
            self.opts.platform.clone()
        } else {
            opts.platform.clone()
        };
        let image_config = self.images.config(&image.id, &platform).await?;

        let (docker_id, native_id) = DockerId::generate();
        let name = opts
            .name
            .clone()
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_else(|| docker_id.short().to_string());

        let (entrypoint, cmd, working_dir) =
            effective_process(&opts, &image_config);
        let mut env = effective_env(&image_config.env, &opts.env);

        let skip_embedded_dns = opts
            .labels
            .get("com.arca.skip-embedded-dns")
            .map(String::as_str)
            == Some("true");
        if !skip_embedded_dns
            && !matches!(opts.host.network_mode.as_str(), "host" | "none")
        {
            env.push(format!("ARCA_CONTAINER_ID={docker_id}"));
        }
        if !opts.group_add.is_empty() {
            env.push(format!(
                "ARCA_GROUP_ADD={}",
                opts.group_add.join(",")
            ));
        }

        let translated =
            match self.translate_mounts(docker_id.as_str(), &opts).await {
                Ok(translated) => translated,
                Err(e) => return Err(e),
            };

        let rootfs = match self
            .images
            .clone_rootfs(&image.id, native_id.as_str())
            .await
        {
            Ok(rootfs) => rootfs,
            Err(error) => {
                self.scrap_volumes(&translated.anonymous).await;
                return Err(error.into());
            }
        };

        let container = Container {
            id: docker_id.clone(),
            native_id: native_id.clone(),
            name: name.clone(),
            config: ContainerConfig {
                image: opts.image.clone(),
                image_id: image.id.clone(),
                entrypoint,
                cmd,
                env,
                working_dir,
                user: if opts.user.is_empty() {
                    image_config.user.clone()
                } else {
                    opts.user.clone()
                },
                group_add: opts.group_add.clone(),
                tty: opts.tty,
                open_stdin: opts.open_stdin,
                labels: opts.labels.clone(),
                host: opts.host.clone(),
                healthcheck: opts.healthcheck.clone(),
                mounts: translated.mounts,
                rootfs,
            },
            state: ContainerState::Created,
            pid: None,
            exit_code: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            stopped_by_user: false,
            needs_create: opts.wants_deferred_create(),
            attachments: HashMap::new(),
        };

        // the unique name index in the store is the reservation
        if let Err(e) = self.store.insert_container(&container).await {
            self.scrap_volumes(&translated.anonymous).await;
            return Err(match e {
                StoreError::NameTaken {
                    name, holder,
                } => Error::NameConflict {
                    name,
                    holder,
                },
                other => Error::Store {
                    source: other,
                },
            });
        }
        if let Err(source) =
            self.store.insert_volume_mounts(translated.rows).await
        {
            self.undo_create(&container, &translated.anonymous).await;
            return Err(Error::Store {
                source,
            });
        }

        if let Err(error) = self.fanout.create(docker_id.as_str()).await {
            self.undo_create(&container, &translated.anonymous).await;
            return Err(Error::LogWriterCreationFailed {
                reason: error.to_string(),
            });
        }

        let vm = if container.needs_create {
            debug!(
                container = docker_id.short(),
                "interactive stdio requested, deferring vm creation"
            );
            None
        } else {
            let streams = self
                .fanout
                .streams(docker_id.as_str())
                .expect("writers were just created");
            let native =
                match self.build_native_config(&container, None, &streams) {
                    Ok(native) => native,
                    Err(e) => {
                        self.undo_create(&container, &translated.anonymous)
                            .await;
                        return Err(e);
                    }
                };
            let vm = match self.launcher.launch(native).await {
                Ok(vm) => vm,
                Err(e) => {
                    self.undo_create(&container, &translated.anonymous).await;
                    return Err(e.into());
                }
            };
            if let Err(e) = vm.create().await {
                self.undo_create(&container, &translated.anonymous).await;
                return Err(e.into());
            }
            self.capture_baseline(&container).await;
            Some(vm)
        };

        {
            let mut state = self.state.lock().await;
            if container.needs_create {
                state.deferred.insert(docker_id.as_str().to_string());
            }
            state.names.insert(name.clone(), docker_id.as_str().to_string());
            state.containers.insert(
                docker_id.as_str().to_string(),
                Entry {
                    container: container.clone(),
                    vm,
                },
            );
        }

        info!(
            container = docker_id.short(),
            name = %name,
            image = %opts.image,
            deferred = container.needs_create,
            "container created"
        );
        self.emit(EventAction::Create, &container);
        Ok(docker_id)
    }

    async fn scrap_volumes(&self, anonymous: &[String]) {
        for name in anonymous {
            if let Err(error) = self.volumes.delete(name).await {
                warn!(volume = %name, %error, "failed to delete anonymous volume");
            }
        }
    }

    /// Roll a half-made create back: persisted row, log files, volumes.
    async fn undo_create(&self, container: &Container, anonymous: &[String]) {
        self.fanout.remove(container.id.as_str()).await;
        if let Err(error) =
            self.store.delete_container(container.id.as_str()).await
        {
            warn!(
                container = container.id.short(),
                %error,
                "failed to roll back container row"
            );
        }
        self.scrap_volumes(anonymous).await;
    }

    /// Translate `binds` and anonymous volume destinations into resolved
    /// mounts: host bind paths, shared volume directories, or exclusive
    /// block images.
    async fn translate_mounts(
        &self,
        container_id: &str,
        opts: &CreateOpts,
    ) -> Result<TranslatedMounts> {
        let mut mounts = Vec::new();
        let mut rows = Vec::new();
        let mut anonymous = Vec::new();

        for bind in &opts.host.binds {
            let parts: Vec<&str> = bind.split(':').collect();
            if !(2 ..= 3).contains(&parts.len()) {
                return Err(Error::InvalidParameter {
                    reason: format!("invalid bind '{bind}'"),
                });
            }
            let (source, destination) = (parts[0], parts[1]);
            let read_only = parts.len() == 3
                && parts[2].split(',').any(|f| f == "ro");

            if source.starts_with('/') {
                if !Path::new(source).exists() {
                    return Err(Error::VolumeSourceNotFound {
                        path: source.to_string(),
                    });
                }
                mounts.push(MountSpec {
                    source: MountSource::Bind {
                        host_path: source.into(),
                    },
                    destination: destination.to_string(),
                    read_only,
                });
            } else {
                let volume = self.volumes.resolve(source).await?;
                mounts.push(MountSpec {
                    source: volume_source(&volume, false),
                    destination: destination.to_string(),
                    read_only,
                });
                rows.push(VolumeMountRecord {
                    container_id: container_id.to_string(),
                    volume_name: volume.name.clone(),
                    destination: destination.to_string(),
                    anonymous: false,
                });
            }
        }

        for destination in &opts.volumes {
            if mounts.iter().any(|m| m.destination == *destination) {
                continue;
            }
            let volume = self.volumes.create_anonymous().await?;
            anonymous.push(volume.name.clone());
            mounts.push(MountSpec {
                source: volume_source(&volume, true),
                destination: destination.clone(),
                read_only: false,
            });
            rows.push(VolumeMountRecord {
                container_id: container_id.to_string(),
                volume_name: volume.name.clone(),
                destination: destination.clone(),
                anonymous: true,
            });
        }

        Ok(TranslatedMounts {
            mounts,
            rows,
            anonymous,
        })
    }

    fn build_native_config(
        &self,
        container: &Container,
        stdin: Option<StdinSource>,
        streams: &Arc<ContainerStreams>,
    ) -> Result<NativeContainerConfig> {
        let kernel = &self.opts.kernel_path;
        if !kernel.exists() {
            return Err(Error::KernelNotFound {
                path: kernel.display().to_string(),
            });
        }
        let host = &container.config.host;
        let capabilities = resolve_capabilities(
            host.privileged,
            &host.cap_add,
            &host.cap_drop,
        )?;
        let stdout: Arc<dyn OutputSink> = streams.stdout.clone();
        let stderr: Arc<dyn OutputSink> = streams.stderr.clone();
        Ok(NativeContainerConfig {
            native_id: container.native_id.clone(),
            rootfs: container.config.rootfs.clone(),
            kernel: kernel.clone(),
            command: container.config.command(),
            env: container.config.env.clone(),
            working_dir: container.config.working_dir.clone(),
            user: container.config.user.clone(),
            tty: container.config.tty,
            memory_bytes: host.memory,
            nano_cpus: host.nano_cpus,
            capabilities,
            mounts: container.config.mounts.clone(),
            stdin,
            stdout,
            stderr,
            vmnet: host.network_mode == "host",
        })
    }

    /// Snapshot the rootfs file table into the baseline store;
    /// best-effort, `diff` reports the gap if it failed.
    async fn capture_baseline(&self, container: &Container) {
        let inspector = self.inspector.clone();
        let rootfs = container.config.rootfs.clone();
        let entries = tokio::task::spawn_blocking(move || {
            inspector.enumerate(&rootfs)
        })
        .await;
        match entries {
            Ok(Ok(entries)) => {
                if let Err(error) = self
                    .store
                    .put_baseline(container.id.as_str(), &entries)
                    .await
                {
                    warn!(
                        container = container.id.short(),
                        %error,
                        "failed to persist filesystem baseline"
                    );
                }
            }
            Ok(Err(error)) => {
                warn!(
                    container = container.id.short(),
                    %error,
                    "failed to capture filesystem baseline"
                );
            }
            Err(error) => {
                warn!(container = container.id.short(), %error, "baseline task failed");
            }
        }
    }

    // === start ===

    pub async fn start(&self, id_or_name: &str) -> Result<()> {
        let id = self.resolve(id_or_name).await?;
        self.start_internal(id.as_str(), true).await
    }

    pub(crate) async fn start_internal(
        &self,
        id: &str,
        user_initiated: bool,
    ) -> Result<()> {
        self.ensure_initialized()?;

        let (container, existing_vm, mut pending) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let entry = state.containers.get_mut(id).ok_or_else(|| {
                Error::ContainerNotFound {
                    id: id.to_string(),
                }
            })?;
            match entry.container.state {
                ContainerState::Running | ContainerState::Paused => {
                    debug!(
                        container = entry.container.id.short(),
                        "container already started"
                    );
                    return Ok(());
                }
                ContainerState::Removing => {
                    return Err(Error::InvalidConfiguration {
                        reason: "container is being removed".to_string(),
                    });
                }
                ContainerState::Dead => {
                    return Err(Error::InvalidConfiguration {
                        reason: "container is dead".to_string(),
                    });
                }
                ContainerState::Created
                | ContainerState::Exited
                | ContainerState::Restarting => {}
            }
            if user_initiated {
                state.restart_counts.insert(id.to_string(), 0);
            }
            state.deferred.remove(id);
            let pending = state.pending_attach.remove(id);
            (entry.container.clone(), entry.vm.clone(), pending)
        };

        let vm = match existing_vm {
            Some(vm) => vm,
            None => {
                // Deferred materialisation or post-restart cold restore:
                // rebuild writers and the VM from the persisted config.
                let streams = match self.fanout.streams(id) {
                    Some(streams) => streams,
                    None => self.fanout.reregister(id).await.map_err(
                        |error| Error::LogWriterCreationFailed {
                            reason: error.to_string(),
                        },
                    )?,
                };
                if !container.config.rootfs.exists() {
                    self.images
                        .clone_rootfs(
                            &container.config.image_id,
                            container.native_id.as_str(),
                        )
                        .await?;
                }
                let stdin =
                    pending.as_mut().and_then(|p| p.streams.stdin.take());
                let native =
                    self.build_native_config(&container, stdin, &streams)?;
                let vm = self.launcher.launch(native).await?;
                vm.create().await?;
                if container.needs_create {
                    self.capture_baseline(&container).await;
                }
                vm
            }
        };

        // Attach handles become broadcast subscribers before the guest
        // produces its first byte.
        if let Some(pending) = pending {
            self.fanout
                .subscribe(id, pending.streams.stdout, pending.streams.stderr)
                .await;
        }

        if let Err(error) = vm.start().await {
            let _ = vm.stop(Duration::from_secs(0)).await;
            let mut state = self.state.lock().await;
            if let Some(entry) = state.containers.get_mut(id) {
                entry.vm = None;
            }
            return Err(error.into());
        }

        let container = {
            let mut state = self.state.lock().await;
            let entry = state.containers.get_mut(id).ok_or_else(|| {
                Error::ContainerNotFound {
                    id: id.to_string(),
                }
            })?;
            entry.container.state = ContainerState::Running;
            entry.container.started_at = Some(Utc::now());
            entry.container.finished_at = None;
            entry.container.exit_code = None;
            entry.container.pid = vm.pid();
            entry.container.stopped_by_user = false;
            entry.container.needs_create = false;
            entry.vm = Some(vm.clone());
            entry.container.clone()
        };
        self.persist(&container).await?;
        self.vms.insert(id, vm.clone());

        if let Err(error) = self.connect_networks(&container, &vm).await {
            if network_error_fails_start(&error) {
                warn!(
                    container = container.id.short(),
                    %error,
                    "network attach failed, aborting start"
                );
                self.vms.remove(id);
                let _ = vm.stop(Duration::from_secs(0)).await;
                let rollback = {
                    let mut state = self.state.lock().await;
                    state.containers.get_mut(id).map(|entry| {
                        entry.container.state = ContainerState::Exited;
                        entry.container.exit_code = Some(1);
                        entry.container.finished_at = Some(Utc::now());
                        entry.container.pid = None;
                        entry.vm = None;
                        entry.container.clone()
                    })
                };
                if let Some(rolled) = rollback {
                    let _ = self.persist(&rolled).await;
                }
                return Err(Error::Network {
                    source: error,
                });
            }
            warn!(
                container = container.id.short(),
                %error,
                "network attach failed, starting without network"
            );
        }

        // refresh the attachment views now the driver has written rows
        let container = {
            let views =
                self.attachment_views(id).await.unwrap_or_default();
            let mut state = self.state.lock().await;
            let entry = state.containers.get_mut(id).ok_or_else(|| {
                Error::ContainerNotFound {
                    id: id.to_string(),
                }
            })?;
            entry.container.attachments = views;
            entry.container.clone()
        };
        self.persist(&container).await?;

        self.network.push_dns_for_container(id).await;

        if !container.config.host.port_bindings.is_empty() {
            if let Err(error) = self
                .ports
                .publish(id, &vm, &container.config.host.port_bindings)
                .await
            {
                warn!(
                    container = container.id.short(),
                    %error, "port publish failed"
                );
            }
        }

        if let Some(health) = &container.config.healthcheck {
            if !health.disabled() && !health.test.is_empty() {
                self.health.start(id, health, &vm).await;
            }
        }

        let handle = self.spawn_monitor(id.to_string(), vm.clone());
        {
            let mut state = self.state.lock().await;
            state.monitors.insert(id.to_string(), handle);
        }

        info!(container = container.id.short(), name = %container.name, "container started");
        self.emit(EventAction::Start, &container);
        Ok(())
    }

    /// Auto-attach per `networkMode` plus every persisted attachment
    /// with its preserved address.
    async fn connect_networks(
        &self,
        container: &Container,
        vm: &Arc<dyn ContainerVm>,
    ) -> std::result::Result<(), crate::network::NetworkError> {
        let id = container.id.as_str();
        let Some(mode) =
            normalize_network_mode(&container.config.host.network_mode)
        else {
            return Ok(());
        };

        let restored = self.network.attachments_of(id).await?;
        let mut joined = Vec::new();
        for (network, record) in &restored {
            self.network
                .attach_for_start(
                    &network.id,
                    id,
                    &container.name,
                    record.aliases.clone(),
                    Some(record.ip),
                    container.config.host.extra_hosts.clone(),
                    vm.clone(),
                )
                .await?;
            joined.push(network.id.clone());
        }

        let mode_network = self.network.resolve(mode).await?;
        if !joined.contains(&mode_network.id) {
            self.network
                .attach_for_start(
                    &mode_network.id,
                    id,
                    &container.name,
                    Vec::new(),
                    None,
                    container.config.host.extra_hosts.clone(),
                    vm.clone(),
                )
                .await?;
        }
        Ok(())
    }

    // === stop / kill / pause ===

    /// Idempotent stop: a no-op for containers with no live guest.
    pub async fn stop(
        &self,
        id_or_name: &str,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.ensure_initialized()?;

        let (id, name, vm, monitor) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let id = Self::resolve_locked(&state, id_or_name)?;
            let entry =
                state.containers.get_mut(&id).expect("resolved id exists");
            match entry.container.state {
                ContainerState::Exited
                | ContainerState::Dead
                | ContainerState::Created
                | ContainerState::Removing => return Ok(()),
                _ => {}
            }
            // decided before the monitor can race the policy evaluation
            entry.container.stopped_by_user = true;
            let vm = entry.vm.clone();
            let monitor = state.monitors.remove(&id);
            (id, entry.container.name.clone(), vm, monitor)
        };

        if let Some(monitor) = monitor {
            let _ = monitor.cancel.send(());
            let _ = monitor.task.await;
        }
        self.health.stop(&id).await;

        let mut exit_code = None;
        if let Some(vm) = &vm {
            match vm
                .stop(timeout.unwrap_or(self.opts.stop_timeout))
                .await
            {
                Ok(code) => exit_code = Some(code),
                Err(error) => {
                    warn!(container = &id[.. 12], %error, "vm stop failed");
                }
            }
        }

        if let Err(error) = self.ports.unpublish(&id).await {
            warn!(container = &id[.. 12], %error, "port unpublish failed");
        }
        if let Err(error) = self.network.detach_runtime(&id, &name).await {
            warn!(container = &id[.. 12], %error, "network detach failed");
        }

        let (container, exit_tx) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let exit_tx = state.exit_signals.remove(&id);
            let Some(entry) = state.containers.get_mut(&id) else {
                // removed concurrently; nothing left to finalise
                return Ok(());
            };
            entry.container.state = ContainerState::Exited;
            entry.container.exit_code =
                exit_code.or(entry.container.exit_code).or(Some(0));
            entry.container.finished_at = Some(Utc::now());
            entry.container.pid = None;
            entry.container.stopped_by_user = true;
            entry.vm = None;
            (entry.container.clone(), exit_tx)
        };
        self.vms.remove(&id);
        if let Some(tx) = exit_tx {
            let _ = tx.send(container.exit_code.unwrap_or(0));
        }

        self.persist(&container).await?;
        info!(container = container.id.short(), "container stopped");
        self.emit(EventAction::Stop, &container);
        Ok(())
    }

    /// Send a signal to the guest process; requires `running`.
    pub async fn kill(&self, id_or_name: &str, signal: &str) -> Result<()> {
        self.ensure_initialized()?;
        let (id, vm) = {
            let state = self.state.lock().await;
            let id = Self::resolve_locked(&state, id_or_name)?;
            let entry = &state.containers[&id];
            if entry.container.state != ContainerState::Running {
                return Err(Error::ContainerNotRunning {
                    id,
                });
            }
            let vm = entry.vm.clone().ok_or(Error::ContainerNotRunning {
                id: id.clone(),
            })?;
            (id, vm)
        };
        let signum = parse_signal(signal);
        debug!(container = &id[.. 12], signal = signum, "killing container");
        vm.kill(signum).await.map_err(Error::from)
    }

    pub async fn pause(&self, id_or_name: &str) -> Result<()> {
        self.ensure_initialized()?;
        let (id, vm) = {
            let state = self.state.lock().await;
            let id = Self::resolve_locked(&state, id_or_name)?;
            let entry = &state.containers[&id];
            if entry.container.state != ContainerState::Running {
                return Err(Error::ContainerNotRunning {
                    id,
                });
            }
            let vm = entry.vm.clone().ok_or(Error::ContainerNotRunning {
                id: id.clone(),
            })?;
            (id, vm)
        };
        vm.pause().await?;
        let container = self.transition(&id, ContainerState::Paused).await?;
        self.emit(EventAction::Pause, &container);
        Ok(())
    }

    pub async fn unpause(&self, id_or_name: &str) -> Result<()> {
        self.ensure_initialized()?;
        let (id, vm) = {
            let state = self.state.lock().await;
            let id = Self::resolve_locked(&state, id_or_name)?;
            let entry = &state.containers[&id];
            if entry.container.state != ContainerState::Paused {
                return Err(Error::ContainerNotPaused {
                    id,
                });
            }
            let vm = entry.vm.clone().ok_or(Error::ContainerNotPaused {
                id: id.clone(),
            })?;
            (id, vm)
        };
        vm.resume().await?;
        let container = self.transition(&id, ContainerState::Running).await?;
        self.emit(EventAction::Unpause, &container);
        Ok(())
    }

    async fn transition(
        &self,
        id: &str,
        to: ContainerState,
    ) -> Result<Container> {
        let container = {
            let mut state = self.state.lock().await;
            let entry = state.containers.get_mut(id).ok_or_else(|| {
                Error::ContainerNotFound {
                    id: id.to_string(),
                }
            })?;
            entry.container.state = to;
            entry.container.clone()
        };
        self.persist(&container).await?;
        Ok(container)
    }

    // === wait ===

    /// Block until the container exits and return the exit code.
    /// Already-exited containers answer immediately, created ones with 0.
    pub async fn wait(
        &self,
        id_or_name: &str,
        timeout: Option<Duration>,
    ) -> Result<i64> {
        self.ensure_initialized()?;
        let (id, vm) = {
            let state = self.state.lock().await;
            let id = Self::resolve_locked(&state, id_or_name)?;
            let entry = &state.containers[&id];
            match entry.container.state {
                ContainerState::Exited | ContainerState::Dead => {
                    return Ok(entry.container.exit_code.unwrap_or(0));
                }
                ContainerState::Created => return Ok(0),
                _ => {}
            }
            match entry.vm.clone() {
                Some(vm) => (id, vm),
                None => return Ok(entry.container.exit_code.unwrap_or(0)),
            }
        };

        let exit_code = vm.wait(timeout).await.map_err(|e| match e {
            crate::vm::VmError::WaitTimedOut {
                ..
            } => Error::WaitTimeout {
                id: id.clone(),
            },
            other => Error::Vm {
                source: other,
            },
        })?;

        // The monitor records the exit as well; this persist keeps the
        // wait contract even when the monitor loses the race.
        let container = {
            let mut state = self.state.lock().await;
            state.containers.get_mut(&id).map(|entry| {
                if entry.container.state == ContainerState::Running {
                    entry.container.state = ContainerState::Exited;
                    entry.container.exit_code = Some(exit_code);
                    entry.container.finished_at = Some(Utc::now());
                    entry.container.pid = None;
                }
                entry.container.clone()
            })
        };
        if let Some(container) = container {
            self.persist(&container).await?;
        }
        Ok(exit_code)
    }

    // === remove ===

    pub async fn remove(
        &self,
        id_or_name: &str,
        force: bool,
        remove_volumes: bool,
    ) -> Result<()> {
        self.ensure_initialized()?;

        let (id, container, vm, monitor) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let id = Self::resolve_locked(&state, id_or_name)?;
            let entry =
                state.containers.get_mut(&id).expect("resolved id exists");
            if entry.container.state.has_vm() && !force {
                return Err(Error::ContainerRunning {
                    id,
                });
            }
            entry.container.state = ContainerState::Removing;
            entry.container.stopped_by_user = true;
            let vm = entry.vm.take();
            let monitor = state.monitors.remove(&id);
            state.pending_attach.remove(&id);
            state.deferred.remove(&id);
            (id, entry.container.clone(), vm, monitor)
        };
        self.vms.remove(&id);

        // Stop the VM before awaiting the monitor: the monitor blocks on
        // VM exit, and joining it first would deadlock.
        if let Some(vm) = &vm {
            if let Err(error) = vm.stop(Duration::from_secs(0)).await {
                debug!(container = &id[.. 12], %error, "vm stop during remove");
            }
        }
        if let Some(monitor) = monitor {
            let _ = monitor.task.await;
        }

        self.health.stop(&id).await;
        if let Err(error) = self.ports.unpublish(&id).await {
            warn!(container = &id[.. 12], %error, "port unpublish failed");
        }
        // database-only when no VM is live
        if let Err(error) =
            self.network.detach_all(&id, &container.name).await
        {
            warn!(container = &id[.. 12], %error, "network detach failed");
        }

        // anonymous volumes are fate-shared with the container
        self.scrap_volumes(&container.config.anonymous_volumes()).await;
        if remove_volumes {
            for mount in &container.config.mounts {
                if let Some((name, false)) = mount.volume_name() {
                    if let Err(error) = self.volumes.delete(name).await {
                        warn!(volume = name, %error, "failed to delete volume");
                    }
                }
            }
        }

        self.fanout.remove(&id).await;
        self.store
            .delete_container(&id)
            .await
            .map_err(|source| Error::Store {
                source,
            })?;

        {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            state.containers.remove(&id);
            state.names.remove(&container.name);
            state.exit_signals.remove(&id);
            state.restart_counts.remove(&id);
        }

        info!(container = container.id.short(), name = %container.name, "container removed");
        self.emit(EventAction::Destroy, &container);
        Ok(())
    }

    // === update / rename ===

    /// Merge a host-config delta. Hot limits do not reach a running
    /// guest; the returned warnings say so.
    pub async fn update(
        &self,
        id_or_name: &str,
        opts: UpdateOpts,
    ) -> Result<Vec<String>> {
        self.ensure_initialized()?;
        let container = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let id = Self::resolve_locked(&state, id_or_name)?;
            let entry =
                state.containers.get_mut(&id).expect("resolved id exists");
            let mut merged = entry.container.config.host.clone();
            opts.merge_into(&mut merged)?;
            entry.container.config.host = merged;
            entry.container.clone()
        };
        self.persist(&container).await?;

        let mut warnings = Vec::new();
        if container.state == ContainerState::Running {
            warnings.push(
                "resource limit changes take effect on the next restart"
                    .to_string(),
            );
        }
        self.emit(EventAction::Update, &container);
        Ok(warnings)
    }

    pub async fn rename(
        &self,
        id_or_name: &str,
        new_name: &str,
    ) -> Result<()> {
        self.ensure_initialized()?;
        let new_name = new_name.trim_start_matches('/').to_string();
        config::validate_name(&new_name)?;

        let (id, old_name) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let id = Self::resolve_locked(&state, id_or_name)?;
            if let Some(holder) = state.names.get(&new_name) {
                if *holder != id {
                    return Err(Error::NameConflict {
                        name: new_name,
                        holder: holder.clone(),
                    });
                }
                return Ok(());
            }
            let entry =
                state.containers.get_mut(&id).expect("resolved id exists");
            let old_name = entry.container.name.clone();
            entry.container.name = new_name.clone();
            state.names.remove(&old_name);
            state.names.insert(new_name.clone(), id.clone());
            (id, old_name)
        };

        // the persistence layer owns uniqueness; roll back on conflict
        if let Err(e) = self.store.rename_container(&id, &new_name).await {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            if let Some(entry) = state.containers.get_mut(&id) {
                entry.container.name = old_name.clone();
            }
            state.names.remove(&new_name);
            state.names.insert(old_name, id);
            return Err(match e {
                StoreError::NameTaken {
                    name, holder,
                } => Error::NameConflict {
                    name,
                    holder,
                },
                other => Error::Store {
                    source: other,
                },
            });
        }

        let container = {
            let state = self.state.lock().await;
            state.containers[&id].container.clone()
        };
        self.emit(EventAction::Rename, &container);
        Ok(())
    }

    // === top / diff / attach / logs ===

    /// Process table of a running container, straight from the guest.
    pub async fn top(
        &self,
        id_or_name: &str,
        ps_args: &str,
    ) -> Result<(Vec<String>, Vec<Vec<String>>)> {
        self.ensure_initialized()?;
        let vm = {
            let state = self.state.lock().await;
            let id = Self::resolve_locked(&state, id_or_name)?;
            let entry = &state.containers[&id];
            if entry.container.state != ContainerState::Running {
                return Err(Error::ContainerNotRunning {
                    id,
                });
            }
            entry.vm.clone().ok_or(Error::ContainerNotRunning {
                id,
            })?
        };
        self.guests
            .list_processes(vm.as_ref(), ps_args)
            .await
            .map_err(|source| Error::Guest {
                source,
            })
    }

    /// `docker diff`: sync the guest filesystem when running, then
    /// enumerate the rootfs image and compare against the baseline.
    pub async fn get_changes(
        &self,
        id_or_name: &str,
    ) -> Result<Vec<DiffEntry>> {
        self.ensure_initialized()?;
        let (id, rootfs, vm) = {
            let state = self.state.lock().await;
            let id = Self::resolve_locked(&state, id_or_name)?;
            let entry = &state.containers[&id];
            (
                id.clone(),
                entry.container.config.rootfs.clone(),
                (entry.container.state == ContainerState::Running)
                    .then(|| entry.vm.clone())
                    .flatten(),
            )
        };

        let baseline = self
            .store
            .get_baseline(&id)
            .await
            .map_err(|source| Error::Store {
                source,
            })?
            .ok_or_else(|| Error::NoFilesystemBaseline {
                id: id.clone(),
            })?;

        if let Some(vm) = vm {
            if let Err(error) =
                self.guests.sync_filesystem(vm.as_ref()).await
            {
                warn!(
                    container = &id[.. 12],
                    %error,
                    "guest filesystem sync failed, diff may lag"
                );
            }
        }

        let inspector = self.inspector.clone();
        let current = tokio::task::spawn_blocking(move || {
            inspector.enumerate(&rootfs)
        })
        .await
        .map_err(|e| Error::FailedToReadFilesystem {
            reason: e.to_string(),
        })?
        .map_err(|e| Error::FailedToReadFilesystem {
            reason: e.to_string(),
        })?;

        Ok(compare(&baseline, &current))
    }

    /// Park attach handles for the next `start`; returns the exit
    /// waiter resolved by the monitor.
    pub async fn register_attach(
        &self,
        id_or_name: &str,
        streams: AttachStreams,
    ) -> Result<ExitWaiter> {
        self.ensure_initialized()?;
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let id = Self::resolve_locked(&state, id_or_name)?;
        let (tx, waiter) = exit_signal();
        state.exit_signals.insert(id.clone(), tx);
        if state
            .pending_attach
            .insert(id.clone(), PendingAttach { streams })
            .is_some()
        {
            warn!(container = &id[.. 12], "replacing pending attach handles");
        }
        Ok(waiter)
    }

    /// Live-subscribe to the stdio of a (possibly running) container.
    pub async fn attach_output(
        &self,
        id_or_name: &str,
        stdout: Option<crate::stdio::broadcast::Subscriber>,
        stderr: Option<crate::stdio::broadcast::Subscriber>,
    ) -> Result<()> {
        let id = self.resolve(id_or_name).await?;
        if self.fanout.subscribe(id.as_str(), stdout, stderr).await {
            Ok(())
        } else {
            Err(Error::LogWriterCreationFailed {
                reason: "log writers are not registered".to_string(),
            })
        }
    }

    /// Paths of the durable stdio files.
    pub async fn log_paths(
        &self,
        id_or_name: &str,
    ) -> Result<(std::path::PathBuf, std::path::PathBuf)> {
        let id = self.resolve(id_or_name).await?;
        Ok(self.fanout.paths(id.as_str()))
    }
}

fn volume_source(
    volume: &crate::volume::Volume,
    anonymous: bool,
) -> MountSource {
    match &volume.backing {
        VolumeBacking::Directory(path) => MountSource::Volume {
            name: volume.name.clone(),
            host_path: path.clone(),
            anonymous,
        },
        VolumeBacking::BlockImage(image) => MountSource::Block {
            name: volume.name.clone(),
            image: image.clone(),
            anonymous,
        },
    }
}
