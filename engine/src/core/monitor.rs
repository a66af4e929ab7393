//! Per-container exit monitoring and the restart-policy engine.
//!
//! One monitor task runs per started container. It parks on the VM's
//! wait primitive; when the guest exits it finalises the attach
//! streams, fires the exit signal, drives the VM back to stopped so a
//! later start can recreate it, and re-enters the core to record the
//! exit and evaluate the restart policy.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::sync::oneshot;

use super::{
    container::ContainerState,
    registry::{ContainerCore, MonitorHandle},
};
use crate::{hooks::EventAction, vm::ContainerVm};

/// Delay between an exit and the restart attempt the policy asks for.
const RESTART_DELAY: Duration = Duration::from_secs(1);

impl ContainerCore {
    pub(crate) fn spawn_monitor(
        &self,
        container_id: String,
        vm: Arc<dyn ContainerVm>,
    ) -> MonitorHandle {
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let core = self.self_ref.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                exit = vm.wait(None) => {
                    let exit_code = match exit {
                        Ok(code) => code,
                        Err(error) => {
                            warn!(
                                container = &container_id[.. 12],
                                %error,
                                "vm wait failed, recording exit 255"
                            );
                            255
                        }
                    };
                    let Some(core) = core.upgrade() else { return };
                    core.handle_exit(&container_id, exit_code, vm).await;
                }
                _ = cancel_rx => {
                    // Cancelled by stop/shutdown/remove. The canceller
                    // owns state cleanup; the monitor still finalises
                    // the attach streams it is responsible for.
                    let Some(core) = core.upgrade() else { return };
                    core.finalize_streams(&container_id).await;
                }
            }
        });
        MonitorHandle {
            cancel: cancel_tx,
            task,
        }
    }

    /// Close attach subscribers so upstream HTTP streams finalise; the
    /// durable file sinks stay open.
    pub(crate) async fn finalize_streams(&self, container_id: &str) {
        if let Some(streams) = self.fanout.streams(container_id) {
            streams.stdout.broadcast().close_subscribers().await;
            streams.stderr.broadcast().close_subscribers().await;
        }
    }

    pub(crate) async fn handle_exit(
        &self,
        container_id: &str,
        exit_code: i64,
        vm: Arc<dyn ContainerVm>,
    ) {
        debug!(
            container = &container_id[.. 12],
            exit_code, "monitor observed exit"
        );

        self.finalize_streams(container_id).await;

        // Fire the exit signal before anything that can fail.
        let exit_tx = {
            let mut state = self.state.lock().await;
            state.exit_signals.remove(container_id)
        };
        if let Some(tx) = exit_tx {
            let _ = tx.send(exit_code);
        }

        // Drive the VM from started back to stopped; a later start
        // recreates it from scratch.
        if let Err(error) = vm.stop(Duration::from_secs(0)).await {
            debug!(
                container = &container_id[.. 12],
                %error,
                "vm stop after exit"
            );
        }

        let mut removing = false;
        let mut restart = false;
        let snapshot = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            state.monitors.remove(container_id);
            let Some(entry) = state.containers.get_mut(container_id) else {
                return;
            };
            if entry.container.state == ContainerState::Removing {
                entry.vm = None;
                removing = true;
                None
            } else {
                entry.container.state = ContainerState::Exited;
                entry.container.exit_code = Some(exit_code);
                entry.container.finished_at = Some(Utc::now());
                entry.container.pid = None;
                entry.vm = None;

                let attempts = state
                    .restart_counts
                    .get(container_id)
                    .copied()
                    .unwrap_or(0);
                let container = &state.containers[container_id].container;
                restart = container.config.host.restart_policy.should_restart(
                    exit_code,
                    container.stopped_by_user,
                    attempts,
                );
                if restart {
                    *state
                        .restart_counts
                        .entry(container_id.to_string())
                        .or_insert(0) += 1;
                }
                Some(state.containers[container_id].container.clone())
            }
        };
        self.vms.remove(container_id);

        if removing {
            return;
        }
        let Some(container) = snapshot else { return };

        self.health.stop(container_id).await;
        if let Err(error) = self.ports.unpublish(container_id).await {
            warn!(
                container = &container_id[.. 12],
                %error, "port unpublish after exit failed"
            );
        }
        // Best-effort mesh teardown; attachment rows stay for restart.
        if let Err(error) = self
            .network
            .detach_runtime(container_id, &container.name)
            .await
        {
            warn!(
                container = &container_id[.. 12],
                %error,
                "network teardown after exit failed"
            );
        }

        if let Err(error) = self.persist(&container).await {
            error!(
                container = &container_id[.. 12],
                %error,
                "failed to persist exit"
            );
        }
        self.emit(EventAction::Die, &container);

        if restart
            && !self
                .shutting_down
                .load(std::sync::atomic::Ordering::SeqCst)
        {
            info!(
                container = &container_id[.. 12],
                exit_code, "restart policy scheduling restart"
            );
            {
                let mut state = self.state.lock().await;
                if let Some(entry) = state.containers.get_mut(container_id) {
                    entry.container.state = ContainerState::Restarting;
                }
            }
            tokio::time::sleep(RESTART_DELAY).await;
            let Some(core) = self.self_ref.upgrade() else {
                return;
            };
            let id = container_id.to_string();
            tokio::spawn(async move {
                if core
                    .shutting_down
                    .load(std::sync::atomic::Ordering::SeqCst)
                {
                    return;
                }
                if let Err(error) = core.start_internal(&id, false).await {
                    warn!(
                        container = &id[.. 12],
                        %error,
                        "policy restart failed"
                    );
                    let mut state = core.state.lock().await;
                    if let Some(entry) = state.containers.get_mut(&id) {
                        if entry.container.state == ContainerState::Restarting
                        {
                            entry.container.state = ContainerState::Exited;
                        }
                    }
                }
            });
        }
    }
}
