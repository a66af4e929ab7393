//! Process-backed VM launcher: every container VM is a child process
//! running the platform VMM helper (`arca-vmm`), which boots the kernel,
//! attaches the rootfs and bridges guest vsock ports to unix sockets
//! under the per-VM socket directory. Guest stdio flows over the
//! helper's own stdio pipes.
//!
//! `create()` spawns the helper suspended; `start()` lets it run. Pause
//! and resume map onto SIGSTOP/SIGCONT of the helper process.

use std::{
    path::PathBuf,
    process::Stdio,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    process::Command,
    sync::{watch, Mutex},
};

use super::{
    ContainerVm,
    NativeContainerConfig,
    OutputSink,
    Result,
    VmError,
    VmLauncher,
};
use crate::core::NativeId;

pub struct ProcessVmLauncher {
    vmm_binary: PathBuf,
    socket_root: PathBuf,
}

impl ProcessVmLauncher {
    pub fn new(vmm_binary: PathBuf, socket_root: PathBuf) -> ProcessVmLauncher {
        ProcessVmLauncher {
            vmm_binary,
            socket_root,
        }
    }
}

#[async_trait]
impl VmLauncher for ProcessVmLauncher {
    async fn launch(
        &self,
        config: NativeContainerConfig,
    ) -> Result<Arc<dyn ContainerVm>> {
        let native_id = config.native_id.clone();
        let socket_dir = self.socket_root.join(native_id.as_str());
        let (exit_tx, exit_rx) = watch::channel(None);
        Ok(Arc::new(ProcessVm {
            native_id,
            vmm_binary: self.vmm_binary.clone(),
            socket_dir,
            config: Mutex::new(Some(config)),
            pid: AtomicI64::new(0),
            exit_tx,
            exit_rx,
        }))
    }
}

pub struct ProcessVm {
    native_id: NativeId,
    vmm_binary: PathBuf,
    socket_dir: PathBuf,
    /// Consumed by `create()`.
    config: Mutex<Option<NativeContainerConfig>>,
    pid: AtomicI64,
    exit_tx: watch::Sender<Option<i64>>,
    exit_rx: watch::Receiver<Option<i64>>,
}

impl ProcessVm {
    fn current_pid(&self) -> Option<i32> {
        match self.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid as i32),
        }
    }

    fn signal_process(&self, signal: Signal) -> Result<()> {
        let pid = self.current_pid().ok_or_else(|| VmError::SignalFailed {
            native_id: self.native_id.to_string(),
            reason: "vm process is not running".to_string(),
        })?;
        signal::kill(Pid::from_raw(pid), signal).map_err(|e| {
            VmError::SignalFailed {
                native_id: self.native_id.to_string(),
                reason: e.to_string(),
            }
        })
    }

    fn exited_code(&self) -> Option<i64> {
        *self.exit_rx.borrow()
    }

    async fn await_exit(&self, timeout: Option<Duration>) -> Result<i64> {
        let mut rx = self.exit_rx.clone();
        let wait = async {
            loop {
                if let Some(code) = *rx.borrow_and_update() {
                    return code;
                }
                if rx.changed().await.is_err() {
                    return 137;
                }
            }
        };
        match timeout {
            None => Ok(wait.await),
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| VmError::WaitTimedOut {
                    native_id: self.native_id.to_string(),
                }),
        }
    }
}

#[async_trait]
impl ContainerVm for ProcessVm {
    fn native_id(&self) -> &NativeId {
        &self.native_id
    }

    fn pid(&self) -> Option<i64> {
        self.current_pid().map(|p| p as i64)
    }

    fn control_socket(&self, port: u32) -> PathBuf {
        self.socket_dir.join(format!("vsock_{port}.sock"))
    }

    async fn create(&self) -> Result<()> {
        let config = self.config.lock().await.take().ok_or_else(|| {
            VmError::CreateFailed {
                native_id: self.native_id.to_string(),
                reason: "vm was already created".to_string(),
            }
        })?;

        tokio::fs::create_dir_all(&self.socket_dir).await.map_err(
            |e| VmError::CreateFailed {
                native_id: self.native_id.to_string(),
                reason: e.to_string(),
            },
        )?;

        let mut command = Command::new(&self.vmm_binary);
        command
            .arg("--id")
            .arg(self.native_id.as_str())
            .arg("--kernel")
            .arg(&config.kernel)
            .arg("--rootfs")
            .arg(&config.rootfs)
            .arg("--vsock-dir")
            .arg(&self.socket_dir)
            .arg("--workdir")
            .arg(&config.working_dir);
        if !config.user.is_empty() {
            command.arg("--user").arg(&config.user);
        }
        if config.tty {
            command.arg("--tty");
        }
        if config.memory_bytes > 0 {
            command
                .arg("--memory")
                .arg(config.memory_bytes.to_string());
        }
        if config.nano_cpus > 0 {
            command
                .arg("--nano-cpus")
                .arg(config.nano_cpus.to_string());
        }
        if config.vmnet {
            command.arg("--vmnet");
        }
        for env in &config.env {
            command.arg("--env").arg(env);
        }
        for cap in &config.capabilities.effective {
            command.arg("--cap").arg(cap);
        }
        command.arg("--");
        command.args(&config.command);

        command
            .stdin(if config.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| VmError::CreateFailed {
            native_id: self.native_id.to_string(),
            reason: format!(
                "failed to spawn {}: {e}",
                self.vmm_binary.display()
            ),
        })?;

        let pid = child.id().unwrap_or_default() as i64;
        self.pid.store(pid, Ordering::SeqCst);

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_output(stdout, config.stdout.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_output(stderr, config.stderr.clone()));
        }
        if let (Some(mut source), Some(mut sink)) =
            (config.stdin, child.stdin.take())
        {
            tokio::spawn(async move {
                let _ = tokio::io::copy(&mut source, &mut sink).await;
                let _ = sink.shutdown().await;
            });
        }

        // Hold the helper until start(); created is not running.
        let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGSTOP);

        let exit_tx = self.exit_tx.clone();
        tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => i64::from(status.code().unwrap_or(137)),
                Err(_) => 137,
            };
            let _ = exit_tx.send(Some(code));
        });

        debug!(vm = %self.native_id, pid, "vm helper spawned");
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.signal_process(Signal::SIGCONT)
            .map_err(|e| VmError::StartFailed {
                native_id: self.native_id.to_string(),
                reason: e.to_string(),
            })
    }

    async fn stop(&self, timeout: Duration) -> Result<i64> {
        if let Some(code) = self.exited_code() {
            return Ok(code);
        }
        // resume first: a paused guest cannot handle SIGTERM
        let _ = self.signal_process(Signal::SIGCONT);
        let _ = self.signal_process(Signal::SIGTERM);
        if let Ok(code) = self.await_exit(Some(timeout.max(
            Duration::from_millis(10),
        )))
        .await
        {
            return Ok(code);
        }
        let _ = self.signal_process(Signal::SIGKILL);
        self.await_exit(None).await
    }

    async fn kill(&self, signum: i32) -> Result<()> {
        let signal = Signal::try_from(signum).map_err(|_| {
            VmError::SignalFailed {
                native_id: self.native_id.to_string(),
                reason: format!("unknown signal {signum}"),
            }
        })?;
        self.signal_process(signal)
    }

    async fn pause(&self) -> Result<()> {
        self.signal_process(Signal::SIGSTOP)
    }

    async fn resume(&self) -> Result<()> {
        self.signal_process(Signal::SIGCONT)
    }

    async fn wait(&self, timeout: Option<Duration>) -> Result<i64> {
        self.await_exit(timeout).await
    }
}

async fn pump_output(
    mut from: impl tokio::io::AsyncRead + Unpin,
    sink: Arc<dyn OutputSink>,
) {
    let mut buf = [0u8; 8192];
    loop {
        match from.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => sink.write(&buf[.. n]).await,
        }
    }
    sink.close().await;
}
