//! Attach plumbing for interactive containers. Handles are registered
//! before `start`; the first start consumes them, wiring stdin into the
//! guest process and subscribing stdout/stderr to the broadcast
//! writers. The exit monitor finalises the streams and fires the exit
//! signal.

use tokio::sync::oneshot;

use crate::{stdio::broadcast::Subscriber, vm::StdinSource};

/// Stream handles of one attach client.
pub struct AttachStreams {
    pub stdin: Option<StdinSource>,
    pub stdout: Option<Subscriber>,
    pub stderr: Option<Subscriber>,
}

impl std::fmt::Debug for AttachStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachStreams")
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .finish()
    }
}

/// Consumer side of the exit signal: resolves with the exit code once
/// the monitor reports the container gone.
pub struct ExitWaiter {
    rx: oneshot::Receiver<i64>,
}

impl ExitWaiter {
    /// `None` when the container is removed without ever exiting
    /// through the monitor (signal dropped).
    pub async fn wait(self) -> Option<i64> {
        self.rx.await.ok()
    }
}

/// Handles parked between `registerAttach` and the consuming `start`.
pub(crate) struct PendingAttach {
    pub streams: AttachStreams,
}

pub(crate) fn exit_signal() -> (oneshot::Sender<i64>, ExitWaiter) {
    let (tx, rx) = oneshot::channel();
    (tx, ExitWaiter { rx })
}
